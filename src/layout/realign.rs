//! Moving statements onto their original lines.
//!
//! Blocks with a known line are anchors. Only the longest run of anchors with strictly increasing
//! lines is honored. The blocks after one anchor up to and including the next form a section,
//! which must take exactly as many lines as the two line numbers differ by. Sections that are too
//! short get blank lines. Sections that are too long give up blank lines, then braces, then case
//! labels, and when that isn't enough, lose a member without anchors to the end of its class.
//!
//! Shortening is done one section per round, worst first, because moving a member changes the
//! sections it lands in.

use super::{BlockTag, Layout, LayoutBlockId, Marker};
use core::cmp::Reverse;
use core::ops::Range;
use rustc_hash::FxHashSet;

/// How much a line of mismatch weighs against a line of deviation from the preferred counts.
const MISMATCH_WEIGHT: u64 = 64;

#[derive(Clone, Debug)]
struct Section {
    /// Blocks of the section, as a range of `order`. The anchor is the last one.
    range: Range<usize>,
    anchor: LayoutBlockId,
    /// Missing lines if positive, excess lines if negative.
    mismatch: i64,
    score: u64,
    frozen: bool,
}

/// Longest subsequence of `(index, line)` pairs with strictly increasing lines. Returns the
/// indices.
fn increasing_anchors(candidates: &[(usize, u32)]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = Vec::with_capacity(candidates.len());
    for (i, &(_, line)) in candidates.iter().enumerate() {
        let k = tails.partition_point(|&tail| candidates[tail].1 < line);
        previous.push(k.checked_sub(1).map(|k| tails[k]));
        if k == tails.len() {
            tails.push(i);
        } else {
            tails[k] = i;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(candidates[i].0);
        cursor = previous[i];
    }
    out.reverse();
    out
}

impl Layout {
    /// Re-balances line counts so that anchors land on their lines, within `max_rounds` rounds of
    /// shortening.
    pub fn realign(&mut self, max_rounds: usize) {
        if !self.blocks.iter().any(|block| block.line.is_some()) {
            return;
        }
        let mut stuck: FxHashSet<LayoutBlockId> = FxHashSet::default();
        for round in 0..max_rounds {
            self.expand_all();
            let Some(worst) = self
                .sections()
                .into_iter()
                .filter(|section| {
                    section.mismatch < 0 && !section.frozen && !stuck.contains(&section.anchor)
                })
                .max_by_key(|section| section.score)
            else {
                break;
            };
            log::trace!(
                "Layout round {round}: section ending at {:?} has {} lines too many",
                worst.anchor,
                -worst.mismatch
            );
            if !self.compact(&worst) && !self.relocate(&worst) {
                log::trace!("Section ending at {:?} can't be shortened", worst.anchor);
                stuck.insert(worst.anchor);
            }
        }
        self.expand_all();
    }

    fn sections(&self) -> Vec<Section> {
        let candidates: Vec<(usize, u32)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let block = &self[*id];
                if block.frozen { None } else { block.line.map(|line| (index, line)) }
            })
            .collect();

        let mut sections = Vec::new();
        let mut start = 0;
        let mut previous_line = 0u32;
        for index in increasing_anchors(&candidates) {
            let anchor = self.order[index];
            let Some(line) = self[anchor].line else {
                continue;
            };
            let range = start..index + 1;
            let mut current = 0i64;
            let mut deviation = 0u64;
            let mut frozen = false;
            for id in &self.order[range.clone()] {
                let block = &self[*id];
                current += i64::from(block.count);
                deviation += (i64::from(block.count) - i64::from(block.preferred))
                    .unsigned_abs()
                    .pow(2);
                frozen |= block.frozen;
            }
            let mismatch = i64::from(line) - i64::from(previous_line) - current;
            sections.push(Section {
                range,
                anchor,
                mismatch,
                score: deviation + MISMATCH_WEIGHT * mismatch.unsigned_abs().pow(2),
                frozen,
            });
            start = index + 1;
            previous_line = line;
        }
        sections
    }

    fn expand_all(&mut self) {
        for section in self.sections() {
            if section.mismatch > 0 && !section.frozen {
                self.expand(&section);
            }
        }
    }

    /// Adds the missing lines one at a time, each where it deviates least from the preferred
    /// counts. Separators take them first, then the blocks closest to the anchor.
    fn expand(&mut self, section: &Section) {
        let mut added = 0;
        for _ in 0..section.mismatch {
            let candidate = self.order[section.range.clone()]
                .iter()
                .enumerate()
                .filter(|(_, id)| {
                    let block = &self[**id];
                    !block.frozen && block.count < block.max
                })
                .min_by_key(|(offset, id)| {
                    let block = &self[**id];
                    let excess = i64::from(block.count) - i64::from(block.preferred);
                    (2 * excess + 1, block.tag != BlockTag::Separator, Reverse(*offset))
                })
                .map(|(_, id)| *id);
            let Some(id) = candidate else {
                break;
            };
            self[id].count += 1;
            added += 1;
        }
        self.stats.expanded_lines += added;
    }

    fn compact(&mut self, section: &Section) -> bool {
        let mut excess = section.mismatch.unsigned_abs();
        let mut removed = 0;
        while excess > 0 {
            let candidate = self.order[section.range.clone()]
                .iter()
                .enumerate()
                .filter(|(_, id)| {
                    let block = &self[**id];
                    !block.frozen && block.count > block.min
                })
                .min_by_key(|(offset, id)| {
                    let block = &self[**id];
                    (
                        block.compaction_priority(),
                        Reverse(block.count.saturating_sub(block.preferred)),
                        Reverse(*offset),
                    )
                })
                .map(|(_, id)| *id);
            let Some(id) = candidate else {
                break;
            };
            self[id].count -= 1;
            excess -= 1;
            removed += 1;
        }
        if removed == 0 {
            return false;
        }
        self.stats.compaction_rounds += 1;
        self.stats.compacted_lines += removed;
        true
    }

    fn index_of(&self, id: LayoutBlockId) -> Option<usize> {
        self.order.iter().position(|other| *other == id)
    }

    /// Where members moved to the end of the type enclosing `index` are inserted: the position of
    /// its closing brace.
    fn enclosing_type_end(&self, index: usize) -> Option<usize> {
        let mut depth = 0usize;
        for id in self.order[..index].iter().rev() {
            match self[*id].tag {
                BlockTag::MarkerEnd { .. } => depth += 1,
                BlockTag::MarkerStart { marker, other } if depth == 0 => {
                    if marker != Marker::Type {
                        return None;
                    }
                    let end = self.index_of(other)?;
                    let brace = end.checked_sub(1)?;
                    return matches!(self[self.order[brace]].tag, BlockTag::BlockEnd { .. })
                        .then_some(brace);
                }
                BlockTag::MarkerStart { .. } => depth -= 1,
                _ => {}
            }
        }
        None
    }

    /// Moves a member without anchors out of the section to the end of its class. Prefers the
    /// largest member that doesn't overshoot.
    fn relocate(&mut self, section: &Section) -> bool {
        let excess = section.mismatch.unsigned_abs();
        let mut best: Option<(Range<usize>, usize, u64)> = None;
        for start in section.range.clone() {
            let BlockTag::MarkerStart { other, .. } = self[self.order[start]].tag else {
                continue;
            };
            let Some(end) = self.index_of(other) else {
                continue;
            };
            if end + 1 >= section.range.end {
                continue;
            }
            let group = &self.order[start..end + 1];
            if group
                .iter()
                .any(|id| self[*id].line.is_some() || self[*id].frozen)
            {
                continue;
            }
            let Some(target) = self.enclosing_type_end(start) else {
                continue;
            };
            if target < section.range.end {
                continue;
            }
            let size: u64 = group.iter().map(|id| u64::from(self[*id].count)).sum();
            if size == 0 {
                continue;
            }
            let key = |size: u64| (size > excess, if size > excess { size } else { u64::MAX - size });
            if best.as_ref().is_none_or(|(_, _, best_size)| key(size) < key(*best_size)) {
                best = Some((start..end + 1, target, size));
            }
        }

        let Some((group, target, size)) = best else {
            return false;
        };
        log::trace!("Relocating {size} lines of a member to the end of its class");
        let moved: Vec<LayoutBlockId> = self.order.drain(group.clone()).collect();
        let target = target - moved.len();
        self.order.splice(target..target, moved);
        self.stats.relocation_rounds += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutBuilder, LayoutStats};
    use crate::structure::Sink;

    fn method(builder: &mut LayoutBuilder, header: &str, body: &[(&str, Option<u32>)]) {
        builder.begin(Marker::Method, 1);
        builder.open(format!("{header} {{"), None);
        for (text, line) in body {
            builder.line((*text).to_owned(), *line);
        }
        builder.close("}".to_owned());
        builder.end();
    }

    fn class(members: impl FnOnce(&mut LayoutBuilder)) -> Layout {
        let mut builder = LayoutBuilder::new();
        builder.begin(Marker::Type, 0);
        builder.open("class A {".to_owned(), None);
        members(&mut builder);
        builder.close("}".to_owned());
        builder.end();
        builder.finish()
    }

    #[test]
    fn longest_increasing_anchors() {
        let candidates = [(0, 5), (1, 2), (2, 3), (3, 9), (4, 4), (5, 6)];
        assert_eq!(increasing_anchors(&candidates), [1, 2, 4, 5]);
    }

    #[test]
    fn increasing_anchors_only_expand() {
        let mut layout = class(|builder| {
            method(builder, "void f()", &[("a();", Some(4)), ("b();", Some(7))]);
        });
        layout.realign(64);
        assert!(layout.is_aligned());
        assert_eq!(
            layout.stats,
            LayoutStats {
                expanded_lines: 2,
                ..LayoutStats::default()
            }
        );
        assert_eq!(
            layout.lines(),
            [
                "class A {",
                "",
                "    void f() {",
                "        a();",
                "",
                "",
                "        b();",
                "    }",
                "}",
            ]
        );
    }

    #[test]
    fn braces_join_lines_when_short_of_space() {
        let mut builder = LayoutBuilder::new();
        builder.open("void f() {".to_owned(), None);
        builder.line("a();".to_owned(), Some(2));
        builder.open("if (x) {".to_owned(), None);
        builder.line("b();".to_owned(), Some(3));
        builder.close("}".to_owned());
        builder.close("}".to_owned());
        let mut layout = builder.finish();
        layout.realign(64);
        assert!(layout.is_aligned());
        assert_eq!(layout.stats.compaction_rounds, 1);
        assert_eq!(layout.stats.compacted_lines, 1);
        assert_eq!(
            layout.lines(),
            ["void f() {", "    a(); if (x) {", "        b();", "    }", "}"]
        );
    }

    #[test]
    fn members_without_lines_move_out_of_the_way() {
        let mut layout = class(|builder| {
            method(builder, "void f()", &[("a();", Some(2))]);
            method(builder, "void g()", &[("c();", None), ("d();", None), ("e();", None)]);
            method(builder, "void h()", &[("b();", Some(5))]);
        });
        layout.realign(64);
        assert!(layout.is_aligned());
        assert_eq!(layout.stats.relocation_rounds, 1);
        let lines = layout.lines();
        let position = |needle: &str| lines.iter().position(|line| line.contains(needle));
        assert!(position("void h()") < position("void g()"));
        assert_eq!(lines.last().map(String::as_str), Some("}"));
    }

    #[test]
    fn frozen_sections_are_left_alone() {
        let mut builder = LayoutBuilder::new();
        builder.open("void f() {".to_owned(), None);
        builder.set_frozen(true);
        builder.line("0: iconst_0".to_owned(), None);
        builder.line("1: ireturn".to_owned(), None);
        builder.set_frozen(false);
        builder.line("g();".to_owned(), Some(2));
        builder.close("}".to_owned());
        let mut layout = builder.finish();
        let before = layout.lines();
        layout.realign(64);
        assert_eq!(layout.lines(), before);
        assert_eq!(layout.stats, LayoutStats::default());
    }
}
