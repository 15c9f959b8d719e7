//! Sequencing of a decompiled class into lines.
//!
//! The output is first built as a flat list of blocks in declaration order. A block is a piece of
//! text (a statement, a brace, a case label) or a run of blank lines, and knows how many lines it
//! may take: a closing brace can be pulled onto the previous line, a statement can be pushed down
//! by blank lines. When the bytecode carried line numbers, [`Layout::realign`] then redistributes
//! the lines so that as many statements as possible land on their original line.
//!
//! Blocks live in an arena and are sequenced by a separate ordering vector, so moving a whole
//! member to another place is a splice of that vector.

mod ordering;
mod realign;

pub use ordering::{MemberOrder, order_members};

use crate::structure::Sink;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutBlockId(pub u32);

impl LayoutBlockId {
    const DANGLING: Self = Self(u32::MAX);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    Field,
    Method,
    Type,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    /// A statement or a declaration.
    Fragment,
    /// Blank lines between members.
    Separator,
    /// Opens a nested list. `other` is the matching end.
    BlockStart { other: LayoutBlockId, case_label: bool },
    BlockEnd { other: LayoutBlockId },
    /// Zero-line brackets around a member; the unit of relocation.
    MarkerStart { marker: Marker, other: LayoutBlockId },
    MarkerEnd { marker: Marker, other: LayoutBlockId },
}

/// The line count of a block that has no upper limit.
pub const UNBOUNDED: u32 = u32::MAX;

#[derive(Clone, Debug)]
pub struct LayoutBlock {
    pub tag: BlockTag,
    pub text: String,
    /// The original line number of the text, if known.
    pub line: Option<u32>,
    pub min: u32,
    pub preferred: u32,
    pub max: u32,
    /// Lines the block currently takes. `0` puts the text at the end of the previous line, more
    /// than `1` puts blank lines before it.
    pub count: u32,
    /// Part of a method that failed to decompile; never resized or moved.
    pub frozen: bool,
}

impl LayoutBlock {
    /// Order in which blocks give up lines when a section is too long. Lower goes first.
    pub fn compaction_priority(&self) -> u8 {
        if self.count > self.preferred {
            return 0;
        }
        match self.tag {
            BlockTag::Separator | BlockTag::Fragment => 0,
            BlockTag::BlockStart {
                case_label: true, ..
            } => 2,
            _ => 1,
        }
    }
}

/// What the realignment did, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutStats {
    pub relocation_rounds: usize,
    pub compaction_rounds: usize,
    pub expanded_lines: usize,
    pub compacted_lines: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Layout {
    pub blocks: Vec<LayoutBlock>,
    pub order: Vec<LayoutBlockId>,
    pub stats: LayoutStats,
}

impl core::ops::Index<LayoutBlockId> for Layout {
    type Output = LayoutBlock;

    fn index(&self, id: LayoutBlockId) -> &LayoutBlock {
        &self.blocks[id.0 as usize]
    }
}

impl core::ops::IndexMut<LayoutBlockId> for Layout {
    fn index_mut(&mut self, id: LayoutBlockId) -> &mut LayoutBlock {
        &mut self.blocks[id.0 as usize]
    }
}

impl Layout {
    /// The line each block of `order` ends on, 1-based. Blocks taking no lines report the line
    /// they are appended to, `0` before the first line.
    pub fn positions(&self) -> Vec<u32> {
        let mut line = 0u32;
        self.order
            .iter()
            .map(|id| {
                line = line.saturating_add(self[*id].count);
                line
            })
            .collect()
    }

    /// Whether every block with a known line sits on it.
    pub fn is_aligned(&self) -> bool {
        self.order
            .iter()
            .zip(self.positions())
            .all(|(id, position)| self[*id].line.is_none_or(|line| line == position))
    }

    /// Renders the blocks with four-space indentation.
    pub fn lines(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut depth = 0usize;
        for id in &self.order {
            let block = &self[*id];
            if let BlockTag::BlockEnd { .. } = block.tag {
                depth = depth.saturating_sub(1);
            }
            if block.text.is_empty() {
                out.extend((0..block.count).map(|_| String::new()));
            } else if block.count == 0 && !out.is_empty() {
                if let Some(last) = out.last_mut() {
                    last.push(' ');
                    last.push_str(&block.text);
                }
            } else {
                out.extend((1..block.count).map(|_| String::new()));
                out.push(format!("{}{}", "    ".repeat(depth), block.text));
            }
            if let BlockTag::BlockStart { .. } = block.tag {
                depth += 1;
            }
        }
        out
    }
}

/// Assembles a [`Layout`]. Statement trees are fed in through [`Sink`].
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    layout: Layout,
    open_blocks: Vec<LayoutBlockId>,
    open_markers: Vec<LayoutBlockId>,
    frozen: bool,
    has_text: bool,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        tag: BlockTag,
        text: String,
        line: Option<u32>,
        (min, preferred, max): (u32, u32, u32),
    ) -> LayoutBlockId {
        let id = LayoutBlockId(self.layout.blocks.len() as u32);
        let (min, max) = if self.frozen { (preferred, preferred) } else { (min, max) };
        self.layout.blocks.push(LayoutBlock {
            tag,
            text,
            line: if self.frozen { None } else { line },
            min,
            preferred,
            max,
            count: preferred,
            frozen: self.frozen,
        });
        self.layout.order.push(id);
        id
    }

    /// Text blocks may take blank lines before them. Block headers may also be appended to the
    /// previous line, unless there is none.
    fn text_bounds(&mut self, joinable: bool) -> (u32, u32, u32) {
        let min = u32::from(!(joinable && self.has_text));
        self.has_text = true;
        (min, 1, UNBOUNDED)
    }

    /// Blocks added until the next call are part of a method that failed to decompile.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// Starts a member. `blank_lines` is the preferred number of blank lines before it.
    pub fn begin(&mut self, marker: Marker, blank_lines: u32) {
        let id = self.push(
            BlockTag::MarkerStart {
                marker,
                other: LayoutBlockId::DANGLING,
            },
            String::new(),
            None,
            (0, 0, 0),
        );
        self.open_markers.push(id);
        self.push(BlockTag::Separator, String::new(), None, (0, blank_lines, UNBOUNDED));
    }

    pub fn end(&mut self) {
        let Some(start) = self.open_markers.pop() else {
            log::debug!("Unbalanced member end in layout");
            return;
        };
        let BlockTag::MarkerStart { marker, .. } = self.layout[start].tag else {
            return;
        };
        let end = self.push(BlockTag::MarkerEnd { marker, other: start }, String::new(), None, (0, 0, 0));
        self.layout[start].tag = BlockTag::MarkerStart { marker, other: end };
    }

    pub fn finish(mut self) -> Layout {
        while !self.open_blocks.is_empty() {
            self.close(String::new());
        }
        while !self.open_markers.is_empty() {
            self.end();
        }
        self.layout
    }
}

fn is_case_label(text: &str) -> bool {
    text.starts_with("case ") || text.starts_with("default:")
}

impl Sink for LayoutBuilder {
    fn line(&mut self, text: String, line: Option<u32>) {
        let bounds = self.text_bounds(false);
        self.push(BlockTag::Fragment, text, line, bounds);
    }

    fn open(&mut self, text: String, line: Option<u32>) {
        let bounds = if text.is_empty() {
            (0, 0, 0)
        } else {
            self.text_bounds(true)
        };
        let case_label = is_case_label(&text);
        let id = self.push(
            BlockTag::BlockStart {
                other: LayoutBlockId::DANGLING,
                case_label,
            },
            text,
            line,
            bounds,
        );
        self.open_blocks.push(id);
    }

    fn close(&mut self, text: String) {
        let Some(start) = self.open_blocks.pop() else {
            log::debug!("Unbalanced block end in layout");
            return;
        };
        let bounds = if text.is_empty() { (0, 0, 0) } else { (0, 1, 1) };
        let end = self.push(BlockTag::BlockEnd { other: start }, text, None, bounds);
        if let BlockTag::BlockStart { case_label, .. } = self.layout[start].tag {
            self.layout[start].tag = BlockTag::BlockStart { other: end, case_label };
        }
    }

    /// The text goes on the start of the next list; the end of the previous one takes no lines.
    fn reopen(&mut self, text: String, line: Option<u32>) {
        self.close(String::new());
        let bounds = if line.is_some() {
            self.text_bounds(true)
        } else {
            (0, 1, 1)
        };
        let id = self.push(
            BlockTag::BlockStart {
                other: LayoutBlockId::DANGLING,
                case_label: false,
            },
            text,
            line,
            bounds,
        );
        self.open_blocks.push(id);
    }
}
