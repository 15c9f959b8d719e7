//! Turning jumps between the items of a list into properly nested blocks.
//!
//! A forward jump from item `p` to item `q` needs a block that contains `p` and ends right before
//! `q`, so that the jump can be a `break`. A backward jump needs a loop that starts at `q` and
//! contains `p`, so that it can be a `continue`. The ends of such blocks that are not pinned by
//! the jump can be extended freely, which leaves a lot of room for nesting.
//!
//! The tree is built top-down. At each level the list is split at the gaps no requirement covers;
//! each piece then gets one block satisfying every requirement pinned to its edges, which in turn
//! uncovers new gaps inside. A piece where no requirement is pinned to an edge can only arise from
//! a forward and a backward jump crossing head-to-head:
//!
//! ```text
//!     ----->        the head of this arrow cannot be moved
//!        <------    and neither can the head of this one
//! ```
//!
//! Such backward jumps are given up on and lowered to a `goto`.

use super::cover::CoverTracker;
use super::statement::Label;
use core::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Item(usize),
    Block {
        label: Label,
        /// Whether some backward jump continues this block.
        is_loop: bool,
        range: Range<usize>,
        children: Vec<Node>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Jump {
    pub from: usize,
    pub to: usize,
}

impl Jump {
    fn is_forward(&self) -> bool {
        self.from < self.to
    }

    /// Items the implementing block must span, at minimum.
    fn range(&self) -> Range<usize> {
        if self.is_forward() {
            self.from..self.to
        } else {
            self.to..self.from + 1
        }
    }
}

/// Nests blocks over `len` items so that every jump that can be structured is. Jumps given up on
/// are reported by index.
pub fn nest(len: usize, jumps: &[Jump], next_label: &mut u32) -> (Vec<Node>, Vec<usize>) {
    let mut nester = Nester {
        jumps,
        done: vec![false; jumps.len()],
        cover: CoverTracker::new(len + 1),
        forward_cover: CoverTracker::new(len + 1),
        backward_to: vec![Vec::new(); len + 1],
        forward_to: vec![Vec::new(); len + 1],
        next_label,
        abandoned: Vec::new(),
    };
    for (id, jump) in jumps.iter().enumerate() {
        nester.cover.insert(jump.range());
        if jump.is_forward() {
            nester.forward_to[jump.to].push(id);
            nester.forward_cover.insert(jump.range());
        } else {
            nester.backward_to[jump.to].push(id);
        }
    }
    let tree = nester.build_list(0..len);
    (tree, nester.abandoned)
}

struct Nester<'a> {
    jumps: &'a [Jump],
    done: Vec<bool>,
    cover: CoverTracker,
    forward_cover: CoverTracker,
    backward_to: Vec<Vec<usize>>,
    forward_to: Vec<Vec<usize>>,
    next_label: &'a mut u32,
    abandoned: Vec<usize>,
}

impl Nester<'_> {
    fn build_list(&mut self, range: Range<usize>) -> Vec<Node> {
        let mut nodes = Vec::new();
        let mut start = range.start;
        while let Some(gap) = self.cover.first_gap(start..range.end) {
            self.build_piece(start..gap, &mut nodes);
            start = gap;
        }
        if start < range.end {
            self.build_piece(start..range.end, &mut nodes);
        }
        nodes
    }

    fn satisfy(&mut self, id: usize) {
        let jump = self.jumps[id];
        self.done[id] = true;
        self.cover.remove(jump.range());
        if jump.is_forward() {
            self.forward_cover.remove(jump.range());
        }
    }

    /// Handles a piece no requirement strictly crosses the edges of.
    fn build_piece(&mut self, range: Range<usize>, out: &mut Vec<Node>) {
        let mut is_loop = false;
        let mut found = false;
        for id in core::mem::take(&mut self.backward_to[range.start]) {
            if !self.done[id] {
                self.satisfy(id);
                is_loop = true;
                found = true;
            }
        }
        for id in core::mem::take(&mut self.forward_to[range.end]) {
            if !self.done[id] {
                self.satisfy(id);
                found = true;
            }
        }

        if found {
            let label = Label(*self.next_label);
            *self.next_label += 1;
            out.push(Node::Block {
                label,
                is_loop,
                range: range.clone(),
                children: self.build_list(range),
            });
            return;
        }

        if range.len() == 1 {
            out.push(Node::Item(range.start));
            return;
        }

        // Head-to-head collision. Backward jumps spanning the first gap no forward jump covers are
        // the ones in the way.
        let mut abandoned = false;
        if let Some(gap) = self.forward_cover.first_gap(range.clone()) {
            for id in 0..self.jumps.len() {
                let jump = self.jumps[id];
                if !self.done[id] && !jump.is_forward() && jump.to < gap && gap <= jump.from {
                    self.abandon(id);
                    abandoned = true;
                }
            }
        }
        if !abandoned {
            // Whatever still covers this piece.
            for id in 0..self.jumps.len() {
                let jump = self.jumps[id].range();
                if !self.done[id] && jump.start < range.end && range.start < jump.end {
                    self.abandon(id);
                }
            }
        }
        log::debug!("Nesting collision over items {range:?}, lowering jumps as goto");
        out.extend(self.build_list(range));
    }

    fn abandon(&mut self, id: usize) {
        self.satisfy(id);
        self.abandoned.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(nodes: &[Node]) -> String {
        nodes
            .iter()
            .map(|node| match node {
                Node::Item(index) => index.to_string(),
                Node::Block {
                    is_loop, children, ..
                } => {
                    let kind = if *is_loop { "loop" } else { "block" };
                    format!("{kind}[{}]", shape(children))
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn if_else() {
        // 0: if (c) goto 3; 1: a; 2: goto 4; 3: b; 4: end
        let jumps = [Jump { from: 0, to: 3 }, Jump { from: 2, to: 4 }];
        let (tree, abandoned) = nest(5, &jumps, &mut 0);
        assert!(abandoned.is_empty());
        assert_eq!(shape(&tree), "block[block[0 1 2] 3] 4");
    }

    #[test]
    fn while_loop() {
        // 0: if (!c) goto 3; 1: body; 2: goto 0; 3: after
        let jumps = [Jump { from: 0, to: 3 }, Jump { from: 2, to: 0 }];
        let (tree, abandoned) = nest(4, &jumps, &mut 0);
        assert!(abandoned.is_empty());
        assert_eq!(shape(&tree), "loop[0 1 2] 3");
    }

    #[test]
    fn self_loop() {
        let jumps = [Jump { from: 1, to: 1 }];
        let (tree, _) = nest(3, &jumps, &mut 0);
        assert_eq!(shape(&tree), "0 loop[1] 2");
    }

    #[test]
    fn crossing_jumps_fall_back() {
        // 0: goto 2; 1: a; 2: b; 3: if (c) goto 1; 4: end
        let jumps = [Jump { from: 0, to: 2 }, Jump { from: 3, to: 1 }];
        let (tree, abandoned) = nest(5, &jumps, &mut 0);
        assert_eq!(abandoned, [1]);
        assert_eq!(shape(&tree), "block[0 1] 2 3 4");
    }
}
