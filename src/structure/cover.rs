// Range-add, leftmost-zero segment tree. Leaves are gaps between items: gap `g` sits right before
// item `g`.
use core::ops::Range;

pub struct CoverTracker {
    // 1-indexed; `nodes[1]` is the root.
    nodes: Vec<CoverNode>,
}

#[derive(Clone, Copy, Debug, Default)]
struct CoverNode {
    // Pending addition for every leaf below this node.
    added: isize,
    // Minimum over the subtree, including `added` but not the additions of ancestors.
    min: isize,
}

impl CoverTracker {
    pub fn new(len: usize) -> Self {
        Self {
            nodes: vec![CoverNode::default(); len.max(1).next_power_of_two() * 2],
        }
    }

    fn leaves(&self) -> usize {
        self.nodes.len() / 2
    }

    fn add(&mut self, range: Range<usize>, value: isize) {
        if range.is_empty() {
            return;
        }
        let leaves = self.leaves();
        let (mut left, mut right) = (leaves + range.start, leaves + range.end);
        while left < right {
            if left & 1 == 1 {
                self.nodes[left].added += value;
                self.nodes[left].min += value;
                left += 1;
            }
            if right & 1 == 1 {
                right -= 1;
                self.nodes[right].added += value;
                self.nodes[right].min += value;
            }
            left >>= 1;
            right >>= 1;
        }
        for leaf in [leaves + range.start, leaves + range.end - 1] {
            let mut v = leaf >> 1;
            while v >= 1 {
                let children = self.nodes[2 * v].min.min(self.nodes[2 * v + 1].min);
                self.nodes[v].min = self.nodes[v].added + children;
                v >>= 1;
            }
        }
    }

    /// Counts a segment over items `range` as covering every gap strictly inside it.
    pub fn insert(&mut self, range: Range<usize>) {
        self.add(range.start + 1..range.end, 1);
    }

    pub fn remove(&mut self, range: Range<usize>) {
        self.add(range.start + 1..range.end, -1);
    }

    /// The first gap strictly inside `range` that no segment covers.
    pub fn first_gap(&self, range: Range<usize>) -> Option<usize> {
        self.first_zero(range.start + 1..range.end)
    }

    fn first_zero(&self, range: Range<usize>) -> Option<usize> {
        if range.is_empty() {
            return None;
        }
        let leaves = self.leaves();
        let mut v = leaves + range.start;

        // Sum of `added` over the strict ancestors of `v`.
        let mut above: isize = 0;
        let mut parent = v >> 1;
        while parent >= 1 {
            above += self.nodes[parent].added;
            parent >>= 1;
        }

        // Walk right over maximal subtrees until one contains a zero.
        while above + self.nodes[v].min != 0 {
            while v & 1 == 1 {
                v >>= 1;
                above -= self.nodes[v].added;
            }
            if v == 0 {
                return None;
            }
            v += 1;
        }

        // Descend to its leftmost zero leaf.
        while v < leaves {
            above += self.nodes[v].added;
            v *= 2;
            if above + self.nodes[v].min != 0 {
                v += 1;
            }
        }

        let gap = v - leaves;
        (gap < range.end).then_some(gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gaps_appear_when_segments_leave() {
        let mut cover = CoverTracker::new(6);
        cover.insert(0..3);
        cover.insert(2..6);
        assert_eq!(cover.first_gap(0..6), None);
        cover.remove(2..6);
        assert_eq!(cover.first_gap(0..6), Some(3));
        assert_eq!(cover.first_gap(0..3), None);
        assert_eq!(cover.first_gap(2..3), None);
    }

    proptest! {
        #[test]
        fn matches_naive_counting(
            segments in prop::collection::vec((0usize..20, 0usize..20), 0..12),
            query in (0usize..20, 0usize..20),
        ) {
            let mut cover = CoverTracker::new(20);
            let mut counts = [0; 21];
            for (a, b) in segments {
                let (start, end) = (a.min(b), a.max(b));
                cover.insert(start..end);
                for gap in start + 1..end {
                    counts[gap] += 1;
                }
            }
            let (start, end) = (query.0.min(query.1), query.0.max(query.1));
            let expected = (start + 1..end).find(|gap| counts[*gap] == 0);
            prop_assert_eq!(cover.first_gap(start..end), expected);
        }
    }
}
