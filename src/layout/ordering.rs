//! Order of the members of a class.
//!
//! Members whose first line is known are sorted by it. The ones without a line (abstract methods,
//! fields without initializers) follow the neighbour they are declared next to, in the direction
//! the compiler wrote the class file in.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberOrder {
    /// The class file lists members in source order.
    Ascending,
    /// The class file lists members in reverse source order.
    Descending,
    /// No reliable majority either way.
    Declaration,
}

impl MemberOrder {
    pub fn detect(lines: &[Option<u32>]) -> Self {
        let known: Vec<u32> = lines.iter().flatten().copied().collect();
        let (mut ascending, mut descending) = (0usize, 0usize);
        for pair in known.windows(2) {
            if pair[0] < pair[1] {
                ascending += 1;
            } else if pair[0] > pair[1] {
                descending += 1;
            }
        }
        if ascending > 2 * descending {
            Self::Ascending
        } else if descending > 2 * ascending {
            Self::Descending
        } else {
            Self::Declaration
        }
    }
}

/// A permutation of `0..lines.len()` giving the display order of the members.
pub fn order_members(lines: &[Option<u32>]) -> Vec<usize> {
    let order = MemberOrder::detect(lines);
    let mut indices: Vec<usize> = (0..lines.len()).collect();
    match order {
        MemberOrder::Declaration => return indices,
        MemberOrder::Descending => indices.reverse(),
        MemberOrder::Ascending => {}
    }

    // Each member with a line leads a run of the unknown ones after it. Members before the first
    // known one stay in front.
    let mut runs: Vec<(Option<u32>, Vec<usize>)> = Vec::new();
    for index in indices {
        if lines[index].is_none()
            && let Some((_, run)) = runs.last_mut()
        {
            run.push(index);
        } else {
            runs.push((lines[index], vec![index]));
        }
    }
    runs.sort_by_key(|(line, _)| line.unwrap_or(0));
    runs.into_iter().flat_map(|(_, run)| run).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_members_follow_their_neighbour() {
        let lines = [Some(10), None, Some(3), Some(20), None];
        assert_eq!(MemberOrder::detect(&lines), MemberOrder::Declaration);
        assert_eq!(order_members(&lines), [0, 1, 2, 3, 4]);

        let lines = [Some(3), Some(8), None, Some(5), Some(12), Some(30)];
        assert_eq!(MemberOrder::detect(&lines), MemberOrder::Ascending);
        assert_eq!(order_members(&lines), [0, 3, 1, 2, 4, 5]);
    }

    #[test]
    fn reverse_class_files() {
        let lines = [Some(30), None, Some(20), Some(10)];
        assert_eq!(MemberOrder::detect(&lines), MemberOrder::Descending);
        assert_eq!(order_members(&lines), [3, 2, 1, 0]);
    }

    #[test]
    fn leading_unknown_members_stay_first() {
        let lines = [None, Some(9), Some(4), Some(12), Some(15), Some(18)];
        assert_eq!(order_members(&lines), [0, 2, 1, 3, 4, 5]);
    }
}
