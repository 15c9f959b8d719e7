//! Rewrites the raw block tree into ordinary control flow.
//!
//! The rewrites run to a fixpoint, bottom-up:
//!
//! - A `break`/`continue` that goes exactly where falling off the end of its list would go is
//!   dropped.
//! - Blocks nothing breaks out of are spliced into their parent.
//! - `if (c) { ...; jump } rest`, where `jump` ends up after `rest` anyway, becomes
//!   `if (c) { ... } else { rest }`, or `if (!c) { rest }` when there is nothing before the jump.
//! - `while (true)` loops testing their exit condition first or last become `while`/`do-while`.

use super::statement::{Label, Statement, StatementKind, breaks_from};
use crate::ir::Arena;

/// Where falling off the end of a list goes, as jumps that would do the same.
#[derive(Clone, Debug, Default)]
struct Tail {
    breaks: Vec<Label>,
    continues: Vec<Label>,
}

impl Tail {
    fn with_break(&self, label: Label) -> Self {
        let mut tail = self.clone();
        tail.breaks.push(label);
        tail
    }

    fn looping(label: Option<Label>) -> Self {
        Self {
            breaks: Vec::new(),
            continues: label.into_iter().collect(),
        }
    }

    fn absorbs(&self, stmt: &Statement) -> bool {
        match stmt.kind {
            StatementKind::Break(Some(label)) => self.breaks.contains(&label),
            StatementKind::Continue(Some(label)) => self.continues.contains(&label),
            _ => false,
        }
    }
}

pub fn simplify(arena: &mut Arena, stmts: &mut Vec<Statement>, max_rounds: usize) {
    for round in 0..max_rounds.max(1) {
        if !simplify_list(arena, stmts, &Tail::default()) {
            log::trace!("Control flow simplified in {round} rounds");
            return;
        }
    }
}

/// Returns whether anything changed.
fn simplify_list(arena: &mut Arena, list: &mut Vec<Statement>, tail: &Tail) -> bool {
    let mut changed = false;
    let len = list.len();
    for (index, stmt) in list.iter_mut().enumerate() {
        let outer = if index + 1 == len {
            tail.clone()
        } else {
            Tail::default()
        };
        changed |= simplify_children(arena, stmt, &outer);
    }

    while list.last().is_some_and(|stmt| tail.absorbs(stmt)) {
        list.pop();
        changed = true;
    }

    changed |= inline_unused_blocks(list);
    changed |= absorb_rest(arena, list, tail);

    for index in 0..list.len() {
        let exits = if index + 1 == list.len() {
            tail.breaks.clone()
        } else {
            Vec::new()
        };
        changed |= classify_loop(arena, &mut list[index], &exits);
    }
    changed
}

fn simplify_children(arena: &mut Arena, stmt: &mut Statement, outer: &Tail) -> bool {
    match &mut stmt.kind {
        StatementKind::Block { label, body } => {
            let tail = outer.with_break(*label);
            simplify_list(arena, body, &tail)
        }
        StatementKind::Loop { label, body }
        | StatementKind::While { label, body, .. }
        | StatementKind::DoWhile { label, body, .. }
        | StatementKind::ForEach { label, body, .. }
        | StatementKind::For { label, body, .. } => {
            // Falling off the body and `continue` are the same.
            simplify_list(arena, body, &Tail::looping(*label))
        }
        StatementKind::If {
            then, otherwise, ..
        } => {
            let a = simplify_list(arena, then, outer);
            let b = simplify_list(arena, otherwise, outer);
            a || b
        }
        StatementKind::Switch { label, cases, .. } => {
            let mut changed = false;
            let count = cases.len();
            for (i, case) in cases.iter_mut().enumerate() {
                let tail = match label {
                    Some(label) if i + 1 == count => outer.with_break(*label),
                    _ if i + 1 == count => outer.clone(),
                    _ => Tail::default(),
                };
                changed |= simplify_list(arena, &mut case.body, &tail);
            }
            changed
        }
        StatementKind::Try {
            body,
            catches,
            finally,
            ..
        } => {
            let mut changed = simplify_list(arena, body, outer);
            for catch in catches {
                changed |= simplify_list(arena, &mut catch.body, outer);
            }
            if let Some(finally) = finally {
                changed |= simplify_list(arena, finally, &Tail::default());
            }
            changed
        }
        StatementKind::Synchronized { body, .. } => simplify_list(arena, body, outer),
        _ => false,
    }
}

fn inline_unused_blocks(list: &mut Vec<Statement>) -> bool {
    let unused = |stmt: &Statement| match &stmt.kind {
        StatementKind::Block { label, body } => !breaks_from(body, *label, false),
        _ => false,
    };
    if !list.iter().any(unused) {
        return false;
    }
    let old = core::mem::take(list);
    for stmt in old {
        if unused(&stmt) {
            if let StatementKind::Block { body, .. } = stmt.kind {
                list.extend(body);
            }
        } else {
            list.push(stmt);
        }
    }
    true
}

/// The `if` rewrite, applied to the first `if` that qualifies.
fn absorb_rest(arena: &mut Arena, list: &mut Vec<Statement>, tail: &Tail) -> bool {
    for index in 0..list.len().saturating_sub(1) {
        let StatementKind::If {
            condition,
            then,
            otherwise,
        } = &list[index].kind
        else {
            continue;
        };
        if !otherwise.is_empty() || !then.last().is_some_and(|last| tail.absorbs(last)) {
            continue;
        }
        let negated = (then.len() == 1).then(|| arena.negate(*condition));
        let rest = list.split_off(index + 1);
        if let StatementKind::If {
            condition,
            then,
            otherwise,
        } = &mut list[index].kind
        {
            match negated {
                // `if (c) break; rest` is `if (!c) { rest }`.
                Some(negated) => {
                    *otherwise = core::mem::replace(then, rest);
                    *condition = negated;
                }
                None => *otherwise = rest,
            }
        }
        return true;
    }
    false
}

/// Turns `while (true)` into `while (c)` or `do { } while (c)` if it tests at the top or the
/// bottom. `exits` are labels whose `break` is equivalent to leaving the loop.
fn classify_loop(arena: &mut Arena, stmt: &mut Statement, exits: &[Label]) -> bool {
    let StatementKind::Loop {
        label: Some(label),
        body,
    } = &mut stmt.kind
    else {
        return false;
    };
    let label = *label;
    let leaves = |stmt: &Statement| match &stmt.kind {
        StatementKind::Break(Some(target)) => *target == label || exits.contains(target),
        _ => false,
    };
    let exit_test = |stmt: &Statement| match &stmt.kind {
        StatementKind::If {
            condition,
            then,
            otherwise,
        } if otherwise.is_empty() && then.len() == 1 && leaves(&then[0]) => Some(*condition),
        _ => None,
    };

    if let Some(condition) = body.first().and_then(|first| exit_test(first)) {
        let mut body = core::mem::take(body);
        body.remove(0);
        for exit in exits {
            relabel_breaks(&mut body, *exit, label);
        }
        let condition = arena.negate(condition);
        stmt.kind = StatementKind::While {
            label: Some(label),
            condition,
            body,
        };
        return true;
    }

    // `do { ... } while (c)` leaves the loop when the condition fails. A `continue` in the body
    // would skip the test, so there must be none.
    let bottom = match body.as_slice() {
        [.., test, last] if leaves(last) => match &test.kind {
            StatementKind::If {
                condition,
                then,
                otherwise,
            } if otherwise.is_empty()
                && matches!(then.as_slice(), [Statement { kind: StatementKind::Continue(Some(target)), .. }] if *target == label) =>
            {
                Some((*condition, 2, false))
            }
            _ => None,
        },
        [.., last] => exit_test(last).map(|condition| (condition, 1, true)),
        _ => None,
    };
    let Some((condition, drop, negate)) = bottom else {
        return false;
    };
    let kept = body.len() - drop;
    if continues_to(&body[..kept], label) {
        return false;
    }
    let mut body = core::mem::take(body);
    body.truncate(kept);
    for exit in exits {
        relabel_breaks(&mut body, *exit, label);
    }
    let condition = if negate {
        arena.negate(condition)
    } else {
        condition
    };
    stmt.kind = StatementKind::DoWhile {
        label: Some(label),
        body,
        condition,
    };
    true
}

pub(super) fn continues_to(list: &[Statement], label: Label) -> bool {
    list.iter().any(|stmt| match &stmt.kind {
        StatementKind::Continue(Some(target)) | StatementKind::IfContinue { label: Some(target), .. } => {
            *target == label
        }
        _ => stmt.lists().into_iter().any(|list| continues_to(list, label)),
    })
}

/// Points `break from` at `to` instead.
pub(super) fn relabel_breaks(list: &mut [Statement], from: Label, to: Label) {
    if from == to {
        return;
    }
    for stmt in list {
        match &mut stmt.kind {
            StatementKind::Break(Some(target)) | StatementKind::IfBreak { label: Some(target), .. }
                if *target == from =>
            {
                *target = to;
            }
            _ => {
                for list in stmt.lists_mut() {
                    relabel_breaks(list, from, to);
                }
            }
        }
    }
}
