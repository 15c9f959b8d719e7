//! Final pass over labels.
//!
//! Jumps to the innermost enclosing loop or `switch` lose their label, labels nothing names any
//! more are dropped, and the ones left are numbered in reading order.

use super::statement::{Label, Statement, StatementKind};
use rustc_hash::{FxHashMap, FxHashSet};

pub fn finalize(stmts: &mut Vec<Statement>) {
    fold_conditional_jumps(stmts);
    drop_implicit(stmts, &mut Vec::new());
    let mut used = FxHashSet::default();
    collect_used(stmts, &mut used);
    drop_unused(stmts, &used);
    let mut numbering = FxHashMap::default();
    renumber(stmts, &mut numbering);
}

/// `if (c) { break; }` is `if (c) break;`.
fn fold_conditional_jumps(list: &mut [Statement]) {
    for stmt in list {
        for nested in stmt.lists_mut() {
            fold_conditional_jumps(nested);
        }
        let StatementKind::If {
            condition,
            then,
            otherwise,
        } = &stmt.kind
        else {
            continue;
        };
        if !otherwise.is_empty() {
            continue;
        }
        let condition = *condition;
        stmt.kind = match then.as_slice() {
            [Statement {
                kind: StatementKind::Break(label),
                ..
            }] => StatementKind::IfBreak {
                condition,
                label: *label,
            },
            [Statement {
                kind: StatementKind::Continue(label),
                ..
            }] => StatementKind::IfContinue {
                condition,
                label: *label,
            },
            _ => continue,
        };
    }
}

/// `breakables` holds the labels of the enclosing loops and switches, innermost last, and whether
/// each is a loop.
fn drop_implicit(list: &mut [Statement], breakables: &mut Vec<(Option<Label>, bool)>) {
    for stmt in list {
        let innermost = breakables.last().map(|(label, _)| *label);
        let innermost_loop = breakables
            .iter()
            .rev()
            .find(|(_, is_loop)| *is_loop)
            .map(|(label, _)| *label);
        match &mut stmt.kind {
            StatementKind::Break(label) | StatementKind::IfBreak { label, .. } => {
                if label.is_some() && innermost == Some(*label) {
                    *label = None;
                }
            }
            StatementKind::Continue(label) | StatementKind::IfContinue { label, .. } => {
                if label.is_some() && innermost_loop == Some(*label) {
                    *label = None;
                }
            }
            _ => {}
        }

        let pushed = stmt.is_breakable();
        if pushed {
            breakables.push((stmt.breakable_label(), stmt.is_loop()));
        }
        for nested in stmt.lists_mut() {
            drop_implicit(nested, breakables);
        }
        if pushed {
            breakables.pop();
        }
    }
}

fn collect_used(list: &[Statement], used: &mut FxHashSet<Label>) {
    for stmt in list {
        match stmt.kind {
            StatementKind::Break(Some(label))
            | StatementKind::Continue(Some(label))
            | StatementKind::IfBreak {
                label: Some(label),
                ..
            }
            | StatementKind::IfContinue {
                label: Some(label),
                ..
            }
            | StatementKind::Goto(label) => {
                used.insert(label);
            }
            _ => {}
        }
        for nested in stmt.lists() {
            collect_used(nested, used);
        }
    }
}

fn drop_unused(list: &mut Vec<Statement>, used: &FxHashSet<Label>) {
    let old = core::mem::take(list);
    for mut stmt in old {
        if let Some(label) = stmt.breakable_label_mut()
            && label.is_some_and(|label| !used.contains(&label))
        {
            *label = None;
        }
        match stmt.kind {
            StatementKind::Block { label, body } if !used.contains(&label) => {
                let mut body = body;
                drop_unused(&mut body, used);
                list.extend(body);
            }
            StatementKind::Label(label) if !used.contains(&label) => {}
            _ => {
                for nested in stmt.lists_mut() {
                    drop_unused(nested, used);
                }
                list.push(stmt);
            }
        }
    }
}

fn number(label: &mut Label, numbering: &mut FxHashMap<Label, Label>) {
    let next = Label(numbering.len() as u32 + 1);
    *label = *numbering.entry(*label).or_insert(next);
}

fn renumber(list: &mut [Statement], numbering: &mut FxHashMap<Label, Label>) {
    for stmt in list.iter_mut() {
        match &mut stmt.kind {
            StatementKind::Block { label, .. }
            | StatementKind::Label(label)
            | StatementKind::Goto(label)
            | StatementKind::Break(Some(label))
            | StatementKind::Continue(Some(label))
            | StatementKind::IfBreak {
                label: Some(label),
                ..
            }
            | StatementKind::IfContinue {
                label: Some(label),
                ..
            } => number(label, numbering),
            _ => {
                if let Some(Some(label)) = stmt.breakable_label_mut() {
                    number(label, numbering);
                }
            }
        }
        for nested in stmt.lists_mut() {
            renumber(nested, numbering);
        }
    }
}
