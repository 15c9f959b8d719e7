//! Places local variable declarations.
//!
//! A variable is declared in the innermost statement list that contains all of its uses, right at
//! the first of them. The declaration moves further down into a nested list only when that list
//! writes the variable before anything reads it, so that no value flows in from outside.

use super::statement::{Statement, StatementKind};
use crate::ir::{Arena, Expr, ExprId, StmtKind, VarId};
use crate::locals::LocalFlags;
use rustc_hash::{FxHashMap, FxHashSet};

pub fn place(arena: &Arena, stmts: &mut Vec<Statement>) {
    let mut bound = FxHashSet::default();
    collect_bound(stmts, &mut bound);
    let implicit = LocalFlags::PARAMETER | LocalFlags::THIS | LocalFlags::EXCEPTION | LocalFlags::OUTER_THIS;
    let vars = arena
        .locals
        .iter()
        .enumerate()
        .map(|(index, local)| (VarId(index as u32), local))
        .filter(|(var, local)| !local.flags.intersects(implicit) && !bound.contains(var))
        .map(|(var, _)| var)
        .collect();
    place_in(arena, stmts, vars);
}

/// Variables declared by the statement syntax itself.
fn collect_bound(list: &[Statement], bound: &mut FxHashSet<VarId>) {
    for stmt in list {
        match &stmt.kind {
            StatementKind::ForEach { var, .. } | StatementKind::Declare { var, .. } => {
                bound.insert(*var);
            }
            StatementKind::Try {
                resources, catches, ..
            } => {
                bound.extend(resources.iter().map(|resource| resource.var));
                bound.extend(catches.iter().map(|catch| catch.var));
            }
            _ => {}
        }
        for nested in stmt.lists() {
            collect_bound(nested, bound);
        }
    }
}

fn uses_directly(arena: &Arena, stmt: &Statement, var: VarId) -> bool {
    stmt.exprs().into_iter().any(|root| arena.uses_var(root, var))
}

fn mentions(arena: &Arena, stmt: &Statement, var: VarId) -> bool {
    uses_directly(arena, stmt, var)
        || stmt
            .lists()
            .into_iter()
            .any(|list| list.iter().any(|stmt| mentions(arena, stmt, var)))
}

/// `var = value` not reading `var`.
fn initializer(arena: &Arena, stmt: &Statement, var: VarId) -> Option<ExprId> {
    match stmt.kind {
        StatementKind::Basic(StmtKind::Assign { target, value })
            if matches!(arena[target], Expr::Var(written) if written == var)
                && !arena.uses_var(value, var) =>
        {
            Some(value)
        }
        _ => None,
    }
}

enum Placement {
    Here,
    /// Into the `k`th nested list of the statement.
    Nested(usize),
    /// As the `for` initializer.
    ForInit,
}

fn placement(arena: &Arena, stmt: &Statement, var: VarId) -> Placement {
    if let StatementKind::For { init, .. } = &stmt.kind
        && init.first().and_then(|first| initializer(arena, first, var)).is_some()
    {
        return Placement::ForInit;
    }
    if uses_directly(arena, stmt, var) {
        return Placement::Here;
    }
    let lists = stmt.lists();
    let mut using = lists
        .iter()
        .enumerate()
        .filter(|(_, list)| list.iter().any(|stmt| mentions(arena, stmt, var)));
    let (Some((k, list)), None) = (using.next(), using.next()) else {
        return Placement::Here;
    };
    let first = list.iter().find(|stmt| mentions(arena, stmt, var));
    if first.is_some_and(|first| initializer(arena, first, var).is_some()) {
        Placement::Nested(k)
    } else {
        Placement::Here
    }
}

fn place_in(arena: &Arena, list: &mut Vec<Statement>, vars: Vec<VarId>) {
    let mut nested: FxHashMap<(usize, usize), Vec<VarId>> = FxHashMap::default();
    let mut here = Vec::new();
    for var in vars {
        let mut users = list
            .iter()
            .enumerate()
            .filter(|(_, stmt)| mentions(arena, stmt, var))
            .map(|(index, _)| index);
        match (users.next(), users.next()) {
            (None, _) => {}
            (Some(index), None) => match placement(arena, &list[index], var) {
                Placement::Here => here.push(var),
                Placement::Nested(k) => nested.entry((index, k)).or_default().push(var),
                Placement::ForInit => {
                    if let StatementKind::For { init, .. } = &mut list[index].kind
                        && let Some(first) = init.first_mut()
                        && let Some(value) = initializer(arena, first, var)
                    {
                        first.kind = StatementKind::Declare {
                            var,
                            value: Some(value),
                        };
                    }
                }
            },
            _ => here.push(var),
        }
    }

    for ((index, k), vars) in nested {
        if let Some(child) = list[index].lists_mut().into_iter().nth(k) {
            place_in(arena, child, vars);
        }
    }

    for var in here {
        let Some(index) = list.iter().position(|stmt| mentions(arena, stmt, var)) else {
            continue;
        };
        match initializer(arena, &list[index], var) {
            Some(value) => {
                list[index].kind = StatementKind::Declare {
                    var,
                    value: Some(value),
                };
            }
            None => list.insert(index, Statement::new(None, StatementKind::Declare { var, value: None })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Type;
    use crate::locals::{LocalVariable, VarType};
    use crate::structure::statement::render;

    fn local(arena: &mut Arena, name: &str) -> VarId {
        arena.locals.push(LocalVariable {
            slot: Some(arena.locals.len() as u16),
            start: 0,
            length: 0,
            ty: VarType::Resolved(Type::INT),
            name: name.to_owned(),
            flags: LocalFlags::empty(),
        });
        VarId(arena.locals.len() as u32 - 1)
    }

    fn assign(arena: &mut Arena, var: VarId, value: i32) -> Statement {
        let target = arena.alloc(Expr::Var(var));
        let value = arena.int(value);
        Statement::new(None, StatementKind::Basic(StmtKind::Assign { target, value }))
    }

    fn print(arena: &mut Arena, var: VarId) -> Statement {
        let value = arena.alloc(Expr::Var(var));
        Statement::new(None, StatementKind::Basic(StmtKind::Return(Some(value))))
    }

    #[test]
    fn declared_at_first_assignment() {
        let mut arena = Arena::new("Test");
        let x = local(&mut arena, "x");
        let mut stmts = vec![assign(&mut arena, x, 1), print(&mut arena, x)];
        place(&arena, &mut stmts);
        assert_eq!(render(&arena, &stmts), ["int x = 1;", "return x;"]);
    }

    #[test]
    fn branches_sharing_a_variable() {
        // if (c) x = 1; else x = 2; return x;
        let mut arena = Arena::new("Test");
        let x = local(&mut arena, "x");
        let condition = arena.alloc(Expr::Bool(true));
        let then = vec![assign(&mut arena, x, 1)];
        let otherwise = vec![assign(&mut arena, x, 2)];
        let mut stmts = vec![
            Statement::new(
                None,
                StatementKind::If {
                    condition,
                    then,
                    otherwise,
                },
            ),
            print(&mut arena, x),
        ];
        place(&arena, &mut stmts);
        let lines = render(&arena, &stmts);
        assert_eq!(lines[0], "int x;");
        assert!(lines.iter().all(|line| !line.contains("int x =")));
    }

    #[test]
    fn moved_into_the_only_branch_using_it() {
        let mut arena = Arena::new("Test");
        let x = local(&mut arena, "x");
        let condition = arena.alloc(Expr::Bool(true));
        let then = vec![assign(&mut arena, x, 1), print(&mut arena, x)];
        let mut stmts = vec![Statement::new(
            None,
            StatementKind::If {
                condition,
                then,
                otherwise: Vec::new(),
            },
        )];
        place(&arena, &mut stmts);
        let StatementKind::If { then, .. } = &stmts[0].kind else {
            panic!("expected an if");
        };
        assert!(matches!(then[0].kind, StatementKind::Declare { var, value: Some(_) } if var == x));
    }
}
