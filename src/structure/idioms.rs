//! Source-level idioms recognized on the structured tree: `for` and for-each loops, `switch` on
//! enums and strings, try-with-resources, and a few tidy-ups.

use super::simplify::continues_to;
use super::statement::{CaseLabel, Catch, Label, Resource, Statement, StatementKind, SwitchKind};
use crate::accessors::SwitchMapKey;
use crate::context::ClassContext;
use crate::ir::{Arena, BinOp, CallKind, Expr, ExprId, Stmt, StmtKind, VarId, exprs_equal};
use crate::locals::LocalFlags;
use rustc_hash::FxHashMap;

/// How many times each variable appears anywhere in the method.
pub type UseCounts = FxHashMap<VarId, usize>;

pub fn count_uses(arena: &Arena, list: &[Statement], counts: &mut UseCounts) {
    for stmt in list {
        for root in stmt.exprs() {
            arena.walk(root, &mut |_, expr| {
                if let Expr::Var(var) = expr {
                    *counts.entry(*var).or_default() += 1;
                }
            });
        }
        let bound: Vec<VarId> = match &stmt.kind {
            StatementKind::Declare { var, .. } | StatementKind::ForEach { var, .. } => vec![*var],
            StatementKind::Try {
                resources, catches, ..
            } => resources
                .iter()
                .map(|resource| resource.var)
                .chain(catches.iter().map(|catch| catch.var))
                .collect(),
            _ => Vec::new(),
        };
        for var in bound {
            *counts.entry(var).or_default() += 1;
        }
        for nested in stmt.lists() {
            count_uses(arena, nested, counts);
        }
    }
}

/// Returns whether anything was rewritten.
pub fn apply(arena: &mut Arena, stmts: &mut Vec<Statement>, cx: &ClassContext<'_>) -> bool {
    let mut counts = UseCounts::default();
    count_uses(arena, stmts, &mut counts);
    let mut idioms = Idioms {
        arena,
        cx,
        counts: &counts,
    };
    idioms.list(stmts)
}

struct Idioms<'a, 'b> {
    arena: &'a mut Arena,
    cx: &'a ClassContext<'b>,
    counts: &'a UseCounts,
}

fn var_of(arena: &Arena, id: ExprId) -> Option<VarId> {
    match arena[id] {
        Expr::Var(var) => Some(var),
        _ => None,
    }
}

/// `var = value`.
fn as_assign(arena: &Arena, stmt: &Statement) -> Option<(VarId, ExprId)> {
    match stmt.kind {
        StatementKind::Basic(StmtKind::Assign { target, value }) => {
            Some((var_of(arena, target)?, value))
        }
        _ => None,
    }
}

/// `object.name(...)` with `object` being `var`, returning the arguments.
fn call_on<'a>(arena: &'a Arena, id: ExprId, var: VarId, name: &str) -> Option<&'a [ExprId]> {
    match &arena[id] {
        Expr::Call {
            name: called,
            kind,
            arguments,
            ..
        } if called == name && kind.object().and_then(|object| var_of(arena, object)) == Some(var) => {
            Some(arguments)
        }
        _ => None,
    }
}

fn basic_equal(arena: &Arena, a: &StmtKind, b: &StmtKind) -> bool {
    if core::mem::discriminant(a) != core::mem::discriminant(b) {
        return false;
    }
    let a = Stmt::new(0, None, a.clone()).exprs();
    let b = Stmt::new(0, None, b.clone()).exprs();
    a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| exprs_equal(arena, *x, *y))
}

impl Idioms<'_, '_> {
    fn uses(&self, var: VarId) -> usize {
        self.counts.get(&var).copied().unwrap_or(0)
    }

    fn list(&mut self, list: &mut Vec<Statement>) -> bool {
        let mut changed = false;
        for stmt in list.iter_mut() {
            for nested in stmt.lists_mut() {
                changed |= self.list(nested);
            }
            changed |= self.merge_nested_try(stmt);
            changed |= self.enum_switch(stmt);
        }

        let rules: [fn(&mut Self, &mut Vec<Statement>, usize) -> bool; 7] = [
            Self::string_switch,
            Self::try_with_resources,
            Self::for_loop,
            Self::for_each_array,
            Self::for_each_iterator,
            Self::inline_returned_temp,
            Self::hoist_common_tail,
        ];
        for rule in rules {
            let mut index = 0;
            while index < list.len() {
                if rule(self, list, index) {
                    changed = true;
                } else {
                    index += 1;
                }
            }
        }
        changed
    }

    /// `try { try { ... } catch ... } finally { ... }` is one statement in source.
    fn merge_nested_try(&mut self, stmt: &mut Statement) -> bool {
        let StatementKind::Try {
            resources,
            body,
            catches,
            finally,
        } = &mut stmt.kind
        else {
            return false;
        };
        if !resources.is_empty() {
            return false;
        }
        let [
            Statement {
                kind:
                    StatementKind::Try {
                        finally: inner_finally,
                        catches: inner_catches,
                        ..
                    },
                ..
            },
        ] = body.as_slice()
        else {
            return false;
        };
        let mergeable = (catches.is_empty() && inner_finally.is_none() && finally.is_some())
            || (inner_catches.is_empty() && inner_finally.is_none());
        if !mergeable {
            return false;
        }
        let Some(Statement {
            kind:
                StatementKind::Try {
                    resources: inner_resources,
                    body: inner_body,
                    catches: inner_catches,
                    ..
                },
            ..
        }) = body.pop()
        else {
            return false;
        };
        *resources = inner_resources;
        *body = inner_body;
        let mut merged = inner_catches;
        merged.append(catches);
        *catches = merged;
        true
    }

    fn enum_switch(&mut self, stmt: &mut Statement) -> bool {
        let StatementKind::Switch {
            key, kind, cases, ..
        } = &mut stmt.kind
        else {
            return false;
        };
        if *kind != SwitchKind::Plain {
            return false;
        }
        let Expr::ArrayElement { array, index } = self.arena[*key] else {
            return false;
        };
        let Expr::Call {
            name,
            kind: call_kind,
            arguments,
            ..
        } = &self.arena[index]
        else {
            return false;
        };
        let Some(value) = call_kind.object() else {
            return false;
        };
        if name != "ordinal" || !arguments.is_empty() {
            return false;
        }
        let map_key = match &self.arena[array] {
            Expr::Field {
                object: None,
                class,
                name,
                ..
            } if name.starts_with("$SwitchMap$") => SwitchMapKey::Field {
                class: class.clone(),
                name: name.clone(),
            },
            Expr::Call {
                class,
                name,
                kind: CallKind::Static,
                ..
            } if name.starts_with("$SWITCH_TABLE$") => SwitchMapKey::Method {
                class: class.clone(),
                name: name.clone(),
            },
            _ => return false,
        };
        let Some(map) = self.cx.analysis.switch_maps.get(&map_key) else {
            log::debug!("No switch map for {map_key:?}");
            return false;
        };
        let mut relabeled = Vec::new();
        for case in cases.iter() {
            let mut labels = Vec::new();
            for label in &case.labels {
                labels.push(match label {
                    CaseLabel::Int(number) => match map.get(number) {
                        Some(constant) => CaseLabel::Enum(constant.clone()),
                        None => return false,
                    },
                    other => other.clone(),
                });
            }
            relabeled.push(labels);
        }
        for (case, labels) in cases.iter_mut().zip(relabeled) {
            case.labels = labels;
        }
        *key = value;
        *kind = SwitchKind::Enum;
        true
    }

    /// Moves statements both branches of an `if` end with after it.
    fn hoist_common_tail(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        let StatementKind::If {
            condition,
            then,
            otherwise,
        } = &mut list[index].kind
        else {
            return false;
        };
        let mut common = Vec::new();
        while let (Some(a), Some(b)) = (then.last(), otherwise.last()) {
            let (StatementKind::Basic(x), StatementKind::Basic(y)) = (&a.kind, &b.kind) else {
                break;
            };
            if !basic_equal(self.arena, x, y) || then.len() + otherwise.len() == 2 {
                break;
            }
            otherwise.pop();
            common.extend(then.pop());
        }
        if common.is_empty() {
            return false;
        }
        if then.is_empty() {
            *then = core::mem::take(otherwise);
            *condition = self.arena.negate(*condition);
        }
        common.reverse();
        let after = list.split_off(index + 1);
        list.extend(common);
        list.extend(after);
        true
    }

    /// `String s$ = s; int i$ = -1; switch (s$.hashCode()) { ... } switch (i$) { ... }`.
    fn string_switch(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        let minus_one = |stmt: &Statement| {
            as_assign(self.arena, stmt)
                .filter(|(_, value)| matches!(self.arena[*value], Expr::Int(-1)))
                .map(|(var, _)| var)
        };
        let (copy, counter_at) = match list.get(index).and_then(|stmt| as_assign(self.arena, stmt)) {
            Some(copy) if list.get(index + 1).and_then(minus_one).is_some() => (Some(copy), index + 1),
            _ => (None, index),
        };
        let Some(counter) = list.get(counter_at).and_then(minus_one) else {
            return false;
        };
        let (Some(first), Some(second)) = (list.get(counter_at + 1), list.get(counter_at + 2)) else {
            return false;
        };
        let StatementKind::Switch {
            key: hash_key,
            cases: hash_cases,
            ..
        } = &first.kind
        else {
            return false;
        };
        let StatementKind::Switch {
            key: index_key,
            kind: SwitchKind::Plain,
            ..
        } = &second.kind
        else {
            return false;
        };
        if var_of(self.arena, *index_key) != Some(counter) {
            return false;
        }
        let Expr::Call {
            name,
            kind: hash_kind,
            arguments,
            ..
        } = &self.arena[*hash_key]
        else {
            return false;
        };
        let Some(hashed) = hash_kind.object().and_then(|object| var_of(self.arena, object)) else {
            return false;
        };
        if name != "hashCode" || !arguments.is_empty() || copy.is_some_and(|(copy, _)| copy != hashed) {
            return false;
        }

        let mut strings = FxHashMap::default();
        for case in hash_cases {
            if !self.collect_strings(&case.body, hashed, counter, &mut None, &mut strings) {
                return false;
            }
        }

        let subject = match copy {
            Some((_, value)) => value,
            None => self.arena.alloc(Expr::Var(hashed)),
        };
        let line = list[index].line;
        let Some(Statement {
            kind: StatementKind::Switch {
                label, mut cases, ..
            },
            ..
        }) = list.drain(index..counter_at + 3).last()
        else {
            return false;
        };
        for case in &mut cases {
            for label in &mut case.labels {
                if let CaseLabel::Int(number) = label
                    && let Some(string) = strings.get(number)
                {
                    *label = CaseLabel::String(string.clone());
                }
            }
        }
        list.insert(
            index,
            Statement::new(
                line,
                StatementKind::Switch {
                    label,
                    key: subject,
                    kind: SwitchKind::String,
                    cases,
                },
            ),
        );
        log::debug!("Recovered a string switch");
        true
    }

    fn string_equals(&self, id: ExprId, subject: VarId) -> Option<String> {
        match call_on(self.arena, id, subject, "equals")? {
            [argument] => match &self.arena[*argument] {
                Expr::String(value) => Some(value.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Reads the `if (s.equals("x")) i = 3;` chain of one `hashCode` case, in either polarity.
    /// `pending` is the string whose index assignment comes next.
    fn collect_strings(
        &self,
        body: &[Statement],
        subject: VarId,
        counter: VarId,
        pending: &mut Option<String>,
        out: &mut FxHashMap<i32, String>,
    ) -> bool {
        let only_breaks = |list: &[Statement]| {
            list.iter()
                .all(|stmt| matches!(stmt.kind, StatementKind::Break(_)))
        };
        for stmt in body {
            match &stmt.kind {
                StatementKind::Break(_) => {}
                StatementKind::If {
                    condition,
                    then,
                    otherwise,
                } => {
                    if let Some(string) = self.string_equals(*condition, subject) {
                        *pending = Some(string);
                        if !self.collect_strings(then, subject, counter, pending, out) {
                            return false;
                        }
                        *pending = None;
                        if !self.collect_strings(otherwise, subject, counter, pending, out) {
                            return false;
                        }
                    } else if let Expr::Not(inner) = self.arena[*condition]
                        && let Some(string) = self.string_equals(inner, subject)
                        && only_breaks(then)
                    {
                        *pending = Some(string);
                        if !self.collect_strings(otherwise, subject, counter, pending, out) {
                            return false;
                        }
                    } else {
                        return false;
                    }
                }
                _ => {
                    let Some((var, value)) = as_assign(self.arena, stmt) else {
                        return false;
                    };
                    let (Expr::Int(number), Some(string)) = (&self.arena[value], pending.take())
                    else {
                        return false;
                    };
                    if var != counter {
                        return false;
                    }
                    out.insert(*number, string);
                }
            }
        }
        true
    }

    /// `r = init; try { body } catch (Throwable t) { close r suppressing; throw t; } close r`.
    fn try_with_resources(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        let Some((resource, init)) = list.get(index).and_then(|stmt| as_assign(self.arena, stmt)) else {
            return false;
        };
        let Some(Statement {
            kind:
                StatementKind::Try {
                    resources,
                    catches,
                    finally: None,
                    ..
                },
            ..
        }) = list.get(index + 1)
        else {
            return false;
        };
        let [catch] = catches.as_slice() else {
            return false;
        };
        if !resources.is_empty() || !self.is_suppressing_close(catch, resource) {
            return false;
        }
        let trailing_close = list
            .get(index + 2)
            .is_some_and(|stmt| self.is_close(stmt, resource));

        let Statement {
            line,
            kind: StatementKind::Try { mut body, .. },
        } = list.remove(index + 1)
        else {
            return false;
        };
        if trailing_close {
            list.remove(index + 1);
        }
        if body.last().is_some_and(|last| self.is_close(last, resource)) {
            body.pop();
        }
        self.strip_closes(&mut body, resource);
        let line = list[index].line.or(line);
        list[index] = Statement::new(
            line,
            StatementKind::Try {
                resources: vec![Resource {
                    var: resource,
                    value: init,
                }],
                body,
                catches: Vec::new(),
                finally: None,
            },
        );
        log::debug!("Recovered try-with-resources");
        true
    }

    /// `r.close()`, optionally under `if (r != null)`.
    fn is_close(&self, stmt: &Statement, resource: VarId) -> bool {
        match &stmt.kind {
            StatementKind::Basic(StmtKind::Expr(call)) => {
                call_on(self.arena, *call, resource, "close").is_some_and(<[ExprId]>::is_empty)
            }
            StatementKind::If {
                condition,
                then,
                otherwise,
            } if otherwise.is_empty() && self.is_non_null_check(*condition, resource) => {
                matches!(then.as_slice(), [close] if self.is_close(close, resource))
            }
            _ => false,
        }
    }

    fn is_non_null_check(&self, condition: ExprId, var: VarId) -> bool {
        matches!(
            self.arena[condition],
            Expr::Binary { op: BinOp::Ne, lhs, rhs }
                if var_of(self.arena, lhs) == Some(var) && matches!(self.arena[rhs], Expr::Null)
        )
    }

    /// `catch (Throwable t) { [if (r != null)] try { r.close(); } catch (Throwable t2) {
    /// t.addSuppressed(t2); } throw t; }`.
    fn is_suppressing_close(&self, catch: &Catch, resource: VarId) -> bool {
        let [guarded, Statement {
            kind: StatementKind::Basic(StmtKind::Throw(thrown)),
            ..
        }] = catch.body.as_slice()
        else {
            return false;
        };
        if var_of(self.arena, *thrown) != Some(catch.var) {
            return false;
        }
        let attempt = match &guarded.kind {
            StatementKind::If {
                condition,
                then,
                otherwise,
            } if otherwise.is_empty() && self.is_non_null_check(*condition, resource) => {
                match then.as_slice() {
                    [attempt] => attempt,
                    _ => return false,
                }
            }
            _ => guarded,
        };
        let StatementKind::Try {
            body,
            catches,
            finally: None,
            ..
        } = &attempt.kind
        else {
            return false;
        };
        let ([close], [suppressed]) = (body.as_slice(), catches.as_slice()) else {
            return false;
        };
        if !self.is_close(close, resource) {
            return false;
        }
        match suppressed.body.as_slice() {
            [Statement {
                kind: StatementKind::Basic(StmtKind::Expr(call)),
                ..
            }] => call_on(self.arena, *call, catch.var, "addSuppressed").is_some_and(|arguments| {
                matches!(arguments, [argument] if var_of(self.arena, *argument) == Some(suppressed.var))
            }),
            _ => false,
        }
    }

    /// Drops the closes the compiler placed before every exit of the body.
    fn strip_closes(&self, list: &mut Vec<Statement>, resource: VarId) {
        let mut index = 0;
        while index < list.len() {
            let exits = list.get(index + 1).is_some_and(|next| {
                matches!(
                    next.kind,
                    StatementKind::Basic(StmtKind::Return(_))
                        | StatementKind::Break(_)
                        | StatementKind::Continue(_)
                )
            });
            if exits && self.is_close(&list[index], resource) {
                list.remove(index);
                continue;
            }
            for nested in list[index].lists_mut() {
                self.strip_closes(nested, resource);
            }
            index += 1;
        }
    }

    /// `i = init; while (c) { ...; update }` where `c` tests `i` and the update writes it.
    fn for_loop(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        let Some(init) = index.checked_sub(1).and_then(|prev| as_assign(self.arena, &list[prev])) else {
            return false;
        };
        let var = init.0;
        let StatementKind::While {
            label,
            condition,
            body,
        } = &list[index].kind
        else {
            return false;
        };
        if !self.arena.uses_var(*condition, var) || body.is_empty() {
            return false;
        }
        let Some(update) = body.last() else {
            return false;
        };
        if !self.writes(update, var) {
            return false;
        }

        // `continue` in a `for` goes to the update, which the compiler emits as a jump to the end
        // of the body.
        let continue_block = match body.get(body.len().wrapping_sub(2)) {
            Some(Statement {
                kind: StatementKind::Block { label: block, .. },
                ..
            }) if label.is_some() => Some(*block),
            _ => None,
        };
        let rest = &body[..body.len() - 1];
        if let Some(label) = label
            && continues_to(rest, *label)
        {
            return false;
        }

        let Statement {
            line,
            kind:
                StatementKind::While {
                    label,
                    condition,
                    mut body,
                },
        } = list.remove(index)
        else {
            return false;
        };
        let update = body.pop().into_iter().collect();
        if let (Some(block), Some(label)) = (continue_block, label)
            && let Some(Statement {
                kind: StatementKind::Block { body: inner, .. },
                ..
            }) = body.pop()
        {
            let mut inner = inner;
            convert_breaks_to_continues(&mut inner, block, label);
            body.extend(inner);
        }
        let init = list.remove(index - 1);
        list.insert(
            index - 1,
            Statement::new(
                init.line.or(line),
                StatementKind::For {
                    label,
                    init: vec![init],
                    condition,
                    update,
                    body,
                },
            ),
        );
        true
    }

    /// Whether the statement is `var++`, `var += x`, `var = x` or similar.
    fn writes(&self, stmt: &Statement, var: VarId) -> bool {
        let target = match &stmt.kind {
            StatementKind::Basic(StmtKind::Assign { target, .. }) => *target,
            StatementKind::Basic(StmtKind::Expr(expr)) => match self.arena[*expr] {
                Expr::Increment { target, .. }
                | Expr::CompoundAssign { target, .. }
                | Expr::Assign { target, .. } => target,
                _ => return false,
            },
            _ => return false,
        };
        var_of(self.arena, target) == Some(var)
    }

    /// `a = expr; n = a.length; for (i = 0; i < n; i++) { x = a[i]; ... }`.
    fn for_each_array(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        if index < 2 {
            return false;
        }
        let (Some((array, iterable)), Some((length, length_value))) = (
            as_assign(self.arena, &list[index - 2]),
            as_assign(self.arena, &list[index - 1]),
        ) else {
            return false;
        };
        let Expr::ArrayLength { array: measured } = self.arena[length_value] else {
            return false;
        };
        let StatementKind::For {
            init,
            condition,
            update,
            body,
            ..
        } = &list[index].kind
        else {
            return false;
        };
        let ([init], [update], Some(first)) = (init.as_slice(), update.as_slice(), body.first())
        else {
            return false;
        };
        let Some((counter, zero)) = as_assign(self.arena, init) else {
            return false;
        };
        let Some((element, element_value)) = as_assign(self.arena, first) else {
            return false;
        };
        let bounded = matches!(
            self.arena[*condition],
            Expr::Binary { op: BinOp::Lt, lhs, rhs }
                if var_of(self.arena, lhs) == Some(counter) && var_of(self.arena, rhs) == Some(length)
        );
        let indexed = matches!(
            self.arena[element_value],
            Expr::ArrayElement { array: read, index }
                if var_of(self.arena, read) == Some(array) && var_of(self.arena, index) == Some(counter)
        );
        if var_of(self.arena, measured) != Some(array)
            || !matches!(self.arena[zero], Expr::Int(0))
            || !bounded
            || !indexed
            || !self.writes(update, counter)
            || self.uses(array) != 3
            || self.uses(length) != 2
            || self.uses(counter) != 4
        {
            return false;
        }

        let Statement {
            line,
            kind: StatementKind::For {
                label, mut body, ..
            },
        } = list.remove(index)
        else {
            return false;
        };
        body.remove(0);
        list.drain(index - 2..index);
        list.insert(
            index - 2,
            Statement::new(
                line,
                StatementKind::ForEach {
                    label,
                    var: element,
                    iterable,
                    body,
                },
            ),
        );
        true
    }

    /// `it = c.iterator(); while (it.hasNext()) { x = (T) it.next(); ... }`.
    fn for_each_iterator(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        let Some((iterator, created)) = index
            .checked_sub(1)
            .and_then(|prev| as_assign(self.arena, &list[prev]))
        else {
            return false;
        };
        let Expr::Call {
            name,
            kind,
            arguments,
            ..
        } = &self.arena[created]
        else {
            return false;
        };
        let Some(iterable) = kind.object() else {
            return false;
        };
        if name != "iterator" || !arguments.is_empty() {
            return false;
        }
        let StatementKind::While {
            condition, body, ..
        } = &list[index].kind
        else {
            return false;
        };
        if call_on(self.arena, *condition, iterator, "hasNext").is_none() {
            return false;
        }
        let Some((element, mut next)) = body.first().and_then(|first| as_assign(self.arena, first))
        else {
            return false;
        };
        if let Expr::Cast { value, .. } = self.arena[next] {
            next = value;
        }
        if call_on(self.arena, next, iterator, "next").is_none() || self.uses(iterator) != 3 {
            return false;
        }

        let Statement {
            line,
            kind: StatementKind::While {
                label, mut body, ..
            },
        } = list.remove(index)
        else {
            return false;
        };
        body.remove(0);
        list[index - 1] = Statement::new(
            line,
            StatementKind::ForEach {
                label,
                var: element,
                iterable,
                body,
            },
        );
        true
    }

    /// `tmp = value; return tmp;` with `tmp` used nowhere else.
    fn inline_returned_temp(&mut self, list: &mut Vec<Statement>, index: usize) -> bool {
        let Some((var, value)) = list.get(index).and_then(|stmt| as_assign(self.arena, stmt)) else {
            return false;
        };
        let Some(Statement {
            kind: StatementKind::Basic(StmtKind::Return(Some(returned))),
            ..
        }) = list.get(index + 1)
        else {
            return false;
        };
        let named = self
            .arena
            .locals
            .get(var.0 as usize)
            .is_some_and(|local| local.flags.contains(LocalFlags::DEBUG_INFO));
        if named || var_of(self.arena, *returned) != Some(var) || self.uses(var) != 2 {
            return false;
        }
        let line = list[index].line;
        list.remove(index + 1);
        list[index] = Statement::new(line, StatementKind::Basic(StmtKind::Return(Some(value))));
        true
    }
}

fn convert_breaks_to_continues(list: &mut [Statement], block: Label, target: Label) {
    for stmt in list {
        match &mut stmt.kind {
            StatementKind::Break(Some(label)) if *label == block => {
                stmt.kind = StatementKind::Continue(Some(target));
            }
            _ => {
                for nested in stmt.lists_mut() {
                    convert_breaks_to_continues(nested, block, target);
                }
            }
        }
    }
}
