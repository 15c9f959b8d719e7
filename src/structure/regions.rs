//! Recovering `try` statements from the exception table.
//!
//! Entries are grouped by handler, then handlers protecting the same range become the `catch`
//! clauses of one `try`. Catch-all handlers that rethrow after running some code are `finally`
//! clauses (or `synchronized` blocks when that code is a lone `monitorexit`); the copies of that
//! code the compiler inlined at every exit of the protected range are erased.

use crate::builder::MethodIr;
use crate::descriptor::Type;
use crate::ir::{Expr, ExprId, Stmt, StmtKind, exprs_equal, stmts_equivalent};
use crate::patterns::has_effects;
use core::ops::Range;
use rustc_hash::FxHashSet;

/// Where jumps go, by statement index.
pub struct Flow {
    /// Targets of `if`, `goto` and `switch` statements. `jsr` is not a jump here.
    pub targets: Vec<Vec<usize>>,
    targeted: FxHashSet<usize>,
}

impl Flow {
    pub fn new(ir: &MethodIr) -> Self {
        let targets: Vec<Vec<usize>> = ir
            .stmts
            .iter()
            .map(|stmt| match stmt.kind {
                StmtKind::Jsr(_) => Vec::new(),
                _ => stmt
                    .jump_targets()
                    .into_iter()
                    .map(|target| ir.index_of(target))
                    .collect(),
            })
            .collect();
        let mut targeted: FxHashSet<usize> = targets.iter().flatten().copied().collect();
        for stmt in &ir.stmts {
            if let StmtKind::Jsr(target) = stmt.kind {
                targeted.insert(ir.index_of(target));
            }
        }
        Self { targets, targeted }
    }

    pub fn is_targeted(&self, index: usize) -> bool {
        self.targeted.contains(&index)
    }

    /// Whether a statement in `from` jumps to `index`.
    fn targeted_from(&self, from: Range<usize>, index: usize) -> bool {
        from.into_iter()
            .any(|source| self.targets[source].contains(&index))
    }

    /// Whether a statement outside of `inside` jumps to `index`.
    fn targeted_from_outside(&self, inside: Range<usize>, index: usize) -> bool {
        self.targets
            .iter()
            .enumerate()
            .any(|(source, targets)| !inside.contains(&source) && targets.contains(&index))
    }

    /// How far straight-line code starting at `start` extends: up to the first statement control
    /// can only reach from elsewhere.
    pub fn extent(&self, stmts: &[Stmt], start: usize, limit: usize) -> usize {
        let mut index = start + 1;
        while index < limit {
            let entered = self.targeted_from(start..index, index);
            if !stmts[index - 1].can_fallthrough() && !entered {
                break;
            }
            if self.targeted_from_outside(start..index, index) {
                break;
            }
            index += 1;
        }
        index.min(limit)
    }
}

#[derive(Clone, Debug)]
pub struct TryRegion {
    pub start: usize,
    /// The protected statements are `start..body_end`.
    pub body_end: usize,
    pub catches: Vec<Handler>,
    pub finally: Option<Finally>,
    /// Set for `synchronized` blocks, which have neither catches nor a finally clause.
    pub lock: Option<ExprId>,
    /// The statement after the last handler.
    pub end: usize,
}

#[derive(Clone, Debug)]
pub struct Handler {
    pub start: usize,
    pub end: usize,
    pub types: Vec<Type>,
}

#[derive(Clone, Debug)]
pub enum Finally {
    /// Statements of the catch-all handler between saving and rethrowing the exception.
    Inline(Range<usize>),
    /// The body of a `jsr` subroutine.
    Subroutine(Range<usize>),
}

impl TryRegion {
    /// Ranges a nested region must fit in.
    fn parts(&self) -> Vec<Range<usize>> {
        let mut parts = vec![self.start..self.body_end, self.body_end..self.end];
        parts.extend(self.catches.iter().map(|handler| handler.start..handler.end));
        parts
    }
}

#[derive(Debug, Default)]
pub struct Regions {
    /// Outermost first.
    pub tries: Vec<TryRegion>,
    /// Compiler-made copies of `finally` bodies and the like, never shown.
    pub erased: FxHashSet<usize>,
    /// Subroutine bodies, only shown as `finally` clauses.
    pub hidden: FxHashSet<usize>,
}

impl Regions {
    pub fn is_skipped(&self, index: usize) -> bool {
        self.erased.contains(&index) || self.hidden.contains(&index)
    }
}

struct HandlerEntries {
    handler: usize,
    protected: Range<usize>,
    /// `None` catches everything.
    types: Vec<Option<String>>,
}

struct Group {
    protected: Range<usize>,
    handlers: Vec<HandlerEntries>,
}

pub fn discover(ir: &MethodIr, flow: &Flow) -> Regions {
    let mut regions = Regions::default();
    for group in groups(ir) {
        let bound = regions
            .tries
            .iter()
            .flat_map(TryRegion::parts)
            .filter(|part| part.contains(&group.protected.start))
            .map(|part| part.end)
            .min()
            .unwrap_or(ir.stmts.len());
        match build_region(ir, flow, &group, bound, &mut regions) {
            Some(region) => regions.tries.push(region),
            None => log::debug!(
                "{}.{}: exception range {:?} does not nest, left unstructured",
                ir.class_name,
                ir.name,
                group.protected
            ),
        }
    }
    regions
}

fn groups(ir: &MethodIr) -> Vec<Group> {
    let mut by_handler: Vec<HandlerEntries> = Vec::new();
    for entry in &ir.exception_table {
        let handler = ir.index_of(entry.handler);
        let (start, end) = (ir.index_of(entry.start), ir.index_of(entry.end));
        if start >= end {
            continue;
        }
        match by_handler.iter_mut().find(|other| other.handler == handler) {
            Some(other) => {
                other.protected = other.protected.start.min(start)..other.protected.end.max(end);
                if !other.types.contains(&entry.catch_type) {
                    other.types.push(entry.catch_type.clone());
                }
            }
            None => by_handler.push(HandlerEntries {
                handler,
                protected: start..end,
                types: vec![entry.catch_type.clone()],
            }),
        }
    }

    let mut groups: Vec<Group> = Vec::new();
    for mut entries in by_handler {
        // Handlers placed before the code they protect do not nest.
        if entries.handler <= entries.protected.start {
            continue;
        }
        entries.protected.end = entries.protected.end.min(entries.handler);
        match groups
            .iter_mut()
            .find(|group| group.protected == entries.protected)
        {
            Some(group) => group.handlers.push(entries),
            None => groups.push(Group {
                protected: entries.protected.clone(),
                handlers: vec![entries],
            }),
        }
    }
    for group in &mut groups {
        group.handlers.sort_by_key(|entries| entries.handler);
    }
    groups.sort_by_key(|group| (group.protected.start, core::cmp::Reverse(group.protected.end)));
    groups
}

fn build_region(
    ir: &MethodIr,
    flow: &Flow,
    group: &Group,
    bound: usize,
    regions: &mut Regions,
) -> Option<TryRegion> {
    let start = group.protected.start;
    let body_end = group.handlers.first()?.handler;
    let last = group.handlers.last()?.handler;
    if last >= bound {
        return None;
    }

    // The statement after the `try` is where the protected code and the handlers jump to when they
    // complete normally. The last handler just falls through to it.
    let join = (start..last)
        .flat_map(|index| flow.targets[index].iter().copied())
        .filter(|target| *target > last && *target <= bound)
        .min();
    let end = join.unwrap_or_else(|| flow.extent(&ir.stmts, last, bound));

    let mut handlers: Vec<Handler> = group
        .handlers
        .iter()
        .enumerate()
        .map(|(i, entries)| Handler {
            start: entries.handler,
            end: group.handlers.get(i + 1).map_or(end, |next| next.handler),
            types: entries
                .types
                .iter()
                .map(|ty| Type::object(ty.as_deref().unwrap_or("java/lang/Throwable")))
                .collect(),
        })
        .collect();

    let mut region = TryRegion {
        start,
        body_end,
        catches: Vec::new(),
        finally: None,
        lock: None,
        end,
    };

    let catch_all = match group.handlers.as_slice() {
        [only] if only.types.iter().all(Option::is_none) => Some(&handlers[0]),
        _ => None,
    };
    if let Some(handler) = catch_all
        && let Some(cleanup) = rethrowing_cleanup(ir, handler)
    {
        let code = &ir.stmts[cleanup.clone()];
        let entered = start
            .checked_sub(1)
            .and_then(|enter| match ir.stmts[enter].kind {
                StmtKind::MonitorEnter(lock) => Some((enter, lock)),
                _ => None,
            });
        match (code, entered) {
            (
                [
                    Stmt {
                        kind: StmtKind::MonitorExit(_),
                        ..
                    },
                ],
                Some((enter, lock)),
            ) => {
                region.lock = Some(take_lock(ir, enter, lock, regions));
                erase_copies(ir, start..body_end, code, regions);
            }
            (
                [
                    Stmt {
                        kind: StmtKind::Jsr(target),
                        ..
                    },
                ],
                _,
            ) => {
                let subroutine = subroutine(ir, *target)?;
                erase_jsr(ir, start..body_end, *target, regions);
                regions.hidden.extend(subroutine.start - 1..=subroutine.end);
                region.finally = Some(Finally::Subroutine(subroutine));
            }
            _ => {
                erase_copies(ir, start..body_end, code, regions);
                region.finally = Some(Finally::Inline(cleanup));
            }
        }
        return Some(region);
    }

    region.catches = core::mem::take(&mut handlers);
    Some(region)
}

/// For a handler `t = caught; ...; throw t`, the statements in between.
fn rethrowing_cleanup(ir: &MethodIr, handler: &Handler) -> Option<Range<usize>> {
    let first = ir.stmts.get(handler.start)?;
    let StmtKind::Assign { target, value } = first.kind else {
        return None;
    };
    if !matches!(ir.arena[value], Expr::CaughtException) {
        return None;
    }
    // A `jsr` subroutine placed after the handler is not part of it.
    let limit = (handler.start + 1..handler.end)
        .find(|index| is_subroutine_entry(ir, *index))
        .unwrap_or(handler.end);
    let last = limit.checked_sub(1)?;
    let StmtKind::Throw(thrown) = ir.stmts.get(last)?.kind else {
        return None;
    };
    (same_local(ir, target, thrown) && handler.start < last).then_some(handler.start + 1..last)
}

/// Erases `monitorenter` before a `synchronized` body, and the store of the lock to a local if the
/// compiler made one. javac's `dup; astore` leaves either the saved local or a second copy of the
/// stored value as the operand of `monitorenter`.
fn take_lock(ir: &MethodIr, enter: usize, lock: ExprId, regions: &mut Regions) -> ExprId {
    regions.erased.insert(enter);
    if let Some(store) = enter.checked_sub(1)
        && let StmtKind::Assign { target, value } = ir.stmts[store].kind
        && (same_local(ir, target, lock)
            || (exprs_equal(&ir.arena, value, lock) && !has_effects(&ir.arena[value])))
    {
        regions.erased.insert(store);
        return value;
    }
    lock
}

fn same_local(ir: &MethodIr, a: ExprId, b: ExprId) -> bool {
    match (&ir.arena[a], &ir.arena[b]) {
        (Expr::Var(a), Expr::Var(b)) => a == b,
        (Expr::Slot { index: a, .. }, Expr::Slot { index: b, .. }) => a == b,
        _ => false,
    }
}

/// Erases the copies of `code` placed right before exits from `range`.
fn erase_copies(ir: &MethodIr, range: Range<usize>, code: &[Stmt], regions: &mut Regions) {
    if code.is_empty() {
        return;
    }
    let mut index = range.start;
    while index + code.len() <= range.end {
        let exit = index + code.len();
        let exits = match ir.stmts.get(exit).map(|stmt| &stmt.kind) {
            Some(StmtKind::Return(_)) => true,
            Some(StmtKind::Goto(target)) => !range.contains(&ir.index_of(*target)),
            _ => false,
        };
        let erased = (index..exit).any(|i| regions.erased.contains(&i));
        if exits && !erased && stmts_equivalent(&ir.arena, &ir.stmts[index..exit], code) {
            regions.erased.extend(index..exit);
            index = exit;
        } else {
            index += 1;
        }
    }
}

fn erase_jsr(ir: &MethodIr, range: Range<usize>, target: u32, regions: &mut Regions) {
    for index in range {
        if matches!(ir.stmts[index].kind, StmtKind::Jsr(other) if other == target) {
            regions.erased.insert(index);
        }
    }
}

/// Whether the statement saves the return address of a `jsr`.
fn is_subroutine_entry(ir: &MethodIr, index: usize) -> bool {
    match ir.stmts.get(index).map(|stmt| &stmt.kind) {
        Some(StmtKind::Assign { value, .. } | StmtKind::Expr(value)) => {
            matches!(ir.arena[*value], Expr::ReturnAddress)
        }
        _ => false,
    }
}

/// The statements of the subroutine at `target`, between saving the return address and `ret`.
fn subroutine(ir: &MethodIr, target: u32) -> Option<Range<usize>> {
    let entry = ir.index_of(target);
    if !is_subroutine_entry(ir, entry) {
        return None;
    }
    let ret = (entry + 1..ir.stmts.len())
        .find(|index| matches!(ir.stmts[*index].kind, StmtKind::Ret(_)))?;
    Some(entry + 1..ret)
}
