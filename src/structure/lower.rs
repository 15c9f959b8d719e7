//! Lowering of the flat statement list into a tree of blocks and jumps.
//!
//! Each list is cut into items: single statements, `switch` regions and `try` regions. Jumps
//! between the items of one list become block requirements for [`nest`]; the resulting blocks are
//! remembered on a frame stack so that every jump can be resolved to a `break` or a `continue`,
//! with `goto` as the last resort. The output is correct but verbose: every `if` is a conditional
//! jump and every loop is `while (true)`. [`super::simplify`] cleans that up.

use super::nesting::{Jump, Node, nest};
use super::regions::{Finally, Flow, Regions, TryRegion, discover};
use super::statement::{Case, CaseLabel, Catch, Label, SwitchKind, Statement, StatementKind};
use crate::builder::MethodIr;
use crate::descriptor::Type;
use crate::ir::{Expr, StmtKind, VarId};
use crate::locals;
use core::ops::Range;
use rustc_hash::{FxHashMap, FxHashSet};

/// Labels of `goto` targets are numbered apart from block labels until labels are renumbered.
const GOTO_LABELS: u32 = 1 << 30;

pub fn lower(ir: &mut MethodIr) -> Vec<Statement> {
    rotate_bottom_tests(ir);
    let flow = Flow::new(ir);
    let regions = discover(ir, &flow);
    let mut lowering = Lowering {
        ir,
        flow,
        regions,
        frames: Vec::new(),
        next_label: 0,
        goto_targets: FxHashSet::default(),
    };
    let len = lowering.ir.stmts.len();
    let mut stmts = lowering.structure_range(0..len);
    let goto_targets = lowering.goto_targets;
    strip_unused_markers(&mut stmts, &goto_targets);
    stmts
}

/// Rewrites `goto C; L: body; C: if (c) goto L;` into the top-tested form javac uses,
/// `L': if (!c) goto E; body; C: goto L'; E:`.
fn rotate_bottom_tests(ir: &mut MethodIr) {
    for index in 0..ir.stmts.len() {
        let StmtKind::Goto(target) = ir.stmts[index].kind else {
            continue;
        };
        let test = ir.index_of(target);
        if test <= index + 1 || test + 1 >= ir.stmts.len() {
            continue;
        }
        let StmtKind::If {
            condition,
            target: back,
        } = ir.stmts[test].kind
        else {
            continue;
        };
        if ir.index_of(back) != index + 1 {
            continue;
        }
        let exit = ir.stmts[test + 1].offset;
        let head = ir.stmts[index].offset;
        let negated = ir.arena.negate(condition);
        ir.stmts[index].kind = StmtKind::If {
            condition: negated,
            target: exit,
        };
        ir.stmts[index].line = ir.stmts[test].line.or(ir.stmts[index].line);
        ir.stmts[test].kind = StmtKind::Goto(head);
        log::trace!("{}.{}: rotated loop test at {head}", ir.class_name, ir.name);
    }
}

fn goto_label(index: usize) -> Label {
    Label(GOTO_LABELS + index as u32)
}

fn strip_unused_markers(stmts: &mut Vec<Statement>, used: &FxHashSet<usize>) {
    stmts.retain(|stmt| match stmt.kind {
        StatementKind::Label(label) if label.0 >= GOTO_LABELS => {
            used.contains(&((label.0 - GOTO_LABELS) as usize))
        }
        _ => true,
    });
    for stmt in stmts {
        for list in stmt.lists_mut() {
            strip_unused_markers(list, used);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    label: Label,
    break_to: usize,
    continue_to: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
enum Item {
    Stmt(usize),
    Switch { at: usize, end: usize },
    Try { region: usize, start: usize },
}

impl Item {
    fn start(&self) -> usize {
        match *self {
            Self::Stmt(index) => index,
            Self::Switch { at, .. } => at,
            Self::Try { start, .. } => start,
        }
    }
}

struct Lowering<'a> {
    ir: &'a mut MethodIr,
    flow: Flow,
    regions: Regions,
    frames: Vec<Frame>,
    next_label: u32,
    goto_targets: FxHashSet<usize>,
}

impl Lowering<'_> {
    /// The first statement at or after `index` that is shown in place.
    fn normalize(&self, mut index: usize) -> usize {
        while index < self.ir.stmts.len() && self.regions.is_skipped(index) {
            index += 1;
        }
        index
    }

    fn fresh_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn structure_range(&mut self, range: Range<usize>) -> Vec<Statement> {
        let items = self.items(range.clone());
        let end = self.normalize(range.end);
        let mut position: FxHashMap<usize, usize> = items
            .iter()
            .enumerate()
            .map(|(position, item)| (item.start(), position))
            .collect();
        position.entry(end).or_insert(items.len());

        let mut jumps = Vec::new();
        for (from, item) in items.iter().enumerate() {
            for target in self.exits(item) {
                let Some(&to) = position.get(&target) else {
                    continue;
                };
                // Leaving the list sideways is up to the enclosing blocks.
                if (to == 0 || to == items.len()) && self.frame_jump(target).is_some() {
                    continue;
                }
                jumps.push(Jump { from, to });
            }
        }

        let (tree, abandoned) = nest(items.len(), &jumps, &mut self.next_label);
        if !abandoned.is_empty() {
            log::debug!(
                "{}.{}: {} jumps in {range:?} lowered as goto",
                self.ir.class_name,
                self.ir.name,
                abandoned.len()
            );
        }
        let mut out = Vec::new();
        self.lower_nodes(&tree, &items, end, &mut out);
        out
    }

    fn items(&self, range: Range<usize>) -> Vec<Item> {
        let mut items = Vec::new();
        let mut index = range.start;
        while index < range.end {
            if self.regions.is_skipped(index) {
                index += 1;
                continue;
            }
            let region = self
                .regions
                .tries
                .iter()
                .position(|region| region.start == index && region.end <= range.end);
            if let Some(region) = region {
                items.push(Item::Try {
                    region,
                    start: index,
                });
                index = self.regions.tries[region].end;
                continue;
            }
            if let StmtKind::Switch { .. } = self.ir.stmts[index].kind {
                let end = self.switch_end(index, range.end);
                items.push(Item::Switch { at: index, end });
                index = end;
                continue;
            }
            items.push(Item::Stmt(index));
            index += 1;
        }
        items
    }

    fn targets(&self, index: usize) -> Vec<usize> {
        self.flow.targets[index]
            .iter()
            .map(|target| self.normalize(*target))
            .collect()
    }

    /// Statements outside the item that the item jumps to.
    fn exits(&self, item: &Item) -> Vec<usize> {
        let mut out = Vec::new();
        match *item {
            Item::Stmt(index) => out = self.targets(index),
            Item::Switch { at, end } => {
                for index in at..end {
                    if self.regions.is_skipped(index) {
                        continue;
                    }
                    out.extend(
                        self.targets(index)
                            .into_iter()
                            .filter(|target| *target <= at || *target > end),
                    );
                }
            }
            Item::Try { region, .. } => {
                let TryRegion {
                    start,
                    body_end,
                    end,
                    ..
                } = self.regions.tries[region];
                for index in start..end {
                    if self.regions.is_skipped(index) {
                        continue;
                    }
                    let in_body = index < body_end;
                    out.extend(self.targets(index).into_iter().filter(|target| {
                        *target < start || *target >= end || (!in_body && *target == start)
                    }));
                }
            }
        }
        out
    }

    /// The end of a `switch` is where its `break`s go. Without any, the last case target is taken
    /// to be the end; jumping there leaves the `switch` either way.
    fn switch_end(&self, at: usize, limit: usize) -> usize {
        let targets = self.targets(at);
        let last = targets.iter().copied().max().unwrap_or(at + 1);
        let breaks = (at + 1..last.min(limit))
            .flat_map(|index| self.targets(index))
            .filter(|target| *target >= last && *target <= limit)
            .min();
        breaks.unwrap_or(last).clamp(at + 1, limit.max(at + 1))
    }

    fn frame_jump(&self, target: usize) -> Option<StatementKind> {
        self.frames.iter().rev().find_map(|frame| {
            if frame.break_to == target {
                Some(StatementKind::Break(Some(frame.label)))
            } else if frame.continue_to == Some(target) {
                Some(StatementKind::Continue(Some(frame.label)))
            } else {
                None
            }
        })
    }

    fn jump(&mut self, line: Option<u32>, target: usize) -> Statement {
        let target = self.normalize(target);
        let kind = self.frame_jump(target).unwrap_or_else(|| {
            self.goto_targets.insert(target);
            StatementKind::Goto(goto_label(target))
        });
        Statement::new(line, kind)
    }

    fn lower_nodes(&mut self, nodes: &[Node], items: &[Item], end: usize, out: &mut Vec<Statement>) {
        let start_of = |position: usize| items.get(position).map_or(end, Item::start);
        for node in nodes {
            match node {
                Node::Item(position) => self.lower_item(items[*position], out),
                Node::Block {
                    label,
                    is_loop,
                    range,
                    children,
                } => {
                    self.frames.push(Frame {
                        label: *label,
                        break_to: start_of(range.end),
                        continue_to: is_loop.then(|| start_of(range.start)),
                    });
                    let mut body = Vec::new();
                    self.lower_nodes(children, items, end, &mut body);
                    self.frames.pop();
                    let line = body.first().and_then(|stmt| stmt.line);
                    let kind = if *is_loop {
                        // The raw loop is `while (true)`; leaving at the bottom needs a `break`.
                        if !super::statement::list_diverges(&body) {
                            body.push(Statement::new(None, StatementKind::Break(Some(*label))));
                        }
                        StatementKind::Loop {
                            label: Some(*label),
                            body,
                        }
                    } else {
                        StatementKind::Block {
                            label: *label,
                            body,
                        }
                    };
                    out.push(Statement::new(line, kind));
                }
            }
        }
    }

    fn lower_item(&mut self, item: Item, out: &mut Vec<Statement>) {
        match item {
            Item::Stmt(index) => {
                if self.flow.is_targeted(index) {
                    out.push(Statement::new(None, StatementKind::Label(goto_label(index))));
                }
                let stmt = self.ir.stmts[index].clone();
                let line = stmt.line;
                let lowered = match stmt.kind {
                    StmtKind::If { condition, target } => {
                        let target = self.ir.index_of(target);
                        let then = vec![self.jump(line, target)];
                        Statement::new(
                            line,
                            StatementKind::If {
                                condition,
                                then,
                                otherwise: Vec::new(),
                            },
                        )
                    }
                    StmtKind::Goto(target) => {
                        let target = self.ir.index_of(target);
                        self.jump(line, target)
                    }
                    kind => Statement::new(line, StatementKind::Basic(kind)),
                };
                out.push(lowered);
            }
            Item::Switch { at, end } => {
                if self.flow.is_targeted(at) {
                    out.push(Statement::new(None, StatementKind::Label(goto_label(at))));
                }
                let switch = self.lower_switch(at, end);
                out.push(switch);
            }
            Item::Try { region, .. } => {
                let region = self.regions.tries[region].clone();
                let lowered = self.lower_try(&region);
                out.push(lowered);
            }
        }
    }

    fn lower_switch(&mut self, at: usize, end: usize) -> Statement {
        let stmt = self.ir.stmts[at].clone();
        let StmtKind::Switch {
            key,
            default,
            cases,
        } = stmt.kind
        else {
            return Statement::new(stmt.line, StatementKind::Basic(stmt.kind));
        };
        let label = self.fresh_label();
        let default = self.normalize(self.ir.index_of(default));
        let cases: Vec<(i32, usize)> = cases
            .into_iter()
            .map(|(value, target)| (value, self.normalize(self.ir.index_of(target))))
            .collect();

        let inside = |target: usize| at < target && target < end;
        let mut starts: Vec<usize> = cases
            .iter()
            .map(|(_, target)| *target)
            .chain([default])
            .filter(|target| inside(*target))
            .collect();
        starts.sort_unstable();
        starts.dedup();

        self.frames.push(Frame {
            label,
            break_to: end,
            continue_to: None,
        });
        let mut lowered = Vec::new();
        for (i, start) in starts.iter().enumerate() {
            let next = starts.get(i + 1).copied().unwrap_or(end);
            let mut labels: Vec<CaseLabel> = cases
                .iter()
                .filter(|(_, target)| target == start)
                .map(|(value, _)| CaseLabel::Int(*value))
                .collect();
            if default == *start {
                labels.push(CaseLabel::Default);
            }
            let body = self.structure_range(*start..next);
            lowered.push(Case { labels, body });
        }
        // Cases jumping somewhere else entirely.
        for (value, target) in &cases {
            if !inside(*target) && *target != end {
                let body = vec![self.jump(stmt.line, *target)];
                lowered.push(Case {
                    labels: vec![CaseLabel::Int(*value)],
                    body,
                });
            }
        }
        self.frames.pop();

        Statement::new(
            stmt.line,
            StatementKind::Switch {
                label: Some(label),
                key,
                kind: SwitchKind::Plain,
                cases: lowered,
            },
        )
    }

    fn lower_try(&mut self, region: &TryRegion) -> Statement {
        let line = self.ir.stmts.get(region.start).and_then(|stmt| stmt.line);
        let body = self.structure_range(region.start..region.body_end);
        if let Some(lock) = region.lock {
            return Statement::new(line, StatementKind::Synchronized { lock, body });
        }

        let mut catches = Vec::new();
        for handler in &region.catches {
            let (var, first) = self.catch_var(handler.start, &handler.types);
            let body = self.structure_range(first..handler.end);
            catches.push(Catch {
                types: handler.types.clone(),
                var,
                body,
            });
        }

        let finally = match &region.finally {
            None => None,
            Some(Finally::Inline(range)) => Some(self.structure_range(range.clone())),
            Some(Finally::Subroutine(range)) => {
                for index in range.clone() {
                    self.regions.hidden.remove(&index);
                }
                let lowered = self.structure_range(range.clone());
                self.regions.hidden.extend(range.clone());
                Some(lowered)
            }
        };

        Statement::new(
            line,
            StatementKind::Try {
                resources: Vec::new(),
                body,
                catches,
                finally,
            },
        )
    }

    /// The variable a handler stores the exception in, and the first statement after the store.
    fn catch_var(&mut self, handler: usize, types: &[Type]) -> (VarId, usize) {
        let (stored, first) = match self.ir.stmts.get(handler).map(|stmt| &stmt.kind) {
            Some(StmtKind::Assign { target, value })
                if matches!(self.ir.arena[*value], Expr::CaughtException) =>
            {
                match self.ir.arena[*target] {
                    Expr::Var(var) => (Some(var), handler + 1),
                    _ => (None, handler + 1),
                }
            }
            Some(StmtKind::Expr(value)) if matches!(self.ir.arena[*value], Expr::CaughtException) => {
                (None, handler + 1)
            }
            _ => (None, handler),
        };
        let var = stored.unwrap_or_else(|| {
            let ty = types
                .first()
                .cloned()
                .unwrap_or_else(|| Type::object("java/lang/Throwable"));
            locals::placeholder(&mut self.ir.arena, &ty)
        });
        (var, first)
    }
}
