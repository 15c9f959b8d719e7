//! The symbolic operand stack.
//!
//! Values on the stack are expression trees that haven't been consumed yet. Evaluation of a tree is
//! deferred until the instruction consuming it, so every time a statement is emitted we have to
//! make sure the deferred values still evaluate in bytecode order: values whose evaluation could
//! observe (or be observed by) the statement are first bound to temporaries.
//!
//! Duplication never aliases a tree. A `dup`ed value is bound to a temporary once and loaded from
//! it wherever it's used, which turns implicit stack sharing into an explicit binding that later
//! passes can inspect and undo.

use super::InsnError;
use crate::ir::{Arena, Expr, ExprId, Stmt, StmtKind, TempId};
use crate::model::CodeModel;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Stack underflow")]
pub struct StackUnderflowError;

#[derive(Clone, Copy, Debug)]
pub struct StackValue {
    pub expr: ExprId,
    // 2 for `long` and `double`, 1 otherwise
    pub width: usize,
}

/// What a value on the stack is replaced with when control enters a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryValue {
    Temp(TempId),
    ReturnAddress,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    value: EntryValue,
    width: usize,
}

pub struct Machine<'a> {
    pub arena: Arena,
    pub stmts: Vec<Stmt>,
    pub stack: Vec<StackValue>,
    code: &'a CodeModel,
    // Address of the first instruction whose effects haven't been emitted yet.
    group_start: u32,
    // Address of the instruction being executed.
    current: u32,
    // Address of the instruction following it.
    next: u32,
    emitted: bool,
    entry_stacks: FxHashMap<u32, Vec<Entry>>,
}

/// Which state a statement can modify or observe. Used to decide which deferred stack values must
/// be evaluated before it.
#[derive(Default)]
struct Effect {
    writes_slot: Option<u16>,
    writes_memory: bool,
    reads_memory: bool,
}

impl<'a> Machine<'a> {
    pub fn new(arena: Arena, code: &'a CodeModel) -> Self {
        Self {
            arena,
            stmts: Vec::new(),
            stack: Vec::new(),
            code,
            group_start: 0,
            current: 0,
            next: 0,
            emitted: false,
            entry_stacks: FxHashMap::default(),
        }
    }

    pub fn push(&mut self, expr: Expr, width: usize) {
        let expr = self.arena.alloc(expr);
        self.stack.push(StackValue { expr, width });
    }

    pub fn push_id(&mut self, expr: ExprId, width: usize) {
        self.stack.push(StackValue { expr, width });
    }

    pub fn pop(&mut self) -> Result<StackValue, StackUnderflowError> {
        self.stack.pop().ok_or(StackUnderflowError)
    }

    pub fn pop_expr(&mut self) -> Result<ExprId, StackUnderflowError> {
        Ok(self.pop()?.expr)
    }

    /// Pops values whose widths sum up to `width` (1 or 2), as `pop2` and the `dup2` family see
    /// the stack. Returned in stack order.
    pub fn pop_width(&mut self, width: usize) -> Result<Vec<StackValue>, InsnError> {
        let mut out = Vec::new();
        let mut total = 0;
        while total < width {
            let value = self.pop()?;
            total += value.width;
            out.push(value);
        }
        if total != width {
            return Err(InsnError::SplitWide);
        }
        out.reverse();
        Ok(out)
    }

    fn line(&self, offset: u32) -> Option<u32> {
        self.code.line_at(offset)
    }

    pub fn begin_insn(&mut self, offset: u32, next: u32) {
        self.current = offset;
        self.next = next;
        self.emitted = false;
    }

    /// Statements emitted by later instructions don't include this one.
    pub fn end_insn(&mut self) {
        if self.emitted {
            self.group_start = self.next;
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn next(&self) -> u32 {
        self.next
    }

    fn effect(&self, kind: &StmtKind) -> Effect {
        let arena = &self.arena;
        let mut effect = Effect::default();
        let roots: Vec<ExprId> = Stmt::new(0, None, kind.clone()).exprs();
        for root in &roots {
            if arena.has_side_effects(*root) {
                effect.writes_memory = true;
            }
            if reads_memory(arena, *root) {
                effect.reads_memory = true;
            }
        }
        match kind {
            StmtKind::Assign { target, .. } => match &arena[*target] {
                Expr::Slot { index, .. } => effect.writes_slot = Some(*index),
                Expr::Field { .. } | Expr::ArrayElement { .. } => effect.writes_memory = true,
                _ => {}
            },
            StmtKind::Expr(value) => {
                if let Expr::CompoundAssign { target, .. } = &arena[*value]
                    && let Expr::Slot { index, .. } = &arena[*target]
                {
                    effect.writes_slot = Some(*index);
                }
            }
            StmtKind::MonitorEnter(_) | StmtKind::MonitorExit(_) => effect.writes_memory = true,
            _ => {}
        }
        effect
    }

    /// Appends a statement, binding deferred stack values that the statement could interfere with.
    pub fn emit(&mut self, kind: StmtKind) {
        let effect = self.effect(&kind);
        for i in 0..self.stack.len() {
            let expr = self.stack[i].expr;
            if self.is_stable(expr) {
                continue;
            }
            let reads_slot = effect
                .writes_slot
                .is_some_and(|slot| self.arena.reads_slot(expr, slot));
            let side_effects = self.arena.has_side_effects(expr);
            let reads = reads_memory(&self.arena, expr);
            if reads_slot
                || (side_effects && (effect.writes_memory || effect.reads_memory))
                || (reads && effect.writes_memory)
            {
                self.spill(i);
            }
        }
        self.append(kind);
    }

    // Appends a statement without looking at the stack.
    fn append(&mut self, kind: StmtKind) {
        let offset = self.group_start;
        let line = self.line(offset);
        self.stmts.push(Stmt::new(offset, line, kind));
        self.group_start = self.current.max(offset);
        self.emitted = true;
    }

    fn is_stable(&self, expr: ExprId) -> bool {
        matches!(
            self.arena[expr],
            Expr::Temp(_)
                | Expr::This
                | Expr::Null
                | Expr::Int(_)
                | Expr::Long(_)
                | Expr::Float(_)
                | Expr::Double(_)
                | Expr::String(_)
                | Expr::Class(_)
                | Expr::ReturnAddress
                | Expr::CaughtException
        )
    }

    /// Whether a copy of the expression can be pushed instead of binding it to a temporary. Slot
    /// loads qualify because stores to the slot bind pending loads anyway.
    fn is_copyable(&self, expr: ExprId) -> bool {
        match self.arena[expr] {
            Expr::CaughtException | Expr::ReturnAddress => false,
            Expr::Slot { .. } => true,
            _ => self.is_stable(expr),
        }
    }

    /// Binds the stack value at `index` to a fresh temporary.
    pub fn spill(&mut self, index: usize) -> TempId {
        let value = self.stack[index].expr;
        if let Expr::Temp(temp) = self.arena[value] {
            return temp;
        }
        // Everything below is evaluated first.
        if self.arena.has_side_effects(value) {
            for below in 0..index {
                let expr = self.stack[below].expr;
                if !self.is_stable(expr)
                    && (self.arena.has_side_effects(expr) || reads_memory(&self.arena, expr))
                {
                    self.spill(below);
                }
            }
        }
        let temp = self.arena.new_temp();
        let target = self.arena.temp(temp);
        self.append(StmtKind::Assign { target, value });
        self.stack[index].expr = self.arena.temp(temp);
        temp
    }

    /// Produces a second reference to the value at `index`, binding it if necessary.
    pub fn duplicate(&mut self, index: usize) -> StackValue {
        let value = self.stack[index];
        if self.is_copyable(value.expr) {
            return StackValue {
                expr: self.arena.deep_clone(value.expr),
                width: value.width,
            };
        }
        let temp = self.spill(index);
        StackValue {
            expr: self.arena.temp(temp),
            width: value.width,
        }
    }

    /// The `dup` family: copies the top `count` slots of the stack and inserts the copy `depth`
    /// slots further down.
    pub fn dup(&mut self, count: usize, depth: usize) -> Result<(), InsnError> {
        let top = self.pop_width(count)?;
        let under = self.pop_width(depth)?;
        let base = self.stack.len();
        self.stack.extend(under.iter().copied());
        self.stack.extend(top.iter().copied());
        // Bind before reordering, so that the bindings are evaluated in the original order.
        let mut copies = Vec::new();
        for i in 0..top.len() {
            copies.push(self.duplicate(base + under.len() + i));
        }
        let moved: Vec<StackValue> = self.stack.drain(base..).collect();
        let (under, top) = moved.split_at(under.len());
        self.stack.extend(copies);
        self.stack.extend(under.iter().copied());
        self.stack.extend(top.iter().copied());
        Ok(())
    }

    pub fn swap(&mut self) -> Result<(), InsnError> {
        let len = self.stack.len();
        if len < 2 {
            return Err(StackUnderflowError.into());
        }
        if self.stack[len - 1].width != 1 || self.stack[len - 2].width != 1 {
            return Err(InsnError::SplitWide);
        }
        let has_effects = |machine: &Self, i: usize| machine.arena.has_side_effects(machine.stack[i].expr);
        if has_effects(self, len - 1) || has_effects(self, len - 2) {
            self.spill(len - 2);
            self.spill(len - 1);
        }
        self.stack.swap(len - 1, len - 2);
        Ok(())
    }

    /// Records the stack for an edge to `target`. The values are stored into the temporaries the
    /// target block expects them in, which are allocated by the first edge seen.
    pub fn jump_to(&mut self, target: u32) -> Result<(), InsnError> {
        let Some(entry) = self.entry_stacks.get(&target).cloned() else {
            if target <= self.current && !self.stack.is_empty() {
                // A backward jump to a block that was entered with an empty stack.
                return Err(InsnError::InconsistentStackSize(target));
            }
            for i in 0..self.stack.len() {
                self.spill(i);
            }
            let entry = self
                .stack
                .iter()
                .map(|value| match self.arena[value.expr] {
                    Expr::Temp(temp) => Entry {
                        value: EntryValue::Temp(temp),
                        width: value.width,
                    },
                    _ => Entry {
                        value: EntryValue::ReturnAddress,
                        width: value.width,
                    },
                })
                .collect();
            self.entry_stacks.insert(target, entry);
            return Ok(());
        };

        if entry.len() != self.stack.len()
            || entry
                .iter()
                .zip(&self.stack)
                .any(|(expected, value)| expected.width != value.width)
        {
            return Err(InsnError::InconsistentStackSize(target));
        }

        // Values that read one of the temporaries we're about to overwrite have to be evaluated
        // before any of the stores.
        let targets: Vec<TempId> = entry
            .iter()
            .filter_map(|expected| match expected.value {
                EntryValue::Temp(temp) => Some(temp),
                EntryValue::ReturnAddress => None,
            })
            .collect();
        let clobbers = self.stack.iter().zip(&entry).any(|(value, expected)| {
            targets.iter().any(|temp| {
                expected.value != EntryValue::Temp(*temp) && self.arena.uses_temp(value.expr, *temp)
            })
        });
        for i in 0..self.stack.len() {
            if clobbers || self.arena.has_side_effects(self.stack[i].expr) {
                self.spill(i);
            }
        }

        for i in 0..self.stack.len() {
            let value = self.stack[i].expr;
            match entry[i].value {
                EntryValue::Temp(temp) => {
                    if !matches!(self.arena[value], Expr::Temp(t) if t == temp) {
                        let target = self.arena.temp(temp);
                        let value = self.arena.deep_clone(value);
                        self.append(StmtKind::Assign { target, value });
                        self.stack[i].expr = self.arena.temp(temp);
                    }
                }
                EntryValue::ReturnAddress => {
                    if !matches!(self.arena[value], Expr::ReturnAddress) {
                        return Err(InsnError::InconsistentStackSize(target));
                    }
                }
            }
        }
        Ok(())
    }

    /// `jsr` enters the subroutine with the return address on top of the current stack.
    pub fn jump_to_subroutine(&mut self, target: u32) -> Result<(), InsnError> {
        for i in 0..self.stack.len() {
            self.spill(i);
        }
        let mut entry = Vec::new();
        for value in &self.stack {
            match self.arena[value.expr] {
                Expr::Temp(temp) => entry.push(Entry {
                    value: EntryValue::Temp(temp),
                    width: value.width,
                }),
                _ => return Err(InsnError::InconsistentStackSize(target)),
            }
        }
        entry.push(Entry {
            value: EntryValue::ReturnAddress,
            width: 1,
        });
        if let Some(existing) = self.entry_stacks.get(&target) {
            if existing.len() != entry.len() {
                return Err(InsnError::InconsistentStackSize(target));
            }
        } else {
            self.entry_stacks.insert(target, entry);
        }
        Ok(())
    }

    /// Whether some edge into `offset` has been recorded.
    pub fn has_entry(&self, offset: u32) -> bool {
        self.entry_stacks.contains_key(&offset)
    }

    /// Replaces the stack with the one recorded for the block at `offset`.
    pub fn enter(&mut self, offset: u32) {
        self.stack.clear();
        if let Some(entry) = self.entry_stacks.get(&offset).cloned() {
            for value in entry {
                let expr = match value.value {
                    EntryValue::Temp(temp) => Expr::Temp(temp),
                    EntryValue::ReturnAddress => Expr::ReturnAddress,
                };
                self.push(expr, value.width);
            }
        }
        self.group_start = offset;
    }

    pub fn enter_handler(&mut self, offset: u32) {
        self.stack.clear();
        self.push(Expr::CaughtException, 1);
        self.group_start = offset;
    }

    pub fn into_parts(self) -> (Arena, Vec<Stmt>) {
        (self.arena, self.stmts)
    }
}

/// Whether evaluating the expression reads state that a call or a store could change.
pub fn reads_memory(arena: &Arena, root: ExprId) -> bool {
    arena.any(root, &mut |expr| {
        matches!(
            expr,
            Expr::Field { .. }
                | Expr::ArrayElement { .. }
                | Expr::ArrayLength { .. }
                | Expr::Call { .. }
                | Expr::InvokeNew { .. }
        )
    })
}
