//! Conversion of bytecode to a flat list of statements over expression trees.
//!
//! The operand stack is executed symbolically: each value on it is an expression, and instructions
//! with an effect (stores, calls returning `void`, jumps, ...) emit statements that consume them.
//! Jumps stay jumps at this point; structuring happens much later.
//!
//! Every jump target and every boundary of a `try` range begins a new statement, so that offsets
//! from the exception table and from jumps can always be mapped to a statement index.

mod import;
mod machine;

pub use import::InsnError;
pub use machine::{StackUnderflowError, reads_memory};

use crate::bytecode::{DecodeError, Decoded, decode};
use crate::descriptor::{DescriptorError, MethodDescriptor};
use crate::ir::{Arena, Stmt};
use crate::model::{
    ClassModel, CodeModel, ExceptionEntry, LocalVariableEntry, MethodAccessFlags, MethodModel,
};
use machine::Machine;
use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to decode bytecode: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid method descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Address {0} is not at an instruction boundary")]
    SplitInstruction(u32),

    #[error("Inconsistent stack size when entering {0}")]
    InconsistentStackSize(u32),

    #[error("Execution falls off the end of the code")]
    CodeFallthrough,

    #[error("In instruction `{insn}` at {address}: {error}")]
    Insn {
        address: u32,
        insn: String,
        error: InsnError,
    },
}

/// A method on its way through the pipeline. Passes rewrite `stmts` in place.
#[derive(Debug)]
pub struct MethodIr {
    pub class_name: String,
    pub name: String,
    pub raw_descriptor: String,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub arena: Arena,
    pub stmts: Vec<Stmt>,
    pub insns: Vec<Decoded>,
    pub exception_table: Vec<ExceptionEntry>,
    pub local_variables: Vec<LocalVariableEntry>,
    pub code_len: u32,
    pub max_locals: u16,
}

impl MethodIr {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Index of the first statement at or after `offset`. `stmts.len()` if there is none.
    pub fn index_of(&self, offset: u32) -> usize {
        self.stmts.partition_point(|stmt| stmt.offset < offset)
    }

    /// Addresses control can be transferred to other than by falling through.
    pub fn jump_targets(&self) -> FxHashSet<u32> {
        let mut targets: FxHashSet<u32> = self
            .stmts
            .iter()
            .flat_map(|stmt| stmt.jump_targets())
            .collect();
        for entry in &self.exception_table {
            targets.insert(entry.start);
            targets.insert(entry.end);
            targets.insert(entry.handler);
        }
        targets
    }

    /// Whether a jump to some address in `targets` resolves to the statement at `index`.
    ///
    /// Passes delete statements without moving their addresses onto the neighbours, so a jump
    /// resolves to the first statement at or after its target.
    pub fn is_target(&self, index: usize, targets: &FxHashSet<u32>) -> bool {
        let offset = self.stmts[index].offset;
        let previous = index.checked_sub(1).map(|previous| self.stmts[previous].offset);
        targets
            .iter()
            .any(|target| *target <= offset && previous.is_none_or(|previous| *target > previous))
    }
}

/// Builds the statement list of a method.
pub fn build_method(
    class: &ClassModel,
    method: &MethodModel,
    code: &CodeModel,
) -> Result<MethodIr, BuildError> {
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;
    let insns = decode(&code.bytecode)?;
    let code_len = code.bytecode.len() as u32;

    let starts: FxHashSet<u32> = insns.iter().map(|decoded| decoded.offset).collect();
    let check = |offset: u32| {
        if starts.contains(&offset) {
            Ok(offset)
        } else {
            Err(BuildError::SplitInstruction(offset))
        }
    };

    let mut targets = FxHashSet::default();
    for decoded in &insns {
        for target in decoded.insn.control_flow().can_jump_to {
            targets.insert(check(target)?);
        }
    }
    let mut handlers = FxHashSet::default();
    let mut boundaries = targets.clone();
    for entry in &code.exception_table {
        boundaries.insert(check(entry.start)?);
        if entry.end != code_len {
            boundaries.insert(check(entry.end)?);
        }
        handlers.insert(check(entry.handler)?);
    }
    boundaries.extend(handlers.iter().copied());

    let mut machine = Machine::new(Arena::new(&class.name), code);
    let mut reachable = true;
    let mut previous: Option<&Decoded> = None;
    for decoded in &insns {
        let offset = decoded.offset;
        if boundaries.contains(&offset) {
            if reachable && let Some(previous) = previous {
                machine
                    .jump_to(offset)
                    .map_err(|error| insn_error(previous, error))?;
            }
            if handlers.contains(&offset) {
                if reachable && machine.has_entry(offset) {
                    return Err(BuildError::InconsistentStackSize(offset));
                }
                machine.enter_handler(offset);
                reachable = true;
            } else if reachable || targets.contains(&offset) {
                machine.enter(offset);
                reachable = true;
            }
        }
        previous = Some(decoded);
        if !reachable {
            log::trace!("Skipping unreachable instruction at {offset}");
            continue;
        }

        machine.begin_insn(offset, offset + decoded.length);
        machine
            .execute(&class.pool, &decoded.insn)
            .map_err(|error| insn_error(decoded, error))?;
        machine.end_insn();
        reachable = decoded.insn.control_flow().can_fallthrough;
    }
    if reachable {
        return Err(BuildError::CodeFallthrough);
    }

    let (arena, stmts) = machine.into_parts();
    log::trace!(
        "Built {} statements for {}.{}",
        stmts.len(),
        class.name,
        method.name
    );
    Ok(MethodIr {
        class_name: class.name.clone(),
        name: method.name.clone(),
        raw_descriptor: method.descriptor.clone(),
        descriptor,
        access_flags: method.access_flags,
        arena,
        stmts,
        insns,
        exception_table: code.exception_table.clone(),
        local_variables: code.local_variables.clone(),
        code_len,
        max_locals: code.max_locals,
    })
}

fn insn_error(decoded: &Decoded, error: InsnError) -> BuildError {
    BuildError::Insn {
        address: decoded.offset,
        insn: decoded.insn.to_string(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, StmtKind};
    use crate::model::PoolBuilder;
    use crate::testing::{CodeBuilder, class, method, op};

    fn build(
        descriptor: &str,
        flags: MethodAccessFlags,
        max_locals: u16,
        assemble: impl FnOnce(&mut CodeBuilder<'_>),
    ) -> Result<MethodIr, BuildError> {
        let mut pool = PoolBuilder::new();
        let code = {
            let mut builder = CodeBuilder::new(&mut pool);
            assemble(&mut builder);
            builder.build(max_locals)
        };
        let m = method("f", descriptor, flags, code);
        let class = class("Test", pool, vec![m.clone()]);
        let code = m.code.as_ref().unwrap();
        build_method(&class, &m, code)
    }

    fn render(ir: &MethodIr) -> Vec<String> {
        ir.stmts
            .iter()
            .map(|stmt| ir.arena.debug(stmt).to_string())
            .collect()
    }

    #[test]
    fn arithmetic_and_store() {
        let ir = build("(II)I", MethodAccessFlags::STATIC, 3, |b| {
            b.iload(0).iload(1).op(op::IADD).istore(2).iload(2).op(op::IRETURN);
        })
        .unwrap();
        assert_eq!(ir.stmts.len(), 2);
        assert_eq!(ir.stmts[0].offset, 0);
        assert_eq!(ir.stmts[1].offset, 7);
        assert!(matches!(ir.stmts[1].kind, StmtKind::Return(Some(_))));
        let StmtKind::Assign { target, .. } = ir.stmts[0].kind else {
            panic!("expected an assignment");
        };
        // The store's scope begins after the instruction.
        assert!(matches!(
            ir.arena[target],
            Expr::Slot {
                index: 2,
                offset: 7,
                ..
            }
        ));
    }

    #[test]
    fn load_before_increment_is_bound() {
        // return i++;
        let ir = build("(I)I", MethodAccessFlags::STATIC, 1, |b| {
            b.iload(0).iinc(0, 1).op(op::IRETURN);
        })
        .unwrap();
        let lines = render(&ir);
        assert_eq!(lines.len(), 3, "{lines:?}");
        assert!(ir.stmts[0].as_temp_assign(&ir.arena).is_some());
        assert!(lines[1].contains("+= 1"), "{lines:?}");
    }

    #[test]
    fn dup_binds_a_temporary() {
        // a.b = c = f();
        let ir = build("(LA;)V", MethodAccessFlags::STATIC, 2, |b| {
            b.aload(0)
                .invoke(op::INVOKESTATIC, "A", "f", "()I")
                .op(op::DUP_X1)
                .field(op::PUTFIELD, "A", "b", "I")
                .istore(1)
                .op(op::RETURN);
        })
        .unwrap();
        let lines = render(&ir);
        assert_eq!(lines.len(), 4, "{lines:?}");
        assert!(ir.stmts[0].as_temp_assign(&ir.arena).is_some());
    }

    #[test]
    fn ternary_merges_into_one_temporary() {
        // return x ? 1 : 2;
        let ir = build("(Z)I", MethodAccessFlags::STATIC, 1, |b| {
            b.iload(0)
                .jump(op::IFEQ, "else")
                .iconst(1)
                .jump(op::GOTO, "end")
                .label("else")
                .iconst(2)
                .label("end")
                .op(op::IRETURN);
        })
        .unwrap();
        let temps: Vec<_> = ir
            .stmts
            .iter()
            .filter_map(|stmt| stmt.as_temp_assign(&ir.arena))
            .map(|(temp, _)| temp)
            .collect();
        assert_eq!(temps.len(), 2);
        assert_eq!(temps[0], temps[1]);
    }

    #[test]
    fn targets_start_statements() {
        let ir = build("(I)V", MethodAccessFlags::STATIC, 1, |b| {
            b.label("head")
                .iload(0)
                .jump(op::IFLE, "end")
                .iinc(0, -1)
                .jump(op::GOTO, "head")
                .label("end")
                .op(op::RETURN);
        })
        .unwrap();
        let targets = ir.jump_targets();
        let end = ir.index_of(ir.code_len - 1);
        assert!(ir.is_target(end, &targets));
        assert!(ir.is_target(0, &targets));
        assert!(matches!(ir.stmts[end].kind, StmtKind::Return(None)));
    }

    #[test]
    fn underflow_reports_instruction() {
        let error = build("()V", MethodAccessFlags::STATIC, 0, |b| {
            b.op(op::POP).op(op::RETURN);
        })
        .unwrap_err();
        assert!(matches!(
            error,
            BuildError::Insn {
                address: 0,
                error: InsnError::StackUnderflow(_),
                ..
            }
        ));
    }

    #[test]
    fn falling_off_the_end() {
        let error = build("()V", MethodAccessFlags::STATIC, 0, |b| {
            b.op(op::NOP);
        })
        .unwrap_err();
        assert!(matches!(error, BuildError::CodeFallthrough));
    }

    #[test]
    fn handler_starts_with_exception() {
        let ir = build("()V", MethodAccessFlags::STATIC, 1, |b| {
            b.label("start")
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .label("end")
                .jump(op::GOTO, "out")
                .label("handler")
                .astore(0)
                .label("out")
                .op(op::RETURN)
                .try_catch("start", "end", "handler", Some("java/lang/Exception"));
        })
        .unwrap();
        let handler = ir.index_of(ir.exception_table[0].handler);
        let StmtKind::Assign { value, .. } = ir.stmts[handler].kind else {
            panic!("expected the exception to be stored");
        };
        assert!(matches!(ir.arena[value], Expr::CaughtException));
    }
}
