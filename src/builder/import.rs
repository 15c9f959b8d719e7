use super::machine::{Machine, StackUnderflowError};
use crate::bytecode::{Cmp, IfOperand, Instruction, InvokeKind, Kind};
use crate::descriptor::{DescriptorError, MethodDescriptor, Type};
use crate::ir::{BinOp, CallKind, Expr, ExprId, StmtKind};
use crate::model::{ConstantPool, Loadable, MemberRef, PoolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsnError {
    #[error("Accessed more elements than there are in the stack")]
    StackUnderflow(#[from] StackUnderflowError),

    #[error("Instruction splits a long or double value on the stack")]
    SplitWide,

    #[error("ldc instruction accessed a constant of an invalid type")]
    InvalidLdc,

    #[error("ldc2 instruction accessed a constant of an invalid type")]
    InvalidLdc2,

    #[error("Stack size at the jump to {0} doesn't match other predecessors")]
    InconsistentStackSize(u32),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

fn field(object: Option<ExprId>, member: &MemberRef<'_>) -> Expr {
    Expr::Field {
        object,
        class: member.class.to_owned(),
        name: member.name.to_owned(),
        descriptor: member.descriptor.to_owned(),
    }
}

impl Machine<'_> {
    #[must_use = "returns a statement that needs to be emitted manually"]
    fn assign(&mut self, target: Expr, value: ExprId) -> StmtKind {
        let target = self.arena.alloc(target);
        StmtKind::Assign { target, value }
    }

    fn slot(&self, kind: Kind, index: u16, offset: u32) -> Expr {
        Expr::Slot {
            index,
            kind,
            offset,
        }
    }

    fn pop_arguments(&mut self, descriptor: &MethodDescriptor) -> Result<Vec<ExprId>, InsnError> {
        let mut arguments = Vec::with_capacity(descriptor.parameters.len());
        for parameter in descriptor.parameters.iter().rev() {
            let value = self.pop()?;
            if value.width != parameter.width() {
                return Err(InsnError::SplitWide);
            }
            arguments.push(value.expr);
        }
        arguments.reverse();
        Ok(arguments)
    }

    /// Pushes the call if it returns a value, emits it otherwise.
    fn push_or_emit_call(&mut self, call: Expr, return_type: &Type, is_constructor: bool) {
        let call = self.arena.alloc(call);
        if return_type == &Type::Void || is_constructor {
            self.emit(StmtKind::Expr(call));
        } else {
            self.push_id(call, return_type.width());
        }
    }

    fn invoke(&mut self, pool: &ConstantPool, kind: InvokeKind, index: u16) -> Result<(), InsnError> {
        let member = pool.method_ref(index)?;
        let descriptor = MethodDescriptor::parse(member.descriptor)?;
        let arguments = self.pop_arguments(&descriptor)?;
        let kind = match kind {
            InvokeKind::Static => CallKind::Static,
            InvokeKind::Virtual => CallKind::Virtual {
                object: self.pop_expr()?,
            },
            InvokeKind::Special => CallKind::Special {
                object: self.pop_expr()?,
            },
            InvokeKind::Interface => CallKind::Interface {
                object: self.pop_expr()?,
            },
        };
        let call = Expr::Call {
            class: member.class.to_owned(),
            name: member.name.to_owned(),
            descriptor: member.descriptor.to_owned(),
            kind,
            arguments,
        };
        self.push_or_emit_call(call, &descriptor.return_type, member.name == "<init>");
        Ok(())
    }

    fn condition(&mut self, cmp: Cmp, operand: IfOperand) -> Result<ExprId, InsnError> {
        let op = BinOp::from_cmp(cmp);
        let (lhs, rhs) = match operand {
            IfOperand::Zero => {
                let value = self.pop_expr()?;
                // `lcmp; ifXX` is a single comparison in the source.
                if let Expr::Compare { lhs, rhs, .. } = self.arena[value] {
                    (lhs, rhs)
                } else {
                    (value, self.arena.int(0))
                }
            }
            IfOperand::Null => {
                let value = self.pop_expr()?;
                (value, self.arena.null())
            }
            IfOperand::IntPair | IfOperand::ReferencePair => {
                let rhs = self.pop_expr()?;
                let lhs = self.pop_expr()?;
                (lhs, rhs)
            }
        };
        Ok(self.arena.alloc(Expr::Binary { op, lhs, rhs }))
    }

    fn ldc(&mut self, pool: &ConstantPool, index: u16, wide: bool) -> Result<(), InsnError> {
        let invalid = if wide {
            InsnError::InvalidLdc2
        } else {
            InsnError::InvalidLdc
        };
        let (expr, width) = match pool.loadable(index)? {
            Loadable::Integer(value) => (Expr::Int(value), 1),
            Loadable::Float(value) => (Expr::Float(value), 1),
            Loadable::Long(value) => (Expr::Long(value), 2),
            Loadable::Double(value) => (Expr::Double(value), 2),
            Loadable::String(value) => (Expr::String(value.to_owned()), 1),
            Loadable::Class(name) => (Expr::Class(Type::from_class_operand(name)?), 1),
            Loadable::MethodType(descriptor) => (Expr::MethodType(descriptor.to_owned()), 1),
            Loadable::MethodHandle { member, .. } => (
                Expr::MethodHandle {
                    owner: member.class.to_owned(),
                    name: member.name.to_owned(),
                },
                1,
            ),
            Loadable::Dynamic { name, descriptor } => (
                Expr::Dynamic {
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                },
                Type::parse(descriptor)?.width(),
            ),
        };
        if (width == 2) != wide {
            return Err(invalid);
        }
        self.push(expr, width);
        Ok(())
    }

    /// Symbolically executes a single instruction.
    pub fn execute(&mut self, pool: &ConstantPool, insn: &Instruction) -> Result<(), InsnError> {
        let current = self.current();
        let next = self.next();

        match insn {
            Instruction::Nop => {}
            Instruction::AConstNull => self.push(Expr::Null, 1),
            Instruction::IntConst(value) => self.push(Expr::Int(*value), 1),
            Instruction::LongConst(value) => self.push(Expr::Long(*value), 2),
            Instruction::FloatConst(value) => self.push(Expr::Float(*value), 1),
            Instruction::DoubleConst(value) => self.push(Expr::Double(*value), 2),
            Instruction::Ldc(index) => self.ldc(pool, *index, false)?,
            Instruction::Ldc2(index) => self.ldc(pool, *index, true)?,

            Instruction::Load { kind, index } => {
                let slot = self.slot(*kind, *index, current);
                self.push(slot, kind.width());
            }
            Instruction::Store { kind, index } => {
                let value = self.pop()?;
                if value.width != kind.width() {
                    return Err(InsnError::SplitWide);
                }
                // The variable becomes live after the store, which is where debug info starts
                // its scope.
                let target = self.slot(*kind, *index, next);
                let stmt = self.assign(target, value.expr);
                self.emit(stmt);
            }
            Instruction::Iinc { index, delta } => {
                let target = self.slot(Kind::Int, *index, current);
                let target = self.arena.alloc(target);
                let op = if *delta < 0 { BinOp::Sub } else { BinOp::Add };
                let value = self.arena.int(i32::from(*delta).abs());
                let expr = self.arena.alloc(Expr::CompoundAssign { target, op, value });
                self.emit(StmtKind::Expr(expr));
            }

            Instruction::ArrayLoad(kind) => {
                let index = self.pop_expr()?;
                let array = self.pop_expr()?;
                self.push(Expr::ArrayElement { array, index }, kind.width());
            }
            Instruction::ArrayStore(_) => {
                let value = self.pop_expr()?;
                let index = self.pop_expr()?;
                let array = self.pop_expr()?;
                let stmt = self.assign(Expr::ArrayElement { array, index }, value);
                self.emit(stmt);
            }

            Instruction::Pop | Instruction::Pop2 => {
                let width = if matches!(insn, Instruction::Pop) { 1 } else { 2 };
                for value in self.pop_width(width)? {
                    if !matches!(self.arena[value.expr], Expr::Temp(_)) {
                        self.emit(StmtKind::Expr(value.expr));
                    }
                }
            }
            Instruction::Dup => self.dup(1, 0)?,
            Instruction::DupX1 => self.dup(1, 1)?,
            Instruction::DupX2 => self.dup(1, 2)?,
            Instruction::Dup2 => self.dup(2, 0)?,
            Instruction::Dup2X1 => self.dup(2, 1)?,
            Instruction::Dup2X2 => self.dup(2, 2)?,
            Instruction::Swap => self.swap()?,

            Instruction::Arith { op, kind } => {
                let rhs = self.pop_expr()?;
                let lhs = self.pop_expr()?;
                let op = BinOp::from_arith(*op);
                self.push(Expr::Binary { op, lhs, rhs }, kind.width());
            }
            Instruction::Neg(kind) => {
                let value = self.pop_expr()?;
                self.push(Expr::Neg(value), kind.width());
            }
            Instruction::Convert { from, to } => {
                let value = self.pop_expr()?;
                let expr = Expr::Convert {
                    value,
                    from: *from,
                    to: *to,
                };
                self.push(expr, to.width());
            }
            Instruction::Compare {
                kind,
                nan_is_greater,
            } => {
                let rhs = self.pop_expr()?;
                let lhs = self.pop_expr()?;
                let expr = Expr::Compare {
                    kind: *kind,
                    nan_is_greater: *nan_is_greater,
                    lhs,
                    rhs,
                };
                self.push(expr, 1);
            }

            Instruction::If {
                cmp,
                operand,
                target,
            } => {
                let condition = self.condition(*cmp, *operand)?;
                self.jump_to(*target)?;
                self.emit(StmtKind::If {
                    condition,
                    target: *target,
                });
            }
            Instruction::Goto(target) => {
                self.jump_to(*target)?;
                self.emit(StmtKind::Goto(*target));
            }
            Instruction::Jsr(target) => {
                self.jump_to_subroutine(*target)?;
                self.emit(StmtKind::Jsr(*target));
            }
            Instruction::Ret(index) => self.emit(StmtKind::Ret(*index)),
            Instruction::TableSwitch {
                default,
                low,
                targets,
            } => {
                let key = self.pop_expr()?;
                let cases: Vec<(i32, u32)> = targets
                    .iter()
                    .enumerate()
                    .map(|(i, target)| (low.wrapping_add(i as i32), *target))
                    .filter(|(_, target)| target != default)
                    .collect();
                self.switch(key, *default, cases)?;
            }
            Instruction::LookupSwitch { default, pairs } => {
                let key = self.pop_expr()?;
                self.switch(key, *default, pairs.clone())?;
            }
            Instruction::Return(kind) => {
                let value = match kind {
                    Some(_) => Some(self.pop_expr()?),
                    None => None,
                };
                self.emit(StmtKind::Return(value));
            }
            Instruction::AThrow => {
                let value = self.pop_expr()?;
                self.emit(StmtKind::Throw(value));
            }

            Instruction::GetStatic(index) => {
                let member = pool.field_ref(*index)?;
                let width = Type::parse(member.descriptor)?.width();
                self.push(field(None, &member), width);
            }
            Instruction::PutStatic(index) => {
                let member = pool.field_ref(*index)?;
                let value = self.pop_expr()?;
                let stmt = self.assign(field(None, &member), value);
                self.emit(stmt);
            }
            Instruction::GetField(index) => {
                let member = pool.field_ref(*index)?;
                let width = Type::parse(member.descriptor)?.width();
                let object = self.pop_expr()?;
                self.push(field(Some(object), &member), width);
            }
            Instruction::PutField(index) => {
                let member = pool.field_ref(*index)?;
                let value = self.pop_expr()?;
                let object = self.pop_expr()?;
                let stmt = self.assign(field(Some(object), &member), value);
                self.emit(stmt);
            }
            Instruction::Invoke { kind, index } => self.invoke(pool, *kind, *index)?,
            Instruction::InvokeDynamic(index) => {
                let (name, descriptor) = pool.invoke_dynamic(*index)?;
                let parsed = MethodDescriptor::parse(descriptor)?;
                let arguments = self.pop_arguments(&parsed)?;
                let call = Expr::Call {
                    class: String::new(),
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                    kind: CallKind::Dynamic,
                    arguments,
                };
                self.push_or_emit_call(call, &parsed.return_type, false);
            }

            Instruction::New(index) => {
                let class = pool.class_name(*index)?.to_owned();
                self.push(Expr::NewUninitialized { class }, 1);
            }
            Instruction::NewArray(element) => {
                let length = self.pop_expr()?;
                let ty = Type::Array(Box::new(Type::Primitive(*element)));
                self.push(
                    Expr::NewArray {
                        ty,
                        lengths: vec![length],
                    },
                    1,
                );
            }
            Instruction::ANewArray(index) => {
                let element = Type::from_class_operand(pool.class_name(*index)?)?;
                let length = self.pop_expr()?;
                let ty = Type::Array(Box::new(element));
                self.push(
                    Expr::NewArray {
                        ty,
                        lengths: vec![length],
                    },
                    1,
                );
            }
            Instruction::MultiANewArray { index, dimensions } => {
                let ty = Type::from_class_operand(pool.class_name(*index)?)?;
                let mut lengths = Vec::new();
                for _ in 0..*dimensions {
                    lengths.push(self.pop_expr()?);
                }
                lengths.reverse();
                self.push(Expr::NewArray { ty, lengths }, 1);
            }
            Instruction::ArrayLength => {
                let array = self.pop_expr()?;
                self.push(Expr::ArrayLength { array }, 1);
            }
            Instruction::CheckCast(index) => {
                let to = Type::from_class_operand(pool.class_name(*index)?)?;
                let value = self.pop_expr()?;
                self.push(Expr::Cast { value, to }, 1);
            }
            Instruction::InstanceOf(index) => {
                let class = Type::from_class_operand(pool.class_name(*index)?)?;
                let object = self.pop_expr()?;
                self.push(Expr::InstanceOf { object, class }, 1);
            }
            Instruction::MonitorEnter => {
                let value = self.pop_expr()?;
                self.emit(StmtKind::MonitorEnter(value));
            }
            Instruction::MonitorExit => {
                let value = self.pop_expr()?;
                self.emit(StmtKind::MonitorExit(value));
            }
        }
        Ok(())
    }

    fn switch(&mut self, key: ExprId, default: u32, cases: Vec<(i32, u32)>) -> Result<(), InsnError> {
        self.jump_to(default)?;
        for (_, target) in &cases {
            self.jump_to(*target)?;
        }
        self.emit(StmtKind::Switch {
            key,
            default,
            cases,
        });
        Ok(())
    }
}
