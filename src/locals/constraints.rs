//! Narrowing of int-category locals to `boolean`/`byte`/`char`/`short`/`int`.
//!
//! The JVM doesn't distinguish these types for locals, so each int-category variable starts with
//! the full candidate set, and every assignment and use removes the candidates it's incompatible
//! with. Copies between two variables intersect both sets. The sets only ever shrink, and an
//! update that would empty a set is ignored, so the fixpoint terminates; the iteration cap is just
//! a hard ceiling.

use super::VarType;
use crate::builder::MethodIr;
use crate::descriptor::{MethodDescriptor, PrimitiveType, Type};
use crate::ir::{Arena, BinOp, Expr, ExprId, StmtKind, VarId};
use bitflags::bitflags;
use rustc_hash::FxHashMap;

bitflags! {
    pub struct IntSet: u8 {
        const BOOLEAN = 0x01;
        const BYTE = 0x02;
        const CHAR = 0x04;
        const SHORT = 0x08;
        const INT = 0x10;
    }
}

impl IntSet {
    pub fn single(primitive: PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::Boolean => Self::BOOLEAN,
            PrimitiveType::Byte => Self::BYTE,
            PrimitiveType::Char => Self::CHAR,
            PrimitiveType::Short => Self::SHORT,
            _ => Self::INT,
        }
    }

    /// Types a literal fits into.
    pub fn literal(value: i32) -> Self {
        let mut set = Self::INT;
        if value == 0 || value == 1 {
            set |= Self::BOOLEAN;
        }
        if i8::try_from(value).is_ok() {
            set |= Self::BYTE;
        }
        if u16::try_from(value).is_ok() {
            set |= Self::CHAR;
        }
        if i16::try_from(value).is_ok() {
            set |= Self::SHORT;
        }
        set
    }

    /// Types a variable may have if a value of one of `self` types is assigned to it.
    pub fn assignable_from(self) -> Self {
        let mut out = Self::empty();
        for (member, widened) in [
            (Self::BOOLEAN, Self::BOOLEAN),
            (Self::BYTE, Self::BYTE | Self::SHORT | Self::INT),
            (Self::CHAR, Self::CHAR | Self::INT),
            (Self::SHORT, Self::SHORT | Self::INT),
            (Self::INT, Self::INT),
        ] {
            if self.contains(member) {
                out |= widened;
            }
        }
        out
    }

    /// Types a variable may have if it's used where a `primitive` is expected.
    pub fn usable_as(primitive: PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::Boolean => Self::BOOLEAN,
            PrimitiveType::Byte => Self::BYTE,
            PrimitiveType::Char => Self::CHAR,
            PrimitiveType::Short => Self::BYTE | Self::SHORT,
            _ => Self::BYTE | Self::CHAR | Self::SHORT | Self::INT,
        }
    }

    pub fn resolve(self) -> PrimitiveType {
        if self.bits().count_ones() == 1 || self.contains(Self::INT) {
            for (member, primitive) in [
                (Self::INT, PrimitiveType::Int),
                (Self::BOOLEAN, PrimitiveType::Boolean),
                (Self::BYTE, PrimitiveType::Byte),
                (Self::CHAR, PrimitiveType::Char),
                (Self::SHORT, PrimitiveType::Short),
            ] {
                if self.contains(member) {
                    return primitive;
                }
            }
        }
        for (member, primitive) in [
            (Self::BOOLEAN, PrimitiveType::Boolean),
            (Self::BYTE, PrimitiveType::Byte),
            (Self::CHAR, PrimitiveType::Char),
            (Self::SHORT, PrimitiveType::Short),
        ] {
            if self.contains(member) {
                return primitive;
            }
        }
        PrimitiveType::Int
    }
}

struct Solver<'a> {
    arena: &'a Arena,
    sets: FxHashMap<VarId, IntSet>,
    changed: bool,
}

impl Solver<'_> {
    fn narrow(&mut self, var: VarId, allowed: IntSet) {
        if let Some(set) = self.sets.get_mut(&var) {
            let narrowed = *set & allowed;
            if !narrowed.is_empty() && narrowed != *set {
                *set = narrowed;
                self.changed = true;
            }
        }
    }

    fn unify(&mut self, a: VarId, b: VarId) {
        let (Some(x), Some(y)) = (self.sets.get(&a), self.sets.get(&b)) else {
            return;
        };
        let meet = *x & *y;
        if !meet.is_empty() {
            self.narrow(a, meet);
            self.narrow(b, meet);
        }
    }

    fn var(&self, id: ExprId) -> Option<VarId> {
        match self.arena[id] {
            Expr::Var(var) if self.sets.contains_key(&var) => Some(var),
            _ => None,
        }
    }

    fn value_set(&self, id: ExprId) -> IntSet {
        match &self.arena[id] {
            Expr::Int(value) => IntSet::literal(*value),
            Expr::Bool(_)
            | Expr::InstanceOf { .. }
            | Expr::Not(_)
            | Expr::Logical { .. } => IntSet::BOOLEAN,
            Expr::Var(var) => match self.sets.get(var) {
                Some(set) => *set,
                None => self.typed_set(id),
            },
            Expr::Binary { op, lhs, rhs } => match op {
                _ if op.is_comparison() => IntSet::BOOLEAN,
                BinOp::And | BinOp::Or | BinOp::Xor => {
                    let both = self.value_set(*lhs) & self.value_set(*rhs);
                    if both.contains(IntSet::BOOLEAN) {
                        IntSet::BOOLEAN | IntSet::INT
                    } else {
                        IntSet::INT
                    }
                }
                _ => IntSet::INT,
            },
            Expr::Neg(_) | Expr::Compare { .. } | Expr::ArrayLength { .. } => IntSet::INT,
            Expr::Ternary { branches, .. } => {
                self.value_set(branches[0]) | self.value_set(branches[1])
            }
            Expr::Assign { target, .. }
            | Expr::CompoundAssign { target, .. }
            | Expr::Increment { target, .. } => self.value_set(*target),
            _ => self.typed_set(id),
        }
    }

    fn typed_set(&self, id: ExprId) -> IntSet {
        match self.arena.type_of(id).and_then(|ty| ty.as_primitive()) {
            Some(primitive) if primitive.is_int_like() => IntSet::single(primitive),
            _ => IntSet::all(),
        }
    }

    fn use_as(&mut self, id: ExprId, ty: Option<&Type>) {
        if let Some(var) = self.var(id)
            && let Some(primitive) = ty.and_then(|ty| ty.as_primitive())
            && primitive.is_int_like()
        {
            self.narrow(var, IntSet::usable_as(primitive));
        }
    }

    fn assignment(&mut self, target: ExprId, value: ExprId) {
        if let Some(var) = self.var(target) {
            let allowed = self.value_set(value).assignable_from();
            self.narrow(var, allowed);
            if let Some(source) = self.var(value) {
                self.unify(var, source);
            }
        } else {
            let ty = self.arena.type_of(target);
            self.use_as(value, ty.as_ref());
        }
    }

    fn visit(&mut self, id: ExprId) {
        let arena = self.arena;
        match &arena[id] {
            Expr::Call {
                descriptor,
                arguments,
                ..
            }
            | Expr::InvokeNew {
                descriptor,
                arguments,
                ..
            } => {
                if let Ok(descriptor) = MethodDescriptor::parse(descriptor) {
                    for (argument, parameter) in arguments.iter().zip(&descriptor.parameters) {
                        self.use_as(*argument, Some(parameter));
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Eq | BinOp::Ne => {
                    if let (Some(a), Some(b)) = (self.var(*lhs), self.var(*rhs)) {
                        self.unify(a, b);
                    }
                }
                BinOp::And | BinOp::Or | BinOp::Xor => {}
                _ => {
                    self.use_as(*lhs, Some(&Type::INT));
                    self.use_as(*rhs, Some(&Type::INT));
                }
            },
            Expr::Neg(value) => self.use_as(*value, Some(&Type::INT)),
            Expr::ArrayElement { index, .. } => self.use_as(*index, Some(&Type::INT)),
            Expr::NewArray { lengths, .. } => {
                for length in lengths {
                    self.use_as(*length, Some(&Type::INT));
                }
            }
            Expr::NewArrayInit { ty, elements } => {
                let element = ty.element_type().cloned();
                for value in elements {
                    self.use_as(*value, element.as_ref());
                }
            }
            Expr::CompoundAssign { target, .. } | Expr::Increment { target, .. } => {
                self.use_as(*target, Some(&Type::INT));
            }
            Expr::Assign { target, value } => self.assignment(*target, *value),
            _ => {}
        }
        for child in arena[id].children() {
            self.visit(child);
        }
    }
}

/// Narrows every int-category variable in `vars` and stores the resolved type.
pub fn solve_ints(ir: &mut MethodIr, vars: &[VarId], max_iterations: usize) {
    let sets = vars
        .iter()
        .map(|var| {
            let set = match &ir.arena.locals[var.0 as usize].ty {
                VarType::Ints(set) => *set,
                _ => IntSet::all(),
            };
            (*var, set)
        })
        .collect();
    let return_type = ir.descriptor.return_type.clone();

    let mut solver = Solver {
        arena: &ir.arena,
        sets,
        changed: true,
    };
    let mut iterations = 0;
    while solver.changed && iterations < max_iterations {
        solver.changed = false;
        iterations += 1;
        for stmt in &ir.stmts {
            match &stmt.kind {
                StmtKind::Assign { target, value } => solver.assignment(*target, *value),
                StmtKind::MultiAssign { targets, value } => {
                    for target in targets {
                        solver.assignment(*target, *value);
                    }
                }
                StmtKind::Return(Some(value)) => solver.use_as(*value, Some(&return_type)),
                StmtKind::Switch { key, .. } => solver.use_as(*key, Some(&Type::INT)),
                _ => {}
            }
            for root in stmt.exprs() {
                solver.visit(root);
            }
        }
        log::trace!("Int narrowing iteration {iterations}: {:?}", solver.sets);
    }
    if solver.changed {
        log::debug!("Int narrowing didn't converge in {}.{}", ir.class_name, ir.name);
    }

    let sets = solver.sets;
    for (var, set) in sets {
        ir.arena.locals[var.0 as usize].ty = VarType::Resolved(Type::Primitive(set.resolve()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_sets() {
        assert_eq!(IntSet::literal(1), IntSet::all());
        assert_eq!(
            IntSet::literal(200),
            IntSet::CHAR | IntSet::SHORT | IntSet::INT
        );
        assert_eq!(IntSet::literal(-1), IntSet::BYTE | IntSet::SHORT | IntSet::INT);
        assert_eq!(IntSet::literal(70000), IntSet::INT);
    }

    #[test]
    fn widening() {
        assert_eq!(
            IntSet::BYTE.assignable_from(),
            IntSet::BYTE | IntSet::SHORT | IntSet::INT
        );
        assert_eq!(IntSet::BOOLEAN.assignable_from(), IntSet::BOOLEAN);
        assert_eq!(IntSet::literal(5).assignable_from(), IntSet::literal(5));
    }

    #[test]
    fn resolution() {
        assert_eq!(IntSet::all().resolve(), PrimitiveType::Int);
        assert_eq!(IntSet::BOOLEAN.resolve(), PrimitiveType::Boolean);
        assert_eq!((IntSet::BYTE | IntSet::SHORT).resolve(), PrimitiveType::Byte);
        assert_eq!(IntSet::empty().resolve(), PrimitiveType::Int);
    }
}
