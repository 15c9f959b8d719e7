use super::{Arena, BinOp, Expr, ExprId};
use crate::bytecode::Kind;
use crate::descriptor::{MethodDescriptor, PrimitiveType, Type};

impl Arena {
    /// The static type of an expression, as far as it can be determined locally. `None` means
    /// unknown (e.g. `null` or an untyped temporary).
    pub fn type_of(&self, id: ExprId) -> Option<Type> {
        Some(match &self[id] {
            Expr::This => Type::object(&self.owner),
            Expr::OuterThis { class } => Type::object(class),
            Expr::Slot { kind, .. } => kind_type(*kind)?,
            Expr::Var(var) => self.locals.get(var.0 as usize)?.ty.resolved()?,
            Expr::Temp(_) | Expr::ReturnAddress | Expr::Null | Expr::Dynamic { .. } => {
                return None;
            }
            Expr::CaughtException => Type::object("java/lang/Throwable"),
            Expr::Bool(_) => Type::BOOLEAN,
            Expr::Int(_) => Type::INT,
            Expr::Long(_) => Type::Primitive(PrimitiveType::Long),
            Expr::Float(_) => Type::Primitive(PrimitiveType::Float),
            Expr::Double(_) => Type::Primitive(PrimitiveType::Double),
            Expr::String(_) | Expr::StringConcat { .. } => Type::object("java/lang/String"),
            Expr::Class(_) => Type::object("java/lang/Class"),
            Expr::MethodType(_) => Type::object("java/lang/invoke/MethodType"),
            Expr::MethodHandle { .. } => Type::object("java/lang/invoke/MethodHandle"),
            Expr::Field { descriptor, .. } => Type::parse(descriptor).ok()?,
            Expr::ArrayElement { array, .. } => self.type_of(*array)?.element_type()?.clone(),
            Expr::ArrayLength { .. } | Expr::Compare { .. } => Type::INT,
            Expr::NewArray { ty, .. } | Expr::NewArrayInit { ty, .. } => ty.clone(),
            Expr::NewUninitialized { class } | Expr::InvokeNew { class, .. } => Type::object(class),
            Expr::Call { descriptor, .. } => {
                let return_type = MethodDescriptor::parse(descriptor).ok()?.return_type;
                if return_type == Type::Void {
                    return None;
                }
                return_type
            }
            Expr::InstanceOf { .. } | Expr::Not(_) | Expr::Logical { .. } => Type::BOOLEAN,
            Expr::Cast { to, .. } => to.clone(),
            Expr::Convert { to, .. } => Type::Primitive(*to),
            Expr::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    Type::BOOLEAN
                } else if matches!(op, BinOp::And | BinOp::Or | BinOp::Xor)
                    && self.type_of(*lhs).is_some_and(|ty| ty.is_boolean())
                    && self.type_of(*rhs).is_some_and(|ty| ty.is_boolean())
                {
                    Type::BOOLEAN
                } else {
                    promote(self.type_of(*lhs)?)
                }
            }
            Expr::Neg(value) => promote(self.type_of(*value)?),
            Expr::Ternary { branches, .. } => self
                .type_of(branches[0])
                .or_else(|| self.type_of(branches[1]))?,
            Expr::Increment { target, .. }
            | Expr::CompoundAssign { target, .. }
            | Expr::Assign { target, .. } => self.type_of(*target)?,
        })
    }

    pub fn is_boolean(&self, id: ExprId) -> bool {
        self.type_of(id).is_some_and(|ty| ty.is_boolean())
    }
}

pub fn kind_type(kind: Kind) -> Option<Type> {
    match kind {
        Kind::Reference => None,
        _ => Some(Type::Primitive(kind.primitive()?)),
    }
}

/// Binary numeric promotion of a single operand.
fn promote(ty: Type) -> Type {
    match ty.as_primitive() {
        Some(primitive) if primitive.is_int_like() => Type::INT,
        _ => ty,
    }
}
