use super::{Arena, ExprId};
use crate::bytecode::{ArithOp, Cmp, Kind};
use crate::descriptor::{PrimitiveType, Type};
use core::fmt;
use displaydoc::Display;

/// A synthetic binding introduced for values that are used more than once on the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into `Arena::locals`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Clone, Debug)]
pub enum Expr {
    This,
    /// `Outer.this` inside a non-static inner class.
    OuterThis {
        class: String,
    },
    /// A local slot access before local variables have been reconstructed. `offset` is the address
    /// of the instruction that accessed the slot.
    Slot {
        index: u16,
        kind: Kind,
        offset: u32,
    },
    Var(VarId),
    Temp(TempId),
    /// The exception object at the start of a handler.
    CaughtException,
    /// The value `jsr` pushes.
    ReturnAddress,
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(Type),
    MethodType(String),
    MethodHandle {
        owner: String,
        name: String,
    },
    Dynamic {
        name: String,
        descriptor: String,
    },
    Field {
        // `None` for static fields
        object: Option<ExprId>,
        class: String,
        name: String,
        // JVM bytecode allows fields with equal names but different types to co-exist.
        descriptor: String,
    },
    ArrayElement {
        array: ExprId,
        index: ExprId,
    },
    ArrayLength {
        array: ExprId,
    },
    NewArray {
        // The type of the whole array, which may have more dimensions than `lengths`.
        ty: Type,
        lengths: Vec<ExprId>,
    },
    /// `new int[] { ... }`.
    NewArrayInit {
        ty: Type,
        elements: Vec<ExprId>,
    },
    NewUninitialized {
        class: String,
    },
    InvokeNew {
        class: String,
        descriptor: String,
        arguments: Vec<ExprId>,
    },
    Call {
        class: String,
        name: String,
        // Retained to pick the correct overload and to type arguments.
        descriptor: String,
        kind: CallKind,
        arguments: Vec<ExprId>,
    },
    InstanceOf {
        object: ExprId,
        class: Type,
    },
    Cast {
        value: ExprId,
        to: Type,
    },
    Convert {
        value: ExprId,
        from: PrimitiveType,
        to: PrimitiveType,
    },
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// `lcmp`/`fcmp?`/`dcmp?` that hasn't been fused into a condition.
    Compare {
        kind: Kind,
        nan_is_greater: bool,
        lhs: ExprId,
        rhs: ExprId,
    },
    Neg(ExprId),
    Not(ExprId),
    Logical {
        op: LogicalOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Ternary {
        condition: ExprId,
        branches: [ExprId; 2], // [if_true, if_false]
    },
    Increment {
        target: ExprId,
        prefix: bool,
        decrement: bool,
    },
    CompoundAssign {
        target: ExprId,
        op: BinOp,
        value: ExprId,
    },
    Assign {
        target: ExprId,
        value: ExprId,
    },
    StringConcat {
        parts: Vec<ConcatPart>,
    },
}

#[derive(Clone, Debug)]
pub struct ConcatPart {
    pub value: ExprId,
    // The `append` overload used. `char` appends must stay chars, and an `Object` append of
    // a `String` must not be confused with string addition.
    pub ty: Type,
}

#[derive(Clone, Copy, Debug)]
pub enum CallKind {
    Static,
    Virtual { object: ExprId },
    Special { object: ExprId },
    Interface { object: ExprId },
    Dynamic,
}

impl CallKind {
    pub fn object(&self) -> Option<ExprId> {
        match self {
            Self::Virtual { object } | Self::Special { object } | Self::Interface { object } => {
                Some(*object)
            }
            Self::Static | Self::Dynamic => None,
        }
    }

    pub fn object_mut(&mut self) -> Option<&mut ExprId> {
        match self {
            Self::Virtual { object } | Self::Special { object } | Self::Interface { object } => {
                Some(object)
            }
            Self::Static | Self::Dynamic => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Ushr => ">>>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::Le => "<=",
        }
    }

    pub fn from_arith(op: ArithOp) -> Self {
        match op {
            ArithOp::Add => Self::Add,
            ArithOp::Sub => Self::Sub,
            ArithOp::Mul => Self::Mul,
            ArithOp::Div => Self::Div,
            ArithOp::Rem => Self::Rem,
            ArithOp::Shl => Self::Shl,
            ArithOp::Shr => Self::Shr,
            ArithOp::Ushr => Self::Ushr,
            ArithOp::And => Self::And,
            ArithOp::Or => Self::Or,
            ArithOp::Xor => Self::Xor,
        }
    }

    pub fn from_cmp(cmp: Cmp) -> Self {
        match cmp {
            Cmp::Eq => Self::Eq,
            Cmp::Ne => Self::Ne,
            Cmp::Lt => Self::Lt,
            Cmp::Ge => Self::Ge,
            Cmp::Gt => Self::Gt,
            Cmp::Le => Self::Le,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Ge | Self::Gt | Self::Le
        )
    }

    pub fn negated(self) -> Option<Self> {
        Some(match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            _ => return None,
        })
    }

    pub fn precedence(self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 12,
            Self::Add | Self::Sub => 11,
            Self::Shl | Self::Shr | Self::Ushr => 10,
            Self::Lt | Self::Ge | Self::Gt | Self::Le => 9,
            Self::Eq | Self::Ne => 8,
            Self::And => 7,
            Self::Xor => 6,
            Self::Or => 5,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// &&
    And,
    /// ||
    Or,
}

impl Expr {
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Self::Slot { .. }
                | Self::Var(_)
                | Self::Temp(_)
                | Self::Field { .. }
                | Self::ArrayElement { .. }
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Self::Null
                | Self::Bool(_)
                | Self::Int(_)
                | Self::Long(_)
                | Self::Float(_)
                | Self::Double(_)
                | Self::String(_)
                | Self::Class(_)
        )
    }

    /// Direct subexpressions in evaluation order.
    pub fn children(&self) -> Vec<ExprId> {
        let mut out = Vec::new();
        match self {
            Self::This
            | Self::OuterThis { .. }
            | Self::Slot { .. }
            | Self::Var(_)
            | Self::Temp(_)
            | Self::CaughtException
            | Self::ReturnAddress
            | Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Long(_)
            | Self::Float(_)
            | Self::Double(_)
            | Self::String(_)
            | Self::Class(_)
            | Self::MethodType(_)
            | Self::MethodHandle { .. }
            | Self::Dynamic { .. }
            | Self::NewUninitialized { .. } => {}
            Self::Field { object, .. } => out.extend(*object),
            Self::ArrayElement { array, index } => out.extend([*array, *index]),
            Self::ArrayLength { array } => out.push(*array),
            Self::NewArray { lengths, .. } => out.extend(lengths),
            Self::NewArrayInit { elements, .. } => out.extend(elements),
            Self::InvokeNew { arguments, .. } => out.extend(arguments),
            Self::Call {
                kind, arguments, ..
            } => {
                out.extend(kind.object());
                out.extend(arguments);
            }
            Self::InstanceOf { object: value, .. }
            | Self::Cast { value, .. }
            | Self::Convert { value, .. }
            | Self::Neg(value)
            | Self::Not(value) => out.push(*value),
            Self::Binary { lhs, rhs, .. }
            | Self::Compare { lhs, rhs, .. }
            | Self::Logical { lhs, rhs, .. } => out.extend([*lhs, *rhs]),
            Self::Ternary {
                condition,
                branches,
            } => {
                out.push(*condition);
                out.extend(branches);
            }
            Self::Increment { target, .. } => out.push(*target),
            Self::CompoundAssign { target, value, .. } | Self::Assign { target, value } => {
                out.extend([*target, *value])
            }
            Self::StringConcat { parts } => out.extend(parts.iter().map(|part| part.value)),
        }
        out
    }

    pub fn children_mut(&mut self) -> Vec<&mut ExprId> {
        let mut out = Vec::new();
        match self {
            Self::This
            | Self::OuterThis { .. }
            | Self::Slot { .. }
            | Self::Var(_)
            | Self::Temp(_)
            | Self::CaughtException
            | Self::ReturnAddress
            | Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Long(_)
            | Self::Float(_)
            | Self::Double(_)
            | Self::String(_)
            | Self::Class(_)
            | Self::MethodType(_)
            | Self::MethodHandle { .. }
            | Self::Dynamic { .. }
            | Self::NewUninitialized { .. } => {}
            Self::Field { object, .. } => out.extend(object.as_mut()),
            Self::ArrayElement { array, index } => {
                out.push(array);
                out.push(index);
            }
            Self::ArrayLength { array } => out.push(array),
            Self::NewArray { lengths, .. } => out.extend(lengths.iter_mut()),
            Self::NewArrayInit { elements, .. } => out.extend(elements.iter_mut()),
            Self::InvokeNew { arguments, .. } => out.extend(arguments.iter_mut()),
            Self::Call {
                kind, arguments, ..
            } => {
                out.extend(kind.object_mut());
                out.extend(arguments.iter_mut());
            }
            Self::InstanceOf { object: value, .. }
            | Self::Cast { value, .. }
            | Self::Convert { value, .. }
            | Self::Neg(value)
            | Self::Not(value) => out.push(value),
            Self::Binary { lhs, rhs, .. }
            | Self::Compare { lhs, rhs, .. }
            | Self::Logical { lhs, rhs, .. } => {
                out.push(lhs);
                out.push(rhs);
            }
            Self::Ternary {
                condition,
                branches,
            } => {
                out.push(condition);
                out.extend(branches.iter_mut());
            }
            Self::Increment { target, .. } => out.push(target),
            Self::CompoundAssign { target, value, .. } | Self::Assign { target, value } => {
                out.push(target);
                out.push(value);
            }
            Self::StringConcat { parts } => out.extend(parts.iter_mut().map(|part| &mut part.value)),
        }
        out
    }
}

impl Arena {
    /// Calls `f` on every node of the subtree in pre-order.
    pub fn walk(&self, root: ExprId, f: &mut impl FnMut(ExprId, &Expr)) {
        let expr = &self[root];
        f(root, expr);
        for child in expr.children() {
            self.walk(child, f);
        }
    }

    pub fn any(&self, root: ExprId, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(root, &mut |_, expr| found |= pred(expr));
        found
    }

    /// Finds the first node (in evaluation order) matching `pred`.
    pub fn find(&self, root: ExprId, pred: &mut impl FnMut(&Expr) -> bool) -> Option<ExprId> {
        let mut found = None;
        self.walk(root, &mut |id, expr| {
            if found.is_none() && pred(expr) {
                found = Some(id);
            }
        });
        found
    }

    /// Whether evaluating the expression may have an effect other than producing a value.
    /// Null dereferences and failing casts don't count.
    pub fn has_side_effects(&self, root: ExprId) -> bool {
        self.any(root, &mut |expr| {
            matches!(
                expr,
                Expr::Call { .. }
                    | Expr::InvokeNew { .. }
                    | Expr::Increment { .. }
                    | Expr::CompoundAssign { .. }
                    | Expr::Assign { .. }
                    | Expr::StringConcat { .. }
            )
        })
    }

    /// Whether the expression reads the given local slot (before local reconstruction).
    pub fn reads_slot(&self, root: ExprId, slot: u16) -> bool {
        self.any(
            root,
            &mut |expr| matches!(expr, Expr::Slot { index, .. } if *index == slot),
        )
    }

    pub fn uses_temp(&self, root: ExprId, temp: TempId) -> bool {
        self.any(root, &mut |expr| matches!(expr, Expr::Temp(t) if *t == temp))
    }

    pub fn uses_var(&self, root: ExprId, var: VarId) -> bool {
        self.any(root, &mut |expr| matches!(expr, Expr::Var(v) if *v == var))
    }

    /// A negated copy of a condition, pushing the negation inwards where it reads better.
    pub fn negate(&mut self, condition: ExprId) -> ExprId {
        match self[condition].clone() {
            Expr::Not(inner) => inner,
            Expr::Bool(value) => self.alloc(Expr::Bool(!value)),
            Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
                let op = op.negated().unwrap_or(op);
                self.alloc(Expr::Binary { op, lhs, rhs })
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.negate(lhs);
                let rhs = self.negate(rhs);
                let op = match op {
                    LogicalOp::And => LogicalOp::Or,
                    LogicalOp::Or => LogicalOp::And,
                };
                self.alloc(Expr::Logical { op, lhs, rhs })
            }
            _ => self.alloc(Expr::Not(condition)),
        }
    }
}
