use super::{DebugIr, Expr, TempId};
use crate::locals::LocalVariable;
use core::fmt::{self, Display};
use core::ops::{Index, IndexMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Per-method expression storage.
///
/// Expressions refer to each other by `ExprId`. It's assumed that each expression is only referred
/// to from one place: rewrites may modify expressions in place without affecting other statements.
/// Values that are needed in several places are bound to a temporary and loaded explicitly.
#[derive(Debug, Default)]
pub struct Arena {
    exprs: Vec<Expr>,
    temp_count: u32,
    /// The class whose method this is, as an internal name. Used to shorten member references.
    pub owner: String,
    /// Filled in by the local variable reconstructor.
    pub locals: Vec<LocalVariable>,
}

impl Arena {
    pub fn new(owner: &str) -> Self {
        Self {
            exprs: Vec::new(),
            temp_count: 0,
            owner: owner.to_owned(),
            locals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn int(&mut self, value: i32) -> ExprId {
        self.alloc(Expr::Int(value))
    }

    pub fn null(&mut self) -> ExprId {
        self.alloc(Expr::Null)
    }

    pub fn new_temp(&mut self) -> TempId {
        self.temp_count += 1;
        TempId(self.temp_count - 1)
    }

    pub fn temp_count(&self) -> u32 {
        self.temp_count
    }

    pub fn temp(&mut self, temp: TempId) -> ExprId {
        self.alloc(Expr::Temp(temp))
    }

    /// Copies the subtree rooted at `id`, so that the copy can be attached somewhere else.
    pub fn deep_clone(&mut self, id: ExprId) -> ExprId {
        let mut expr = self[id].clone();
        for child in expr.children_mut() {
            *child = self.deep_clone(*child);
        }
        self.alloc(expr)
    }

    pub fn swap(&mut self, a: ExprId, b: ExprId) {
        self.exprs.swap(a.0 as usize, b.0 as usize);
    }

    /// Replaces the expression at `id`, returning the old one.
    pub fn replace(&mut self, id: ExprId, expr: Expr) -> Expr {
        core::mem::replace(&mut self[id], expr)
    }

    pub fn debug<'a, T: DebugIr + ?Sized>(&'a self, value: &'a T) -> impl Display {
        struct IrDisplay<'a, T: ?Sized> {
            value: &'a T,
            arena: &'a Arena,
        }

        impl<T: DebugIr + ?Sized> Display for IrDisplay<'_, T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                T::fmt(self.value, f, self.arena)
            }
        }

        IrDisplay { value, arena: self }
    }
}

impl Index<ExprId> for Arena {
    type Output = Expr;

    fn index(&self, id: ExprId) -> &Self::Output {
        &self.exprs[id.0 as usize]
    }
}

impl IndexMut<ExprId> for Arena {
    fn index_mut(&mut self, id: ExprId) -> &mut Self::Output {
        &mut self.exprs[id.0 as usize]
    }
}
