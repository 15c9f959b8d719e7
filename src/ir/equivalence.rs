//! Structural comparison of IR.
//!
//! Compilers replicate `finally` bodies at every exit of the protected region. The copies are
//! byte-for-byte identical in the common case, but they needn't be: each copy gets its own line
//! numbers, its own addresses, and possibly its own local slots for the values it saves. Two
//! statement lists are considered equivalent if there is a consistent renaming of locals and
//! temporaries that maps one onto the other, and if jumps within each list land on corresponding
//! statements.

use super::{Arena, CallKind, ConcatPart, Expr, ExprId, Stmt, StmtKind, TempId, VarId};
use rustc_hash::FxHashMap;

/// Strict equality: same locals, same temporaries, same constants.
pub fn exprs_equal(arena: &Arena, a: ExprId, b: ExprId) -> bool {
    Checker::new(arena, false).expr(a, b)
}

/// Equivalence up to renaming of locals/temporaries and relocation, ignoring line numbers.
pub fn stmts_equivalent(arena: &Arena, a: &[Stmt], b: &[Stmt]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let (Some(a_first), Some(b_first)) = (a.first(), b.first()) else {
        return true;
    };
    let mut checker = Checker::new(arena, true);
    checker.extents = Some((
        (a_first.offset, a.last().map_or(a_first.offset, |stmt| stmt.offset)),
        (b_first.offset, b.last().map_or(b_first.offset, |stmt| stmt.offset)),
    ));
    a.iter().zip(b).all(|(x, y)| checker.stmt(x, y))
}

struct Bijection<T> {
    forward: FxHashMap<T, T>,
    backward: FxHashMap<T, T>,
}

impl<T: Copy + Eq + core::hash::Hash> Bijection<T> {
    fn new() -> Self {
        Self {
            forward: FxHashMap::default(),
            backward: FxHashMap::default(),
        }
    }

    fn check(&mut self, x: T, y: T) -> bool {
        match (self.forward.get(&x), self.backward.get(&y)) {
            (None, None) => {
                self.forward.insert(x, y);
                self.backward.insert(y, x);
                true
            }
            (Some(mapped), Some(_)) => *mapped == y,
            _ => false,
        }
    }
}

struct Checker<'a> {
    arena: &'a Arena,
    renaming: bool,
    slots: Bijection<u16>,
    vars: Bijection<VarId>,
    temps: Bijection<TempId>,
    // Inclusive address ranges of the two lists being compared.
    extents: Option<((u32, u32), (u32, u32))>,
}

impl<'a> Checker<'a> {
    fn new(arena: &'a Arena, renaming: bool) -> Self {
        Self {
            arena,
            renaming,
            slots: Bijection::new(),
            vars: Bijection::new(),
            temps: Bijection::new(),
            extents: None,
        }
    }

    fn target(&self, x: u32, y: u32) -> bool {
        let Some(((x_start, x_end), (y_start, y_end))) = self.extents else {
            return x == y;
        };
        let x_inside = (x_start..=x_end).contains(&x);
        let y_inside = (y_start..=y_end).contains(&y);
        match (x_inside, y_inside) {
            (true, true) => x - x_start == y - y_start,
            (false, false) => x == y,
            _ => false,
        }
    }

    fn stmt(&mut self, x: &Stmt, y: &Stmt) -> bool {
        match (&x.kind, &y.kind) {
            (
                StmtKind::Assign {
                    target: xt,
                    value: xv,
                },
                StmtKind::Assign {
                    target: yt,
                    value: yv,
                },
            ) => self.expr(*xv, *yv) && self.expr(*xt, *yt),
            (
                StmtKind::MultiAssign {
                    targets: xt,
                    value: xv,
                },
                StmtKind::MultiAssign {
                    targets: yt,
                    value: yv,
                },
            ) => self.expr(*xv, *yv) && self.exprs(xt, yt),
            (StmtKind::Expr(x), StmtKind::Expr(y))
            | (StmtKind::Throw(x), StmtKind::Throw(y))
            | (StmtKind::MonitorEnter(x), StmtKind::MonitorEnter(y))
            | (StmtKind::MonitorExit(x), StmtKind::MonitorExit(y)) => self.expr(*x, *y),
            (StmtKind::Return(x), StmtKind::Return(y)) => match (x, y) {
                (None, None) => true,
                (Some(x), Some(y)) => self.expr(*x, *y),
                _ => false,
            },
            (
                StmtKind::If {
                    condition: xc,
                    target: xt,
                },
                StmtKind::If {
                    condition: yc,
                    target: yt,
                },
            ) => self.target(*xt, *yt) && self.expr(*xc, *yc),
            (StmtKind::Goto(x), StmtKind::Goto(y)) | (StmtKind::Jsr(x), StmtKind::Jsr(y)) => {
                self.target(*x, *y)
            }
            (StmtKind::Ret(x), StmtKind::Ret(y)) => self.slot(*x, *y),
            (
                StmtKind::Switch {
                    key: xk,
                    default: xd,
                    cases: xc,
                },
                StmtKind::Switch {
                    key: yk,
                    default: yd,
                    cases: yc,
                },
            ) => {
                self.expr(*xk, *yk)
                    && self.target(*xd, *yd)
                    && xc.len() == yc.len()
                    && xc
                        .iter()
                        .zip(yc)
                        .all(|((xv, xt), (yv, yt))| xv == yv && self.target(*xt, *yt))
            }
            _ => false,
        }
    }

    fn slot(&mut self, x: u16, y: u16) -> bool {
        if self.renaming {
            self.slots.check(x, y)
        } else {
            x == y
        }
    }

    fn exprs(&mut self, x: &[ExprId], y: &[ExprId]) -> bool {
        x.len() == y.len() && x.iter().zip(y).all(|(x, y)| self.expr(*x, *y))
    }

    fn opt_expr(&mut self, x: Option<ExprId>, y: Option<ExprId>) -> bool {
        match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => self.expr(x, y),
            _ => false,
        }
    }

    fn parts(&mut self, x: &[ConcatPart], y: &[ConcatPart]) -> bool {
        x.len() == y.len()
            && x
                .iter()
                .zip(y)
                .all(|(x, y)| x.ty == y.ty && self.expr(x.value, y.value))
    }

    fn call_kind(&mut self, x: &CallKind, y: &CallKind) -> bool {
        match (x, y) {
            (CallKind::Static, CallKind::Static) | (CallKind::Dynamic, CallKind::Dynamic) => true,
            (CallKind::Virtual { object: x }, CallKind::Virtual { object: y })
            | (CallKind::Special { object: x }, CallKind::Special { object: y })
            | (CallKind::Interface { object: x }, CallKind::Interface { object: y }) => {
                self.expr(*x, *y)
            }
            _ => false,
        }
    }

    fn expr(&mut self, x: ExprId, y: ExprId) -> bool {
        let arena = self.arena;
        match (&arena[x], &arena[y]) {
            (Expr::This, Expr::This)
            | (Expr::Null, Expr::Null)
            | (Expr::CaughtException, Expr::CaughtException)
            | (Expr::ReturnAddress, Expr::ReturnAddress) => true,
            (Expr::OuterThis { class: x }, Expr::OuterThis { class: y }) => x == y,
            (
                Expr::Slot {
                    index: xi,
                    kind: xk,
                    ..
                },
                Expr::Slot {
                    index: yi,
                    kind: yk,
                    ..
                },
            ) => xk == yk && self.slot(*xi, *yi),
            (Expr::Var(x), Expr::Var(y)) => {
                if self.renaming {
                    let same_type = arena.locals.get(x.0 as usize).map(|local| &local.ty)
                        == arena.locals.get(y.0 as usize).map(|local| &local.ty);
                    same_type && self.vars.check(*x, *y)
                } else {
                    x == y
                }
            }
            (Expr::Temp(x), Expr::Temp(y)) => {
                if self.renaming {
                    self.temps.check(*x, *y)
                } else {
                    x == y
                }
            }
            (Expr::Bool(x), Expr::Bool(y)) => x == y,
            (Expr::Int(x), Expr::Int(y)) => x == y,
            (Expr::Long(x), Expr::Long(y)) => x == y,
            (Expr::Float(x), Expr::Float(y)) => x.to_bits() == y.to_bits(),
            (Expr::Double(x), Expr::Double(y)) => x.to_bits() == y.to_bits(),
            (Expr::String(x), Expr::String(y)) | (Expr::MethodType(x), Expr::MethodType(y)) => {
                x == y
            }
            (Expr::Class(x), Expr::Class(y)) => x == y,
            (
                Expr::MethodHandle {
                    owner: xo,
                    name: xn,
                },
                Expr::MethodHandle {
                    owner: yo,
                    name: yn,
                },
            ) => xo == yo && xn == yn,
            (
                Expr::Dynamic {
                    name: xn,
                    descriptor: xd,
                },
                Expr::Dynamic {
                    name: yn,
                    descriptor: yd,
                },
            ) => xn == yn && xd == yd,
            (
                Expr::Field {
                    object: xo,
                    class: xc,
                    name: xn,
                    descriptor: xd,
                },
                Expr::Field {
                    object: yo,
                    class: yc,
                    name: yn,
                    descriptor: yd,
                },
            ) => xc == yc && xn == yn && xd == yd && self.opt_expr(*xo, *yo),
            (
                Expr::ArrayElement {
                    array: xa,
                    index: xi,
                },
                Expr::ArrayElement {
                    array: ya,
                    index: yi,
                },
            ) => self.expr(*xa, *ya) && self.expr(*xi, *yi),
            (Expr::ArrayLength { array: x }, Expr::ArrayLength { array: y })
            | (Expr::Neg(x), Expr::Neg(y))
            | (Expr::Not(x), Expr::Not(y)) => self.expr(*x, *y),
            (
                Expr::NewArray {
                    ty: xt,
                    lengths: xl,
                },
                Expr::NewArray {
                    ty: yt,
                    lengths: yl,
                },
            ) => xt == yt && self.exprs(xl, yl),
            (
                Expr::NewArrayInit {
                    ty: xt,
                    elements: xe,
                },
                Expr::NewArrayInit {
                    ty: yt,
                    elements: ye,
                },
            ) => xt == yt && self.exprs(xe, ye),
            (Expr::NewUninitialized { class: x }, Expr::NewUninitialized { class: y }) => x == y,
            (
                Expr::InvokeNew {
                    class: xc,
                    descriptor: xd,
                    arguments: xa,
                },
                Expr::InvokeNew {
                    class: yc,
                    descriptor: yd,
                    arguments: ya,
                },
            ) => xc == yc && xd == yd && self.exprs(xa, ya),
            (
                Expr::Call {
                    class: xc,
                    name: xn,
                    descriptor: xd,
                    kind: xk,
                    arguments: xa,
                },
                Expr::Call {
                    class: yc,
                    name: yn,
                    descriptor: yd,
                    kind: yk,
                    arguments: ya,
                },
            ) => xc == yc && xn == yn && xd == yd && self.call_kind(xk, yk) && self.exprs(xa, ya),
            (
                Expr::InstanceOf {
                    object: xo,
                    class: xc,
                },
                Expr::InstanceOf {
                    object: yo,
                    class: yc,
                },
            ) => xc == yc && self.expr(*xo, *yo),
            (Expr::Cast { value: xv, to: xt }, Expr::Cast { value: yv, to: yt }) => {
                xt == yt && self.expr(*xv, *yv)
            }
            (
                Expr::Convert {
                    value: xv,
                    from: xf,
                    to: xt,
                },
                Expr::Convert {
                    value: yv,
                    from: yf,
                    to: yt,
                },
            ) => xf == yf && xt == yt && self.expr(*xv, *yv),
            (
                Expr::Binary {
                    op: xo,
                    lhs: xl,
                    rhs: xr,
                },
                Expr::Binary {
                    op: yo,
                    lhs: yl,
                    rhs: yr,
                },
            ) => xo == yo && self.expr(*xl, *yl) && self.expr(*xr, *yr),
            (
                Expr::Compare {
                    kind: xk,
                    nan_is_greater: xn,
                    lhs: xl,
                    rhs: xr,
                },
                Expr::Compare {
                    kind: yk,
                    nan_is_greater: yn,
                    lhs: yl,
                    rhs: yr,
                },
            ) => xk == yk && xn == yn && self.expr(*xl, *yl) && self.expr(*xr, *yr),
            (
                Expr::Logical {
                    op: xo,
                    lhs: xl,
                    rhs: xr,
                },
                Expr::Logical {
                    op: yo,
                    lhs: yl,
                    rhs: yr,
                },
            ) => xo == yo && self.expr(*xl, *yl) && self.expr(*xr, *yr),
            (
                Expr::Ternary {
                    condition: xc,
                    branches: xb,
                },
                Expr::Ternary {
                    condition: yc,
                    branches: yb,
                },
            ) => self.expr(*xc, *yc) && self.exprs(xb, yb),
            (
                Expr::Increment {
                    target: xt,
                    prefix: xp,
                    decrement: xd,
                },
                Expr::Increment {
                    target: yt,
                    prefix: yp,
                    decrement: yd,
                },
            ) => xp == yp && xd == yd && self.expr(*xt, *yt),
            (
                Expr::CompoundAssign {
                    target: xt,
                    op: xo,
                    value: xv,
                },
                Expr::CompoundAssign {
                    target: yt,
                    op: yo,
                    value: yv,
                },
            ) => xo == yo && self.expr(*xt, *yt) && self.expr(*xv, *yv),
            (
                Expr::Assign {
                    target: xt,
                    value: xv,
                },
                Expr::Assign {
                    target: yt,
                    value: yv,
                },
            ) => self.expr(*xt, *yt) && self.expr(*xv, *yv),
            (Expr::StringConcat { parts: x }, Expr::StringConcat { parts: y }) => self.parts(x, y),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Kind;

    fn slot(arena: &mut Arena, index: u16) -> ExprId {
        arena.alloc(Expr::Slot {
            index,
            kind: Kind::Int,
            offset: 0,
        })
    }

    fn assign(arena: &mut Arena, offset: u32, line: u32, target: u16, value: i32) -> Stmt {
        let target = slot(arena, target);
        let value = arena.int(value);
        Stmt::new(offset, Some(line), StmtKind::Assign { target, value })
    }

    #[test]
    fn copies_with_renamed_slots_match() {
        let mut arena = Arena::new("Test");
        let a = vec![assign(&mut arena, 10, 5, 3, 1), assign(&mut arena, 12, 6, 4, 2)];
        let b = vec![assign(&mut arena, 40, 5, 5, 1), assign(&mut arena, 42, 9, 6, 2)];
        assert!(stmts_equivalent(&arena, &a, &b));

        // The renaming must be consistent.
        let c = vec![assign(&mut arena, 40, 5, 5, 1), assign(&mut arena, 42, 6, 5, 2)];
        assert!(!stmts_equivalent(&arena, &a, &c));
    }

    #[test]
    fn jumps_compare_relatively() {
        let arena = Arena::new("Test");
        let a = vec![
            Stmt::new(10, None, StmtKind::Goto(12)),
            Stmt::new(12, None, StmtKind::Return(None)),
        ];
        let b = vec![
            Stmt::new(30, None, StmtKind::Goto(32)),
            Stmt::new(32, None, StmtKind::Return(None)),
        ];
        let c = vec![
            Stmt::new(30, None, StmtKind::Goto(12)),
            Stmt::new(32, None, StmtKind::Return(None)),
        ];
        assert!(stmts_equivalent(&arena, &a, &b));
        assert!(!stmts_equivalent(&arena, &a, &c));
    }

    #[test]
    fn strict_equality_distinguishes_slots() {
        let mut arena = Arena::new("Test");
        let x = slot(&mut arena, 1);
        let y = slot(&mut arena, 1);
        let z = slot(&mut arena, 2);
        assert!(exprs_equal(&arena, x, y));
        assert!(!exprs_equal(&arena, x, z));
    }
}
