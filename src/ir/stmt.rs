use super::{Arena, Expr, ExprId};

#[derive(Clone, Debug)]
pub struct Stmt {
    /// Address of the first instruction this statement was built from. Non-decreasing along the
    /// statement list; several statements may share an address if one instruction produced more
    /// than one of them.
    pub offset: u32,
    pub line: Option<u32>,
    pub kind: StmtKind,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Assign {
        target: ExprId,
        value: ExprId,
    },
    /// `a = b = value`. Targets are listed in the order they are assigned, innermost first.
    MultiAssign {
        targets: Vec<ExprId>,
        value: ExprId,
    },
    Expr(ExprId),
    Return(Option<ExprId>),
    Throw(ExprId),
    MonitorEnter(ExprId),
    MonitorExit(ExprId),
    /// Jump to `target` if `condition` holds.
    If {
        condition: ExprId,
        target: u32,
    },
    Goto(u32),
    Jsr(u32),
    Ret(u16),
    Switch {
        key: ExprId,
        default: u32,
        cases: Vec<(i32, u32)>,
    },
}

impl Stmt {
    pub fn new(offset: u32, line: Option<u32>, kind: StmtKind) -> Self {
        Self { offset, line, kind }
    }

    /// Root expressions of the statement, in evaluation order.
    pub fn exprs(&self) -> Vec<ExprId> {
        match &self.kind {
            StmtKind::Assign { target, value } => vec![*target, *value],
            StmtKind::MultiAssign { targets, value } => {
                let mut out = targets.clone();
                out.push(*value);
                out
            }
            StmtKind::Expr(value)
            | StmtKind::Throw(value)
            | StmtKind::MonitorEnter(value)
            | StmtKind::MonitorExit(value)
            | StmtKind::If {
                condition: value, ..
            }
            | StmtKind::Switch { key: value, .. } => vec![*value],
            StmtKind::Return(value) => value.iter().copied().collect(),
            StmtKind::Goto(_) | StmtKind::Jsr(_) | StmtKind::Ret(_) => Vec::new(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut ExprId> {
        match &mut self.kind {
            StmtKind::Assign { target, value } => vec![target, value],
            StmtKind::MultiAssign { targets, value } => {
                let mut out: Vec<&mut ExprId> = targets.iter_mut().collect();
                out.push(value);
                out
            }
            StmtKind::Expr(value)
            | StmtKind::Throw(value)
            | StmtKind::MonitorEnter(value)
            | StmtKind::MonitorExit(value)
            | StmtKind::If {
                condition: value, ..
            }
            | StmtKind::Switch { key: value, .. } => vec![value],
            StmtKind::Return(value) => value.iter_mut().collect(),
            StmtKind::Goto(_) | StmtKind::Jsr(_) | StmtKind::Ret(_) => Vec::new(),
        }
    }

    pub fn jump_targets(&self) -> Vec<u32> {
        match &self.kind {
            StmtKind::If { target, .. } | StmtKind::Goto(target) | StmtKind::Jsr(target) => {
                vec![*target]
            }
            StmtKind::Switch { default, cases, .. } => core::iter::once(*default)
                .chain(cases.iter().map(|(_, target)| *target))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether control can reach the next statement in the list.
    pub fn can_fallthrough(&self) -> bool {
        !matches!(
            self.kind,
            StmtKind::Return(_)
                | StmtKind::Throw(_)
                | StmtKind::Goto(_)
                | StmtKind::Ret(_)
                | StmtKind::Switch { .. }
        )
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::If { .. } | StmtKind::Goto(_) | StmtKind::Jsr(_) | StmtKind::Switch { .. }
        )
    }

    /// Retargets jumps to `from` so that they go to `to` instead.
    pub fn retarget(&mut self, from: u32, to: u32) {
        let fix = |target: &mut u32| {
            if *target == from {
                *target = to;
            }
        };
        match &mut self.kind {
            StmtKind::If { target, .. } | StmtKind::Goto(target) | StmtKind::Jsr(target) => {
                fix(target)
            }
            StmtKind::Switch { default, cases, .. } => {
                fix(default);
                for (_, target) in cases {
                    fix(target);
                }
            }
            _ => {}
        }
    }

    /// Whether the statement assigns to exactly the given temporary, returning the value.
    pub fn as_temp_assign(&self, arena: &Arena) -> Option<(super::TempId, ExprId)> {
        match self.kind {
            StmtKind::Assign { target, value } => match arena[target] {
                Expr::Temp(temp) => Some((temp, value)),
                _ => None,
            },
            _ => None,
        }
    }
}
