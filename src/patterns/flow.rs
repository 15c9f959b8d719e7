use super::{Reconstructor, Targets, TempUses, replace_range};
use crate::builder::MethodIr;
use crate::context::ClassContext;
use crate::ir::{Expr, LogicalOp, StmtKind};

/// Fuses chains of conditional jumps into `&&` and `||`.
///
/// `if (a) goto L; if (b) goto L;` is `if (a || b) goto L;`, and
/// `if (a) goto M; if (b) goto L; M:` is `if (!a && b) goto L;`. Longer chains fold pairwise.
pub struct Conditions;

impl Reconstructor for Conditions {
    fn name(&self) -> &'static str {
        "short-circuit conditions"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let targets = Targets::of(ir);
        for first in 0..ir.stmts.len().saturating_sub(2) {
            let second = first + 1;
            let StmtKind::If {
                condition: a,
                target: a_target,
            } = ir.stmts[first].kind
            else {
                continue;
            };
            let StmtKind::If {
                condition: b,
                target: b_target,
            } = ir.stmts[second].kind
            else {
                continue;
            };
            if targets.is_entry(ir, second) {
                continue;
            }

            let fused = if a_target == b_target {
                ir.arena.alloc(Expr::Logical {
                    op: LogicalOp::Or,
                    lhs: a,
                    rhs: b,
                })
            } else if ir.index_of(a_target) == second + 1 {
                let not_a = ir.arena.negate(a);
                ir.arena.alloc(Expr::Logical {
                    op: LogicalOp::And,
                    lhs: not_a,
                    rhs: b,
                })
            } else {
                continue;
            };
            replace_range(
                ir,
                first..second + 1,
                StmtKind::If {
                    condition: fused,
                    target: b_target,
                },
            );
            return true;
        }
        false
    }
}

/// `if (c) goto ELSE; tmp = a; goto END; ELSE: tmp = b; END:` becomes `tmp = !c ? a : b`.
///
/// When the branches don't shrink to a single assignment each, nothing happens and the temporary
/// is later displayed as an ordinary local assigned on both paths.
pub struct Ternaries;

impl Reconstructor for Ternaries {
    fn name(&self) -> &'static str {
        "ternaries"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let targets = Targets::of(ir);
        let uses = TempUses::collect(ir);
        for start in 0..ir.stmts.len().saturating_sub(4) {
            let StmtKind::If {
                condition,
                target: else_target,
            } = ir.stmts[start].kind
            else {
                continue;
            };
            let Some((temp, if_false)) = ir.stmts[start + 1].as_temp_assign(&ir.arena) else {
                continue;
            };
            let StmtKind::Goto(end_target) = ir.stmts[start + 2].kind else {
                continue;
            };
            let Some((else_temp, if_true)) = ir.stmts[start + 3].as_temp_assign(&ir.arena) else {
                continue;
            };
            if temp != else_temp || uses.def_count(temp) != 2 {
                continue;
            }
            // Both branches are entered only through the condition, and they join right after
            // the second assignment.
            let else_index = start + 3;
            if ir.index_of(else_target) != else_index
                || ir.index_of(end_target) != start + 4
                || targets.is_entry(ir, start + 1)
                || targets.is_entry(ir, start + 2)
                || jumps_into(ir, else_index) != 1
            {
                continue;
            }

            let condition = ir.arena.negate(condition);
            let ternary = ir.arena.alloc(Expr::Ternary {
                condition,
                branches: [if_false, if_true],
            });
            let target = ir.arena.temp(temp);
            replace_range(
                ir,
                start..start + 4,
                StmtKind::Assign {
                    target,
                    value: ternary,
                },
            );
            return true;
        }
        false
    }
}

/// Number of jumps and exception table edges that resolve to the statement at `index`.
fn jumps_into(ir: &MethodIr, index: usize) -> usize {
    let jumps = ir
        .stmts
        .iter()
        .flat_map(|stmt| stmt.jump_targets())
        .filter(|target| ir.index_of(*target) == index)
        .count();
    let ranges = ir
        .exception_table
        .iter()
        .flat_map(|entry| [entry.start, entry.end, entry.handler])
        .filter(|offset| ir.index_of(*offset) == index)
        .count();
    jumps + ranges
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Fixture, render};
    use super::*;
    use crate::model::MethodAccessFlags;
    use crate::testing::op;

    #[test]
    fn ternary_in_return() {
        // return x > 0 ? 1 : 2;
        let fixture = Fixture::new("(I)I", MethodAccessFlags::STATIC, 1, |b| {
            b.iload(0)
                .jump(op::IFLE, "else")
                .iconst(1)
                .jump(op::GOTO, "end")
                .label("else")
                .iconst(2)
                .label("end")
                .op(op::IRETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(Ternaries.run(&mut ir, &cx));
        assert_eq!(render(&ir), ["tmp0 = slot0 > 0 ? 1 : 2", "return tmp0"]);
        assert!(!Ternaries.run(&mut ir, &cx));
    }

    #[test]
    fn and_or_chains() {
        // if (a > 0 && b > 0) f(); return;
        let fixture = Fixture::new("(II)V", MethodAccessFlags::STATIC, 2, |b| {
            b.iload(0)
                .jump(op::IFLE, "end")
                .iload(1)
                .jump(op::IFLE, "end")
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .label("end")
                .op(op::RETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(Conditions.run(&mut ir, &cx));
        assert_eq!(
            render(&ir),
            ["if (slot0 <= 0 || slot1 <= 0) goto 13", "A.f()", "return"]
        );

        // if (a > 0 || b > 0) f(); return;
        let fixture = Fixture::new("(II)V", MethodAccessFlags::STATIC, 2, |b| {
            b.iload(0)
                .jump(op::IFGT, "body")
                .iload(1)
                .jump(op::IFLE, "end")
                .label("body")
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .label("end")
                .op(op::RETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(Conditions.run(&mut ir, &cx));
        assert_eq!(
            render(&ir),
            ["if (slot0 <= 0 && slot1 <= 0) goto 13", "A.f()", "return"]
        );
        assert!(!Conditions.run(&mut ir, &cx));
    }
}
