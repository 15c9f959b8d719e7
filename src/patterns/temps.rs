use super::{Reconstructor, Targets, TempUses, absorb_previous, can_substitute, substitute};
use crate::builder::MethodIr;
use crate::context::ClassContext;
use crate::ir::{Expr, StmtKind};

/// Drops values that are computed and thrown away without any effect, and turns stores into
/// temporaries that are never read into plain evaluations.
pub struct DiscardedValues;

impl Reconstructor for DiscardedValues {
    fn name(&self) -> &'static str {
        "discarded values"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let uses = TempUses::collect(ir);
        for index in 0..ir.stmts.len() {
            match ir.stmts[index].kind {
                StmtKind::Expr(value) if !ir.arena.has_side_effects(value) => {
                    ir.stmts.remove(index);
                    return true;
                }
                StmtKind::Assign { target, value } => {
                    let Expr::Temp(temp) = ir.arena[target] else {
                        continue;
                    };
                    if uses.use_count(temp) > 0
                        || matches!(ir.arena[value], Expr::NewUninitialized { .. })
                    {
                        continue;
                    }
                    if ir.arena.has_side_effects(value) {
                        ir.stmts[index].kind = StmtKind::Expr(value);
                    } else {
                        ir.stmts.remove(index);
                    }
                    return true;
                }
                _ => {}
            }
        }
        false
    }
}

/// Substitutes temporaries that are assigned once and read once.
pub struct InlineTemps;

impl Reconstructor for InlineTemps {
    fn name(&self) -> &'static str {
        "temporary inlining"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let uses = TempUses::collect(ir);
        let targets = Targets::of(ir);
        for (&temp, defs) in &uses.defs {
            let [def] = defs[..] else {
                continue;
            };
            let [user] = uses.uses(temp)[..] else {
                continue;
            };
            let Some((_, value)) = ir.stmts[def].as_temp_assign(&ir.arena) else {
                continue;
            };
            if user <= def || matches!(ir.arena[value], Expr::NewUninitialized { .. }) {
                continue;
            }
            if targets.splits(ir, def..user + 1) {
                continue;
            }

            let roots = ir.stmts[user].exprs();
            let movable = matches!(
                ir.arena[value],
                Expr::This | Expr::OuterThis { .. } | Expr::Null | Expr::Class(_)
            ) || ir.arena[value].is_constant();
            if user == def + 1 && can_substitute(&ir.arena, &roots, temp) {
                for root in roots {
                    if substitute(&mut ir.arena, root, temp, value) {
                        break;
                    }
                }
                absorb_previous(ir, def);
                return true;
            }
            if movable {
                for root in roots {
                    if substitute(&mut ir.arena, root, temp, value) {
                        break;
                    }
                }
                ir.stmts.remove(def);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Fixture, render};
    use super::*;
    use crate::model::MethodAccessFlags;
    use crate::testing::op;

    #[test]
    fn unused_call_result_is_evaluated() {
        // f(); with the int result popped
        let fixture = Fixture::new("()V", MethodAccessFlags::STATIC, 0, |b| {
            b.invoke(op::INVOKESTATIC, "A", "f", "()I")
                .op(op::POP)
                .iconst(5)
                .op(op::POP)
                .op(op::RETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(DiscardedValues.run(&mut ir, &cx));
        assert_eq!(render(&ir), ["A.f()", "return"]);
        assert!(!DiscardedValues.run(&mut ir, &cx));
    }

    #[test]
    fn temporary_read_twice_stays() {
        // x = y = f();
        let fixture = Fixture::new("()V", MethodAccessFlags::STATIC, 2, |b| {
            b.invoke(op::INVOKESTATIC, "A", "f", "()I")
                .op(op::DUP)
                .istore(0)
                .istore(1)
                .op(op::RETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        let before = render(&ir);
        assert_eq!(before.len(), 4, "{before:?}");
        // Two reads: nothing to inline.
        assert!(!InlineTemps.run(&mut ir, &cx));
    }
}
