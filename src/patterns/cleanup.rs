//! Final touches applied once local variables have types.

use crate::builder::MethodIr;
use crate::descriptor::{MethodDescriptor, Type};
use crate::ir::{Arena, BinOp, Expr, ExprId, StmtKind};

/// Removes redundant casts and turns the `int` encoding of booleans back into booleans.
pub fn cleanup(ir: &mut MethodIr) {
    let returns_boolean = ir.descriptor.return_type.is_boolean();
    for index in 0..ir.stmts.len() {
        let roots = ir.stmts[index].exprs();
        for root in roots {
            simplify(&mut ir.arena, root);
        }

        match ir.stmts[index].kind.clone() {
            StmtKind::Expr(value) => {
                if let Expr::Assign { target, value } = ir.arena[value] {
                    ir.stmts[index].kind = StmtKind::Assign { target, value };
                }
            }
            StmtKind::Assign { target, value } => {
                if ir.arena.is_boolean(target) {
                    to_boolean(&mut ir.arena, value);
                }
            }
            StmtKind::MultiAssign { targets, value } => {
                if targets.first().is_some_and(|target| ir.arena.is_boolean(*target)) {
                    to_boolean(&mut ir.arena, value);
                }
            }
            StmtKind::Return(Some(value)) if returns_boolean => to_boolean(&mut ir.arena, value),
            _ => {}
        }
    }
}

/// Rewrites the subtree bottom-up.
fn simplify(arena: &mut Arena, id: ExprId) {
    for child in arena[id].children() {
        simplify(arena, child);
    }

    match arena[id].clone() {
        Expr::Cast { value, to } => {
            if arena.type_of(value).as_ref() == Some(&to) {
                let inner = arena[value].clone();
                arena.replace(id, inner);
            } else if let Expr::Cast { value: inner, to: inner_to } = &arena[value]
                && *inner_to == to
            {
                let inner = *inner;
                arena.replace(id, Expr::Cast { value: inner, to });
            }
        }
        // `flag == 0` is `!flag`
        Expr::Binary { op, lhs, rhs } if matches!(op, BinOp::Eq | BinOp::Ne) && arena.is_boolean(lhs) => {
            let literal = match arena[rhs] {
                Expr::Int(value @ (0 | 1)) => value == 1,
                Expr::Bool(value) => value,
                _ => return,
            };
            let keeps = (op == BinOp::Eq) == literal;
            let replacement = if keeps { lhs } else { arena.negate(lhs) };
            let expr = arena[replacement].clone();
            arena.replace(id, expr);
        }
        Expr::Assign { target, value } if arena.is_boolean(target) => to_boolean(arena, value),
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
            let Ok(descriptor) = MethodDescriptor::parse(&descriptor) else {
                return;
            };
            for (argument, parameter) in arguments.iter().zip(&descriptor.parameters) {
                if *parameter == Type::BOOLEAN {
                    to_boolean(arena, *argument);
                }
            }
        }
        _ => {}
    }
}

/// Rewrites an `int`-encoded value used where a boolean is expected.
fn to_boolean(arena: &mut Arena, id: ExprId) {
    let truth = |arena: &Arena, id: ExprId| match arena[id] {
        Expr::Int(value @ (0 | 1)) => Some(value == 1),
        Expr::Bool(value) => Some(value),
        _ => None,
    };
    match arena[id] {
        Expr::Int(value @ (0 | 1)) => {
            arena.replace(id, Expr::Bool(value == 1));
        }
        Expr::Ternary {
            condition,
            branches: [if_true, if_false],
        } => match (truth(arena, if_true), truth(arena, if_false)) {
            (Some(true), Some(false)) => {
                let expr = arena[condition].clone();
                arena.replace(id, expr);
            }
            (Some(false), Some(true)) => {
                let negated = arena.negate(condition);
                let expr = arena[negated].clone();
                arena.replace(id, expr);
            }
            _ => {
                to_boolean(arena, if_true);
                to_boolean(arena, if_false);
            }
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Fixture, render};
    use super::*;
    use crate::locals;
    use crate::model::MethodAccessFlags;
    use crate::patterns::reconstruct;
    use crate::testing::op;

    #[test]
    fn comparison_result_is_boolean() {
        // return a > b;
        let fixture = Fixture::new("(II)Z", MethodAccessFlags::STATIC, 2, |b| {
            b.iload(0)
                .iload(1)
                .jump(op::IF_ICMPLE, "no")
                .iconst(1)
                .jump(op::GOTO, "end")
                .label("no")
                .iconst(0)
                .label("end")
                .op(op::IRETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        reconstruct(&mut ir, &cx);
        locals::reconstruct(&mut ir, cx.parameter_hints(&fixture.class.methods[0]), &fixture.config);
        cleanup(&mut ir);
        let rendered = render(&ir);
        assert_eq!(rendered.len(), 1, "{rendered:?}");
        assert!(rendered[0].starts_with("return "), "{rendered:?}");
        assert_eq!(rendered[0], "return paramInt1 > paramInt2");
    }

    #[test]
    fn boolean_compared_with_zero() {
        // static boolean flag; if (!flag) f();
        let fixture = Fixture::new("()V", MethodAccessFlags::STATIC, 0, |b| {
            b.field(op::GETSTATIC, "Test", "flag", "Z")
                .jump(op::IFNE, "end")
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .label("end")
                .op(op::RETURN);
        });
        let mut ir = fixture.build();
        cleanup(&mut ir);
        assert_eq!(render(&ir), ["if (flag) goto 9", "A.f()", "return"]);
    }
}
