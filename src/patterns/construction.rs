use super::{Reconstructor, Targets};
use crate::builder::MethodIr;
use crate::context::ClassContext;
use crate::descriptor::{PrimitiveType, Type};
use crate::ir::{Arena, CallKind, Expr, ExprId, StmtKind, TempId};

/// Folds `tmp = new C; ...; tmp.<init>(args)` into `tmp = new C(args)`.
///
/// The allocation is moved down to the constructor call. That's not observable: an uninitialized
/// object can't be used for anything but calling its constructor.
pub struct Construction;

impl Reconstructor for Construction {
    fn name(&self) -> &'static str {
        "object construction"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let targets = Targets::of(ir);
        for index in 0..ir.stmts.len() {
            let StmtKind::Expr(call) = ir.stmts[index].kind else {
                continue;
            };
            let Some(object) = constructor_receiver(&ir.arena, call) else {
                continue;
            };

            match ir.arena[object] {
                // Constructed without ever being bound, i.e. the result is discarded.
                Expr::NewUninitialized { .. } => {
                    let new = into_invoke_new(&mut ir.arena, call, object);
                    ir.stmts[index].kind = StmtKind::Expr(new);
                    return true;
                }
                Expr::Temp(temp) => {
                    let Some(alloc) = find_allocation(ir, temp, index) else {
                        continue;
                    };
                    if targets.splits(ir, alloc..index + 1) {
                        continue;
                    }
                    let StmtKind::Assign {
                        target,
                        value: uninit,
                    } = ir.stmts[alloc].kind
                    else {
                        continue;
                    };
                    let new = into_invoke_new(&mut ir.arena, call, uninit);
                    ir.stmts[index].kind = StmtKind::Assign { target, value: new };
                    // Keep the line of the `new`, which is what the source line was.
                    let removed = ir.stmts.remove(alloc);
                    let stmt = &mut ir.stmts[index - 1];
                    stmt.line = removed.line.or(stmt.line);
                    return true;
                }
                _ => {}
            }
        }
        false
    }
}

/// The object `<init>` is called on, unless it's `this` (which is a `super(...)`/`this(...)` call).
fn constructor_receiver(arena: &Arena, call: ExprId) -> Option<ExprId> {
    match &arena[call] {
        Expr::Call {
            name,
            kind: CallKind::Special { object },
            ..
        } if name == "<init>" && !matches!(arena[*object], Expr::This) => Some(*object),
        _ => None,
    }
}

/// The `tmp = new C` statement before `before` that allocated `temp`.
fn find_allocation(ir: &MethodIr, temp: TempId, before: usize) -> Option<usize> {
    (0..before).rev().find(|index| {
        ir.stmts[*index]
            .as_temp_assign(&ir.arena)
            .is_some_and(|(t, value)| {
                t == temp && matches!(ir.arena[value], Expr::NewUninitialized { .. })
            })
    })
}

fn into_invoke_new(arena: &mut Arena, call: ExprId, uninit: ExprId) -> ExprId {
    let Expr::NewUninitialized { class } = arena[uninit].clone() else {
        return call;
    };
    let Expr::Call {
        descriptor,
        arguments,
        ..
    } = arena[call].clone()
    else {
        return call;
    };
    arena.alloc(Expr::InvokeNew {
        class,
        descriptor,
        arguments,
    })
}

/// Folds `tmp = new T[n]; tmp[0] = a; tmp[1] = b; ...` into `tmp = new T[] {a, b, ...}`.
pub struct ArrayInitializers;

impl Reconstructor for ArrayInitializers {
    fn name(&self) -> &'static str {
        "array initializers"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let targets = Targets::of(ir);
        for index in 0..ir.stmts.len() {
            let Some((temp, value)) = ir.stmts[index].as_temp_assign(&ir.arena) else {
                continue;
            };
            let Expr::NewArray { ty, lengths } = &ir.arena[value] else {
                continue;
            };
            let [length] = lengths[..] else {
                continue;
            };
            let Expr::Int(length) = ir.arena[length] else {
                continue;
            };
            let Ok(length) = usize::try_from(length) else {
                continue;
            };
            let ty = ty.clone();

            let mut stores = Vec::new();
            let mut next = index + 1;
            while next < ir.stmts.len() && !targets.is_entry(ir, next) {
                let Some((position, element)) = element_store(&ir.arena, &ir.stmts[next].kind, temp)
                else {
                    break;
                };
                let in_order = stores.last().is_none_or(|(last, _)| position > *last);
                if !in_order || position >= length || ir.arena.uses_temp(element, temp) {
                    break;
                }
                stores.push((position, element));
                next += 1;
            }
            // Trailing elements are never left out, only default ones in the middle.
            if stores.last().is_none_or(|(last, _)| *last + 1 != length) {
                continue;
            }

            let element_type = ty.element_type().cloned().unwrap_or_else(Type::java_lang_object);
            let mut elements = Vec::with_capacity(length);
            let mut stores = stores.into_iter().peekable();
            for position in 0..length {
                match stores.next_if(|(at, _)| *at == position) {
                    Some((_, element)) => elements.push(element),
                    None => elements.push(default_value(&mut ir.arena, &element_type)),
                }
            }
            let init = ir.arena.alloc(Expr::NewArrayInit { ty, elements });
            let StmtKind::Assign { value, .. } = &mut ir.stmts[index].kind else {
                continue;
            };
            *value = init;
            ir.stmts.drain(index + 1..next);
            return true;
        }
        false
    }
}

/// `tmp[k] = element` with a constant `k`.
fn element_store(arena: &Arena, kind: &StmtKind, temp: TempId) -> Option<(usize, ExprId)> {
    let StmtKind::Assign { target, value } = kind else {
        return None;
    };
    let Expr::ArrayElement { array, index } = arena[*target] else {
        return None;
    };
    if !matches!(arena[array], Expr::Temp(t) if t == temp) {
        return None;
    }
    let Expr::Int(index) = arena[index] else {
        return None;
    };
    Some((usize::try_from(index).ok()?, *value))
}

pub fn default_value(arena: &mut Arena, ty: &Type) -> ExprId {
    let expr = match ty.as_primitive() {
        Some(PrimitiveType::Boolean) => Expr::Bool(false),
        Some(PrimitiveType::Long) => Expr::Long(0),
        Some(PrimitiveType::Float) => Expr::Float(0.0),
        Some(PrimitiveType::Double) => Expr::Double(0.0),
        Some(_) => Expr::Int(0),
        None => Expr::Null,
    };
    arena.alloc(expr)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Fixture, render};
    use super::super::temps::InlineTemps;
    use super::*;
    use crate::model::MethodAccessFlags;
    use crate::testing::op;

    #[test]
    fn constructor_call() {
        // return new StringBuilder(f());
        let fixture = Fixture::new("()Ljava/lang/Object;", MethodAccessFlags::STATIC, 0, |b| {
            b.class_op(op::NEW, "java/lang/StringBuilder")
                .op(op::DUP)
                .invoke(op::INVOKESTATIC, "A", "f", "()Ljava/lang/String;")
                .invoke(
                    op::INVOKESPECIAL,
                    "java/lang/StringBuilder",
                    "<init>",
                    "(Ljava/lang/String;)V",
                )
                .op(op::ARETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(Construction.run(&mut ir, &cx));
        assert_eq!(
            render(&ir),
            ["tmp0 = new StringBuilder(A.f())", "return tmp0"]
        );
        assert!(InlineTemps.run(&mut ir, &cx));
        assert_eq!(render(&ir), ["return new StringBuilder(A.f())"]);
        assert!(!Construction.run(&mut ir, &cx));
    }

    #[test]
    fn array_initializer_with_gap() {
        // return new int[] {1, 0, 3};
        let fixture = Fixture::new("()[I", MethodAccessFlags::STATIC, 0, |b| {
            b.iconst(3)
                .op_u8(op::NEWARRAY, 10)
                .op(op::DUP)
                .iconst(0)
                .iconst(1)
                .op(op::IASTORE)
                .op(op::DUP)
                .iconst(2)
                .iconst(3)
                .op(op::IASTORE)
                .op(op::ARETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(ArrayInitializers.run(&mut ir, &cx));
        assert_eq!(
            render(&ir),
            ["tmp0 = new int[] {1, 0, 3}", "return tmp0"]
        );
    }

    #[test]
    fn partially_filled_array_is_left_alone() {
        // a = new int[3]; a[0] = 1; with the array kept on the stack
        let fixture = Fixture::new("()[I", MethodAccessFlags::STATIC, 0, |b| {
            b.iconst(3)
                .op_u8(op::NEWARRAY, 10)
                .op(op::DUP)
                .iconst(0)
                .iconst(1)
                .op(op::IASTORE)
                .op(op::ARETURN);
        });
        let mut ir = fixture.build();
        let cx = fixture.cx();
        assert!(!ArrayInitializers.run(&mut ir, &cx));
    }
}
