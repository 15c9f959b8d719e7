use super::{Reconstructor, is_this};
use crate::accessors::{AccessorKind, AccessorRecord};
use crate::builder::MethodIr;
use crate::bytecode::{InvokeKind, Kind};
use crate::context::ClassContext;
use crate::descriptor::Type;
use crate::ir::{Arena, CallKind, Expr, ExprId, StmtKind};

/// Replaces reads of the synthetic enclosing-instance field with `Outer.this`.
///
/// In the constructor of an inner class the enclosing instance arrives as the first parameter and
/// is stored into `this$0` before `super(...)` is called. The store is dropped and reads of the
/// parameter become `Outer.this` too.
pub struct OuterThis;

impl Reconstructor for OuterThis {
    fn name(&self) -> &'static str {
        "outer this"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, cx: &ClassContext<'_>) -> bool {
        if ir.is_constructor()
            && let Some((field, outer)) = &cx.info.outer_this
        {
            // this.this$0 = slot1
            let store = ir.stmts.iter().position(|stmt| match stmt.kind {
                StmtKind::Assign { target, value } => {
                    matches!(
                        &ir.arena[target],
                        Expr::Field { object: Some(object), name, .. }
                            if name == field && is_this(ir, *object)
                    ) && matches!(ir.arena[value], Expr::Slot { index: 1, .. })
                }
                _ => false,
            });
            if let Some(store) = store {
                ir.stmts.remove(store);
                return true;
            }
            if replace_all(&mut ir.arena, ir.stmts.iter().flat_map(|stmt| stmt.exprs()), |expr| {
                matches!(expr, Expr::Slot { index: 1, kind: Kind::Reference, .. })
                    .then(|| Expr::OuterThis {
                        class: outer.clone(),
                    })
            }) {
                return true;
            }
        }

        let classes = &cx.analysis.classes;
        let roots: Vec<ExprId> = ir.stmts.iter().flat_map(|stmt| stmt.exprs()).collect();
        let owner = ir.class_name.clone();
        let mut rewrites = Vec::new();
        for root in roots {
            ir.arena.walk(root, &mut |id, expr| {
                let Expr::Field {
                    object: Some(object),
                    class,
                    name,
                    ..
                } = expr
                else {
                    return;
                };
                let Some((field, outer)) = classes.get(class).and_then(|info| info.outer_this.as_ref())
                else {
                    return;
                };
                let receiver_is_instance = match &ir.arena[*object] {
                    Expr::OuterThis { class: inner } => inner == class,
                    _ => is_this(ir, *object) && *class == owner,
                };
                if field == name && receiver_is_instance {
                    rewrites.push((id, outer.clone()));
                }
            });
        }
        let Some((id, class)) = rewrites.into_iter().next() else {
            return false;
        };
        ir.arena.replace(id, Expr::OuterThis { class });
        true
    }
}

/// Replaces the first node of the forest for which `f` produces a replacement.
fn replace_all(
    arena: &mut Arena,
    roots: impl Iterator<Item = ExprId>,
    mut f: impl FnMut(&Expr) -> Option<Expr>,
) -> bool {
    let roots: Vec<ExprId> = roots.collect();
    for root in roots {
        let mut found = None;
        arena.walk(root, &mut |id, expr| {
            if found.is_none()
                && let Some(replacement) = f(expr)
            {
                found = Some((id, replacement));
            }
        });
        if let Some((id, replacement)) = found {
            arena.replace(id, replacement);
            return true;
        }
    }
    false
}

/// Inlines calls to recognized `access$NNN` methods as the member access they stand for.
pub struct Accessors;

impl Reconstructor for Accessors {
    fn name(&self) -> &'static str {
        "accessor calls"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, cx: &ClassContext<'_>) -> bool {
        let roots: Vec<ExprId> = ir.stmts.iter().flat_map(|stmt| stmt.exprs()).collect();
        for root in roots {
            let call = ir.arena.find(root, &mut |expr| {
                matches!(
                    expr,
                    Expr::Call { class, name, descriptor, kind: CallKind::Static, .. }
                        if cx.analysis.accessor(class, name, descriptor).is_some()
                )
            });
            let Some(call) = call else {
                continue;
            };
            let Expr::Call {
                class,
                name,
                descriptor,
                arguments,
                ..
            } = ir.arena[call].clone()
            else {
                continue;
            };
            let Some(record) = cx.analysis.accessor(&class, &name, &descriptor) else {
                continue;
            };
            let Some(expr) = inline_accessor(&mut ir.arena, record.kind, record, arguments) else {
                log::debug!("Accessor {class}.{name} called with unexpected arguments");
                continue;
            };
            ir.arena.replace(call, expr);
            return true;
        }
        false
    }
}

fn inline_accessor(
    arena: &mut Arena,
    kind: AccessorKind,
    record: &AccessorRecord,
    arguments: Vec<ExprId>,
) -> Option<Expr> {
    let field = |object: Option<ExprId>| Expr::Field {
        object,
        class: record.class.clone(),
        name: record.name.clone(),
        descriptor: record.descriptor.clone(),
    };
    Some(match (kind, &arguments[..]) {
        (AccessorKind::StaticGet, []) => field(None),
        (AccessorKind::StaticPut, [value]) => Expr::Assign {
            target: arena.alloc(field(None)),
            value: *value,
        },
        (AccessorKind::InstanceGet, [object]) => field(Some(*object)),
        (AccessorKind::InstancePut, [object, value]) => Expr::Assign {
            target: arena.alloc(field(Some(*object))),
            value: *value,
        },
        (AccessorKind::StaticIncrement { prefix, decrement }, []) => Expr::Increment {
            target: arena.alloc(field(None)),
            prefix,
            decrement,
        },
        (AccessorKind::InstanceIncrement { prefix, decrement }, [object]) => Expr::Increment {
            target: arena.alloc(field(Some(*object))),
            prefix,
            decrement,
        },
        (AccessorKind::Invoke(InvokeKind::Static), _) => Expr::Call {
            class: record.class.clone(),
            name: record.name.clone(),
            descriptor: record.descriptor.clone(),
            kind: CallKind::Static,
            arguments: arguments.clone(),
        },
        (AccessorKind::Invoke(invoke), [object, rest @ ..]) => {
            let object = *object;
            let kind = match invoke {
                InvokeKind::Virtual => CallKind::Virtual { object },
                InvokeKind::Interface => CallKind::Interface { object },
                // Private methods. Displayed as a plain call, since it's not a `super` call.
                InvokeKind::Special | InvokeKind::Static => CallKind::Virtual { object },
            };
            Expr::Call {
                class: record.class.clone(),
                name: record.name.clone(),
                descriptor: record.descriptor.clone(),
                kind,
                arguments: rest.to_vec(),
            }
        }
        _ => return None,
    })
}

/// Collapses the pre-1.5 javac lowering of `X.class`:
///
/// ```text
/// class$X == null ? (class$X = class$("X")) : class$X
/// ```
///
/// where `class$` is a synthetic static helper wrapping `Class.forName`. Newer compilers load class
/// constants with `ldc`, which the builder translates directly.
pub struct ClassLiterals;

impl Reconstructor for ClassLiterals {
    fn name(&self) -> &'static str {
        "class literals"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let roots: Vec<ExprId> = ir.stmts.iter().flat_map(|stmt| stmt.exprs()).collect();
        for root in roots {
            let mut found = None;
            ir.arena.walk(root, &mut |id, expr| {
                if found.is_none()
                    && let Expr::Ternary { condition, branches } = expr
                    && tests_cache_field(&ir.arena, *condition)
                    && let Some(ty) = branches.iter().find_map(|branch| class_lookup(&ir.arena, *branch))
                {
                    found = Some((id, ty));
                }
            });
            if let Some((id, ty)) = found {
                ir.arena.replace(id, Expr::Class(ty));
                return true;
            }
        }
        false
    }
}

fn is_cache_field(arena: &Arena, id: ExprId) -> bool {
    matches!(&arena[id], Expr::Field { object: None, name, .. } if name.starts_with("class$"))
}

/// `class$X == null` or `class$X != null`.
fn tests_cache_field(arena: &Arena, condition: ExprId) -> bool {
    match arena[condition] {
        Expr::Binary { lhs, rhs, .. } => {
            is_cache_field(arena, lhs) && matches!(arena[rhs], Expr::Null)
        }
        _ => false,
    }
}

/// The class loaded by `class$("X")` or `Class.forName("X")` somewhere under `root`.
fn class_lookup(arena: &Arena, root: ExprId) -> Option<Type> {
    let call = arena.find(root, &mut |expr| {
        matches!(
            expr,
            Expr::Call { name, kind: CallKind::Static, arguments, .. }
                if (name == "class$" || name == "forName") && arguments.len() == 1
        )
    })?;
    let Expr::Call { arguments, .. } = &arena[call] else {
        return None;
    };
    let Expr::String(name) = &arena[arguments[0]] else {
        return None;
    };
    // `Class.forName` takes binary names for classes and descriptors for arrays.
    let internal = name.replace('.', "/");
    Type::from_class_operand(&internal).ok()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::render;
    use super::*;
    use crate::builder::build_method;
    use crate::config::Config;
    use crate::context::{Analysis, ClassContext};
    use crate::model::{
        ClassAccessFlags, FieldAccessFlags, FieldModel, InnerClassLink, MethodAccessFlags,
        PoolBuilder,
    };
    use crate::patterns::reconstruct;
    use crate::testing::{CodeBuilder, class, method, op};

    #[test]
    fn accessor_call_becomes_field_read() {
        let mut pool = PoolBuilder::new();
        let accessor = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(0).field(op::GETFIELD, "Outer", "secret", "I").op(op::IRETURN);
            b.build(1)
        };
        let user = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(1)
                .invoke(op::INVOKESTATIC, "Outer", "access$000", "(LOuter;)I")
                .op(op::IRETURN);
            b.build(2)
        };
        let outer = class(
            "Outer",
            pool,
            vec![
                method("access$000", "(LOuter;)I", MethodAccessFlags::STATIC, accessor),
                method("peek", "(LOuter;)I", MethodAccessFlags::empty(), user),
            ],
        );
        let analysis = Analysis::collect(&outer);
        assert_eq!(
            analysis.accessor("Outer", "access$000", "(LOuter;)I"),
            Some(&AccessorRecord {
                kind: AccessorKind::InstanceGet,
                class: "Outer".to_owned(),
                name: "secret".to_owned(),
                descriptor: "I".to_owned(),
            })
        );

        let config = Config::default();
        let cx = ClassContext::new(&outer, &analysis, &config);
        let peek = &outer.methods[1];
        let mut ir = build_method(&outer, peek, peek.code.as_ref().unwrap()).unwrap();
        assert!(Accessors.run(&mut ir, &cx));
        assert_eq!(render(&ir), ["return slot1.secret"]);
        assert!(!Accessors.run(&mut ir, &cx));
    }

    #[test]
    fn increment_accessor_call_becomes_increment() {
        let mut pool = PoolBuilder::new();
        let accessor = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(0)
                .op(op::DUP)
                .field(op::GETFIELD, "Outer", "count", "I")
                .op(op::DUP_X1)
                .iconst(1)
                .op(op::IADD)
                .field(op::PUTFIELD, "Outer", "count", "I")
                .op(op::IRETURN);
            b.build(1)
        };
        let user = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(1)
                .invoke(op::INVOKESTATIC, "Outer", "access$008", "(LOuter;)I")
                .op(op::IRETURN);
            b.build(2)
        };
        let outer = class(
            "Outer",
            pool,
            vec![
                method("access$008", "(LOuter;)I", MethodAccessFlags::STATIC, accessor),
                method("bump", "(LOuter;)I", MethodAccessFlags::empty(), user),
            ],
        );
        let analysis = Analysis::collect(&outer);
        let config = Config::default();
        let cx = ClassContext::new(&outer, &analysis, &config);
        let bump = &outer.methods[1];
        let mut ir = build_method(&outer, bump, bump.code.as_ref().unwrap()).unwrap();
        assert!(Accessors.run(&mut ir, &cx));
        assert_eq!(render(&ir), ["return slot1.count++"]);
    }

    #[test]
    fn inner_constructor_drops_outer_store() {
        let mut pool = PoolBuilder::new();
        let code = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(0)
                .aload(1)
                .field(op::PUTFIELD, "Outer$Inner", "this$0", "LOuter;")
                .aload(0)
                .invoke(op::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
                .aload(0)
                .field(op::GETFIELD, "Outer$Inner", "this$0", "LOuter;")
                .invoke(op::INVOKEVIRTUAL, "Outer", "ping", "()V")
                .op(op::RETURN);
            b.build(2)
        };
        let mut inner = class(
            "Outer$Inner",
            pool,
            vec![method("<init>", "(LOuter;)V", MethodAccessFlags::empty(), code)],
        );
        inner.fields.push(FieldModel {
            access_flags: FieldAccessFlags::FINAL | FieldAccessFlags::SYNTHETIC,
            name: "this$0".to_owned(),
            descriptor: "LOuter;".to_owned(),
            constant_value: None,
        });
        inner.inner_classes.push(InnerClassLink {
            inner: "Outer$Inner".to_owned(),
            outer: Some("Outer".to_owned()),
            simple_name: Some("Inner".to_owned()),
            access_flags: ClassAccessFlags::empty(),
        });

        let analysis = Analysis::collect(&inner);
        let config = Config::default();
        let cx = ClassContext::new(&inner, &analysis, &config);
        let init = &inner.methods[0];
        let mut ir = build_method(&inner, init, init.code.as_ref().unwrap()).unwrap();
        reconstruct(&mut ir, &cx);
        assert_eq!(render(&ir), ["slot0.<init>()", "Outer.this.ping()", "return"]);
    }

    #[test]
    fn legacy_class_literal() {
        // return class$java$lang$String == null
        //     ? (class$java$lang$String = class$("java.lang.String"))
        //     : class$java$lang$String;
        let fixture = super::super::test_support::Fixture::new(
            "()Ljava/lang/Class;",
            MethodAccessFlags::STATIC,
            0,
            |b| {
                b.field(op::GETSTATIC, "Test", "class$java$lang$String", "Ljava/lang/Class;")
                    .jump(op::IFNONNULL, "cached")
                    .ldc_string("java.lang.String")
                    .invoke(
                        op::INVOKESTATIC,
                        "Test",
                        "class$",
                        "(Ljava/lang/String;)Ljava/lang/Class;",
                    )
                    .op(op::DUP)
                    .field(op::PUTSTATIC, "Test", "class$java$lang$String", "Ljava/lang/Class;")
                    .jump(op::GOTO, "done")
                    .label("cached")
                    .field(op::GETSTATIC, "Test", "class$java$lang$String", "Ljava/lang/Class;")
                    .label("done")
                    .op(op::ARETURN);
            },
        );
        let mut ir = fixture.build();
        let cx = fixture.cx();
        reconstruct(&mut ir, &cx);
        assert_eq!(render(&ir), ["return String.class"]);
    }
}
