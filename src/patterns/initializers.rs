//! Field initializers and enum constants.
//!
//! javac compiles `static int x = 1;` into a store at the start of `<clinit>` and `int y = 2;` into
//! a store after the `super(...)` call of every constructor that doesn't delegate to `this(...)`.
//! These stores are moved back onto the field declarations here, and the `new E("A", 0, ...)`
//! stores of an enum class become its constant list.

use crate::builder::MethodIr;
use crate::context::ClassContext;
use crate::ir::{Arena, CallKind, Expr, ExprId, StmtKind};
use crate::model::{FieldAccessFlags, Loadable};
use rustc_hash::{FxHashMap, FxHashSet};

/// A value moved onto a field declaration, already rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInitializer {
    pub text: String,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumConstant {
    pub name: String,
    /// Constructor arguments after the implicit name and ordinal.
    pub arguments: Vec<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Default)]
pub struct Initializers {
    pub fields: FxHashMap<String, FieldInitializer>,
    pub enum_constants: Vec<EnumConstant>,
    /// `<clinit>` has nothing left to show.
    pub static_block_empty: bool,
}

/// Takes initializers out of `<clinit>` and the constructors among `methods`.
pub fn extract(methods: &mut [&mut MethodIr], cx: &ClassContext<'_>) -> Initializers {
    let mut out = Initializers::default();
    constant_values(cx, &mut out);
    for ir in methods.iter_mut() {
        if ir.name == "<clinit>" {
            extract_static(ir, cx, &mut out);
        }
    }
    let mut constructors: Vec<&mut MethodIr> = methods
        .iter_mut()
        .filter(|ir| ir.name == "<init>")
        .map(|ir| &mut **ir)
        .collect();
    extract_instance(&mut constructors, cx, &mut out);
    for ir in constructors {
        elide_implicit_super(ir, cx);
    }
    out
}

/// `static final` fields with a `ConstantValue` attribute.
fn constant_values(cx: &ClassContext<'_>, out: &mut Initializers) {
    for field in &cx.class.fields {
        let Some(index) = field.constant_value else {
            continue;
        };
        let text = match cx.class.pool.loadable(index) {
            Ok(Loadable::Integer(value)) => match field.descriptor.as_str() {
                "Z" => (value != 0).to_string(),
                "C" => match char::from_u32(value as u32) {
                    Some(ch) if !ch.is_control() && ch != '\'' && ch != '\\' => format!("'{ch}'"),
                    _ => format!("(char) {value}"),
                },
                _ => value.to_string(),
            },
            Ok(Loadable::Long(value)) => format!("{value}L"),
            Ok(Loadable::Float(value)) => format!("{value:?}F"),
            Ok(Loadable::Double(value)) => format!("{value:?}"),
            Ok(Loadable::String(value)) => crate::ir::escape_string(value),
            Ok(other) => {
                log::debug!("Unexpected constant value {other:?} of {}", field.name);
                continue;
            }
            Err(error) => {
                log::debug!("Bad constant value of {}: {error}", field.name);
                continue;
            }
        };
        out.fields.insert(
            field.name.clone(),
            FieldInitializer { text, line: None },
        );
    }
}

/// Whether the value can be evaluated at the declaration, i.e. reads no locals.
fn is_portable(arena: &Arena, value: ExprId) -> bool {
    !arena.any(value, &mut |expr| {
        matches!(
            expr,
            Expr::Var(_) | Expr::Temp(_) | Expr::Slot { .. } | Expr::CaughtException | Expr::ReturnAddress
        )
    })
}

/// `Class.field = value` or `this.field = value` for a field of this class.
fn field_store(ir: &MethodIr, kind: &StmtKind, cx: &ClassContext<'_>, is_static: bool) -> Option<(String, ExprId)> {
    let StmtKind::Assign { target, value } = kind else {
        return None;
    };
    let Expr::Field {
        object,
        class,
        name,
        descriptor,
    } = &ir.arena[*target]
    else {
        return None;
    };
    if *class != cx.class.name || object.is_none() != is_static {
        return None;
    }
    if let Some(object) = object
        && !matches!(ir.arena[*object], Expr::This)
    {
        return None;
    }
    let declared = cx.class.fields.iter().any(|field| {
        field.name == *name
            && field.descriptor == *descriptor
            && field.access_flags.contains(FieldAccessFlags::STATIC) == is_static
    });
    (declared && is_portable(&ir.arena, *value)).then(|| (name.clone(), *value))
}

fn enum_constant(ir: &MethodIr, name: &str, value: ExprId, line: Option<u32>) -> Option<EnumConstant> {
    let Expr::InvokeNew { arguments, .. } = &ir.arena[value] else {
        return None;
    };
    let [constant, ordinal, rest @ ..] = arguments.as_slice() else {
        return None;
    };
    let named = matches!(&ir.arena[*constant], Expr::String(string) if string == name);
    if !named || !matches!(ir.arena[*ordinal], Expr::Int(_)) {
        return None;
    }
    Some(EnumConstant {
        name: name.to_owned(),
        arguments: rest
            .iter()
            .map(|argument| ir.arena.debug(argument).to_string())
            .collect(),
        line,
    })
}

fn extract_static(ir: &mut MethodIr, cx: &ClassContext<'_>, out: &mut Initializers) {
    let targets = ir.jump_targets();
    let enum_fields: FxHashSet<&str> = cx.enum_constants();
    let mut taken = 0;
    for stmt in &ir.stmts {
        if taken > 0 && targets.contains(&stmt.offset) {
            break;
        }
        let Some((name, value)) = field_store(ir, &stmt.kind, cx, true) else {
            break;
        };
        let flags = cx
            .class
            .fields
            .iter()
            .find(|field| field.name == name)
            .map_or(FieldAccessFlags::empty(), |field| field.access_flags);
        if enum_fields.contains(name.as_str()) {
            match enum_constant(ir, &name, value, stmt.line) {
                Some(constant) => out.enum_constants.push(constant),
                None => break,
            }
        } else if !cx.is_hidden_field(&name, flags) {
            if out.fields.contains_key(&name) {
                break;
            }
            out.fields.insert(
                name,
                FieldInitializer {
                    text: ir.arena.debug(&value).to_string(),
                    line: stmt.line,
                },
            );
        }
        taken += 1;
    }
    if taken > 0 {
        log::debug!("Moved {taken} static initializers out of {}.<clinit>", ir.class_name);
        ir.stmts.drain(..taken);
    }
    out.static_block_empty = ir
        .stmts
        .iter()
        .all(|stmt| matches!(stmt.kind, StmtKind::Return(None)));
}

/// The `super(...)`/`this(...)` call opening a constructor, and whether it's `this(...)`.
fn constructor_call(ir: &MethodIr) -> Option<(usize, bool)> {
    ir.stmts.iter().enumerate().find_map(|(index, stmt)| {
        let StmtKind::Expr(call) = stmt.kind else {
            return None;
        };
        match &ir.arena[call] {
            Expr::Call {
                class,
                name,
                kind: CallKind::Special { object },
                ..
            } if name == "<init>" && matches!(ir.arena[*object], Expr::This) => {
                Some((index, *class == ir.class_name))
            }
            _ => None,
        }
    })
}

fn extract_instance(constructors: &mut [&mut MethodIr], cx: &ClassContext<'_>, out: &mut Initializers) {
    // Per constructor calling `super(...)`: the position after the call and the rendered stores.
    let mut candidates: Vec<(usize, usize, Vec<(String, String, Option<u32>)>)> = Vec::new();
    for (which, ir) in constructors.iter().enumerate() {
        let Some((call, false)) = constructor_call(ir) else {
            continue;
        };
        let targets = ir.jump_targets();
        let stores = ir.stmts[call + 1..]
            .iter()
            .take_while(|stmt| !targets.contains(&stmt.offset))
            .map_while(|stmt| {
                let (name, value) = field_store(ir, &stmt.kind, cx, false)?;
                Some((name, ir.arena.debug(&value).to_string(), stmt.line))
            })
            .collect();
        candidates.push((which, call + 1, stores));
    }
    let Some(shortest) = candidates.iter().map(|(_, _, stores)| stores.len()).min() else {
        return;
    };
    let mut common = 0;
    while common < shortest {
        let (name, text, _) = &candidates[0].2[common];
        let agree = candidates.iter().all(|(_, _, stores)| {
            let (other_name, other_text, _) = &stores[common];
            other_name == name && other_text == text
        });
        let fresh = !out.fields.contains_key(name)
            && !candidates[0].2[..common].iter().any(|(earlier, _, _)| earlier == name);
        if !agree || !fresh {
            break;
        }
        common += 1;
    }
    if common == 0 {
        return;
    }
    for (name, text, line) in candidates[0].2[..common].iter().cloned() {
        out.fields.insert(name, FieldInitializer { text, line });
    }
    for (which, start, _) in &candidates {
        let ir = &mut constructors[*which];
        ir.stmts.drain(*start..*start + common);
    }
    log::debug!("Moved {common} instance initializers out of the constructors of {}", cx.class.name);
}

/// Drops a `super()` without arguments, and the `super(name, ordinal)` of enum constructors.
fn elide_implicit_super(ir: &mut MethodIr, cx: &ClassContext<'_>) {
    let Some((index, false)) = constructor_call(ir) else {
        return;
    };
    let StmtKind::Expr(call) = ir.stmts[index].kind else {
        return;
    };
    let Expr::Call {
        class, arguments, ..
    } = &ir.arena[call]
    else {
        return;
    };
    let implicit = arguments.is_empty() || (cx.info.is_enum && class == "java/lang/Enum");
    if implicit {
        ir.stmts.remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_method;
    use crate::config::Config;
    use crate::context::Analysis;
    use crate::locals;
    use crate::model::{ClassAccessFlags, ClassModel, FieldModel, MethodAccessFlags, PoolBuilder};
    use crate::patterns::{cleanup, reconstruct};
    use crate::testing::{CodeBuilder, class, init_logger, method, op};

    fn field(name: &str, descriptor: &str, access_flags: FieldAccessFlags) -> FieldModel {
        FieldModel {
            access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            constant_value: None,
        }
    }

    fn lowered(class: &ClassModel, analysis: &Analysis, config: &Config) -> Vec<MethodIr> {
        let cx = ClassContext::new(class, analysis, config);
        class
            .methods
            .iter()
            .map(|method| {
                let mut ir = build_method(class, method, method.code.as_ref().unwrap()).unwrap();
                reconstruct(&mut ir, &cx);
                locals::reconstruct(&mut ir, cx.parameter_hints(method), config);
                cleanup(&mut ir);
                ir
            })
            .collect()
    }

    #[test]
    fn common_constructor_prefix() {
        init_logger();
        let mut pool = PoolBuilder::new();
        let constructor = |pool: &mut PoolBuilder, descriptor: &str, extra: bool| {
            let mut b = CodeBuilder::new(pool);
            b.aload(0)
                .invoke(op::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
                .aload(0)
                .iconst(7)
                .field(op::PUTFIELD, "Point", "x", "I");
            if extra {
                b.aload(0).iload(1).field(op::PUTFIELD, "Point", "y", "I");
            }
            b.op(op::RETURN);
            method("<init>", descriptor, MethodAccessFlags::PUBLIC, b.build(2))
        };
        let first = constructor(&mut pool, "()V", false);
        let second = constructor(&mut pool, "(I)V", true);
        let mut point = class("Point", pool, vec![first, second]);
        point.fields.push(field("x", "I", FieldAccessFlags::PRIVATE));
        point.fields.push(field("y", "I", FieldAccessFlags::PRIVATE));

        let analysis = Analysis::collect(&point);
        let config = Config::default();
        let cx = ClassContext::new(&point, &analysis, &config);
        let mut irs = lowered(&point, &analysis, &config);
        let mut refs: Vec<&mut MethodIr> = irs.iter_mut().collect();
        let found = extract(&mut refs, &cx);

        assert_eq!(found.fields["x"].text, "7");
        assert!(!found.fields.contains_key("y"));
        // `super()` and the `x` store are gone; the `y` store depends on a parameter and stays.
        assert_eq!(irs[0].stmts.len(), 1);
        assert_eq!(irs[1].stmts.len(), 2);
    }

    #[test]
    fn enum_constants_and_values_array() {
        init_logger();
        let mut pool = PoolBuilder::new();
        let clinit = {
            let mut b = CodeBuilder::new(&mut pool);
            for (ordinal, name) in ["RED", "GREEN"].into_iter().enumerate() {
                b.line(2 + ordinal as u32)
                    .class_op(op::NEW, "Color")
                    .op(op::DUP)
                    .ldc_string(name)
                    .iconst(ordinal as i32)
                    .iconst(0xff)
                    .invoke(op::INVOKESPECIAL, "Color", "<init>", "(Ljava/lang/String;II)V")
                    .field(op::PUTSTATIC, "Color", name, "LColor;");
            }
            b.invoke(op::INVOKESTATIC, "Color", "$values", "()[LColor;")
                .field(op::PUTSTATIC, "Color", "$VALUES", "[LColor;")
                .op(op::RETURN);
            b.build(0)
        };
        let mut color = class(
            "Color",
            pool,
            vec![method("<clinit>", "()V", MethodAccessFlags::STATIC, clinit)],
        );
        color.access_flags |= ClassAccessFlags::ENUM;
        let constant = FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL | FieldAccessFlags::ENUM;
        color.fields.push(field("RED", "LColor;", constant));
        color.fields.push(field("GREEN", "LColor;", constant));
        color.fields.push(field(
            "$VALUES",
            "[LColor;",
            FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC | FieldAccessFlags::SYNTHETIC,
        ));

        let analysis = Analysis::collect(&color);
        let config = Config::default();
        let cx = ClassContext::new(&color, &analysis, &config);
        let mut irs = lowered(&color, &analysis, &config);
        let mut refs: Vec<&mut MethodIr> = irs.iter_mut().collect();
        let found = extract(&mut refs, &cx);

        let names: Vec<&str> = found.enum_constants.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["RED", "GREEN"]);
        assert_eq!(found.enum_constants[0].arguments, ["255"]);
        assert_eq!(found.enum_constants[1].line, Some(3));
        assert!(found.static_block_empty);
        assert!(!found.fields.contains_key("$VALUES"));
    }

    #[test]
    fn static_prefix_stops_at_control_flow() {
        init_logger();
        let mut pool = PoolBuilder::new();
        let clinit = {
            let mut b = CodeBuilder::new(&mut pool);
            b.iconst(3)
                .field(op::PUTSTATIC, "Test", "a", "I")
                .invoke(op::INVOKESTATIC, "Test", "check", "()Z")
                .jump(op::IFEQ, "skip")
                .iconst(4)
                .field(op::PUTSTATIC, "Test", "b", "I")
                .label("skip")
                .op(op::RETURN);
            b.build(0)
        };
        let mut test = class(
            "Test",
            pool,
            vec![method("<clinit>", "()V", MethodAccessFlags::STATIC, clinit)],
        );
        test.fields.push(field("a", "I", FieldAccessFlags::STATIC));
        test.fields.push(field("b", "I", FieldAccessFlags::STATIC));

        let analysis = Analysis::collect(&test);
        let config = Config::default();
        let cx = ClassContext::new(&test, &analysis, &config);
        let mut irs = lowered(&test, &analysis, &config);
        let mut refs: Vec<&mut MethodIr> = irs.iter_mut().collect();
        let found = extract(&mut refs, &cx);

        assert_eq!(found.fields["a"].text, "3");
        assert!(!found.fields.contains_key("b"));
        assert!(!found.static_block_empty);
    }
}
