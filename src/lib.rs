//! Decompilation of JVM class files into structured statements.
//!
//! The input is a class already split into members by a class-file reader ([`model::ClassModel`]).
//! Each method goes through the same pipeline:
//!
//! 1. [`builder`] executes the bytecode symbolically and produces a flat list of statements over
//!    expression trees, with jumps left as jumps.
//! 2. [`patterns`] folds javac's lowerings back into expressions: `x++`, `a += b`, ternaries,
//!    string concatenation, accessor calls, ...
//! 3. [`locals`] splits local slots into variables and gives them types and names.
//! 4. [`structure`] nests the jumps into `if`/`while`/`for`/`switch`/`try` and recognizes the
//!    remaining source idioms.
//!
//! Finally the class and its members are sequenced into a [`layout::Layout`], which can be
//! realigned to the line numbers recorded in the bytecode.
//!
//! Failures are per method: a method that can't be decompiled is shown as a bytecode listing, and
//! the rest of the class is unaffected.

pub mod accessors;
pub mod builder;
pub mod bytecode;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod ir;
pub mod layout;
pub mod locals;
pub mod model;
pub mod output;
pub mod patterns;
pub mod signatures;
pub mod structure;
#[cfg(test)]
mod testing;

pub use config::Config;
pub use output::{ClassOutput, FieldOutput, MethodBody, MethodOutput};

use crate::builder::{BuildError, MethodIr, build_method};
use crate::context::{Analysis, ClassContext};
use crate::layout::Layout;
use crate::model::{ClassAccessFlags, ClassModel, FieldAccessFlags, MethodAccessFlags, MethodModel};
use crate::patterns::initializers::{self, EnumConstant, Initializers};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MethodDecompileError {
    #[error("While building statements: {0}")]
    Build(#[from] BuildError),

    #[error("Method has no code")]
    MissingCode,
}

/// A method after the per-method passes that don't need the other methods of the class.
enum Lowered {
    Hidden,
    Absent,
    Failed(MethodDecompileError),
    Ready(Box<MethodIr>),
}

/// Decompiles a class and everything nested in it.
pub fn decompile_class(class: &ClassModel, config: &Config) -> ClassOutput {
    // Nested classes are scanned first: the outer class calls their accessors and reads their
    // switch maps, so the whole tree has to be known before any method body is touched.
    let analysis = Analysis::collect(class);
    decompile_with(class, &analysis, config)
}

/// Decompiles unrelated classes. Each is analyzed on its own.
pub fn decompile_classes(classes: &[ClassModel], config: &Config) -> Vec<ClassOutput> {
    classes
        .iter()
        .map(|class| decompile_class(class, config))
        .collect()
}

fn is_hidden_class(class: &ClassModel, config: &Config) -> bool {
    // Switch map holders and the like.
    !config.show_synthetic && class.access_flags.contains(ClassAccessFlags::SYNTHETIC)
}

fn lower_method(cx: &ClassContext<'_>, method: &MethodModel) -> Lowered {
    if cx.is_hidden_method(method) {
        return Lowered::Hidden;
    }
    let Some(code) = &method.code else {
        if method
            .access_flags
            .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
        {
            return Lowered::Absent;
        }
        return Lowered::Failed(MethodDecompileError::MissingCode);
    };

    // Building the statements is the only step that can fail. Everything after it works on
    // whatever shape the statements are in, and at worst leaves them less pretty than they could
    // be, e.g. with a `goto` or a temporary.
    let mut ir = match build_method(cx.class, method, code) {
        Ok(ir) => ir,
        Err(error) => return Lowered::Failed(error.into()),
    };
    patterns::reconstruct(&mut ir, cx);
    locals::reconstruct(&mut ir, cx.parameter_hints(method), cx.config);
    patterns::cleanup(&mut ir);
    Lowered::Ready(Box::new(ir))
}

fn enum_constants(cx: &ClassContext<'_>, found: &mut Initializers) -> Vec<EnumConstant> {
    if !found.enum_constants.is_empty() || !cx.info.is_enum {
        return core::mem::take(&mut found.enum_constants);
    }
    // `<clinit>` didn't decompile or doesn't have the usual shape; the names are still known.
    cx.class
        .fields
        .iter()
        .filter(|field| field.access_flags.contains(FieldAccessFlags::ENUM))
        .map(|field| EnumConstant {
            name: field.name.clone(),
            arguments: Vec::new(),
            line: None,
        })
        .collect()
}

/// `Foo() {}` when it's the only constructor is what javac generates for no constructor at all.
fn is_default_constructor(cx: &ClassContext<'_>, method: &MethodModel, ir: &MethodIr) -> bool {
    method.is_constructor()
        && cx.class.methods.iter().filter(|method| method.is_constructor()).count() == 1
        && ir.descriptor.parameters.len() == signatures::hidden_parameters(cx, method)
}

fn decompile_with(class: &ClassModel, analysis: &Analysis, config: &Config) -> ClassOutput {
    let cx = ClassContext::new(class, analysis, config);
    log::debug!("Decompiling {}", class.name);

    let inner = class
        .nested
        .iter()
        .filter(|nested| !is_hidden_class(nested, config))
        .map(|nested| decompile_with(nested, analysis, config))
        .collect();

    let mut lowered: Vec<Lowered> = class.methods.iter().map(|method| lower_method(&cx, method)).collect();
    let mut found = {
        let mut ready: Vec<&mut MethodIr> = lowered
            .iter_mut()
            .filter_map(|lowered| match lowered {
                Lowered::Ready(ir) => Some(&mut **ir),
                _ => None,
            })
            .collect();
        initializers::extract(&mut ready, &cx)
    };

    let mut methods = Vec::new();
    for (method, lowered) in class.methods.iter().zip(lowered) {
        let body = match lowered {
            Lowered::Hidden => continue,
            Lowered::Absent => MethodBody::Absent,
            Lowered::Failed(error) => {
                log::warn!("In method `{}{}` of {}: {error}", method.name, method.descriptor, class.name);
                let listing = method
                    .code
                    .as_ref()
                    .map_or_else(Vec::new, |code| bytecode::listing(&code.bytecode));
                MethodBody::Errored { error, listing }
            }
            Lowered::Ready(mut ir) => {
                let statements = structure::structure(&mut ir, &cx);
                if statements.is_empty()
                    && !config.show_synthetic
                    && ((method.name == "<clinit>" && found.static_block_empty)
                        || is_default_constructor(&cx, method, &ir))
                {
                    continue;
                }
                MethodBody::Structured {
                    arena: ir.arena,
                    statements,
                }
            }
        };
        let arena = match &body {
            MethodBody::Structured { arena, .. } => Some(arena),
            _ => None,
        };
        methods.push(MethodOutput {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            header: signatures::method_header(&cx, method, arena),
            body,
        });
    }

    let enum_constants = enum_constants(&cx, &mut found);
    let fields = class
        .fields
        .iter()
        .filter(|field| {
            !cx.is_hidden_field(&field.name, field.access_flags)
                && !(cx.info.is_enum && field.access_flags.contains(FieldAccessFlags::ENUM))
        })
        .map(|field| {
            let initializer = found.fields.get(&field.name);
            FieldOutput {
                name: field.name.clone(),
                declaration: signatures::field_declaration(
                    field,
                    initializer.map(|initializer| initializer.text.as_str()),
                ),
                line: initializer.and_then(|initializer| initializer.line),
            }
        })
        .collect();

    let mut output = ClassOutput {
        name: class.name.clone(),
        header: signatures::class_header(class),
        enum_constants,
        fields,
        methods,
        inner,
        layout: Layout::default(),
    };
    output.lay_out(config);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::decode;
    use crate::model::{CodeModel, FieldModel, PoolBuilder};
    use crate::testing::{CodeBuilder, class, eclipse_switch_table, init_logger, method, op};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn is_structured(output: &ClassOutput, name: &str) -> bool {
        output
            .method(name)
            .is_some_and(|method| matches!(method.body, MethodBody::Structured { .. }))
    }

    #[test]
    fn corrupt_method_is_isolated() {
        init_logger();
        let mut pool = PoolBuilder::new();
        let good = {
            let mut b = CodeBuilder::new(&mut pool);
            b.iconst(1).op(op::IRETURN);
            b.build(0)
        };
        let other = {
            let mut b = CodeBuilder::new(&mut pool);
            b.iload(0).op(op::IRETURN);
            b.build(1)
        };
        let broken = CodeModel {
            max_locals: 1,
            // `iload` without its operand.
            bytecode: vec![op::ILOAD],
            ..CodeModel::default()
        };
        let test = class(
            "Test",
            pool,
            vec![
                method("good", "()I", MethodAccessFlags::STATIC, good),
                method("broken", "()V", MethodAccessFlags::STATIC, broken),
                method("other", "(I)I", MethodAccessFlags::STATIC, other),
            ],
        );

        let output = decompile_class(&test, &Config::default());
        assert!(is_structured(&output, "good"));
        assert!(is_structured(&output, "other"));
        assert!(output.method("broken").is_some_and(MethodOutput::is_errored));
        assert_eq!(output.method("good").map(MethodOutput::render), Some(vec!["return 1;".to_owned()]));
        assert!(output.lines().iter().any(|line| line.contains("// Failed to decompile")));
    }

    #[test]
    fn accessors_are_elided() {
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
                method(
                    "access$000",
                    "(LOuter;)I",
                    MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC,
                    accessor,
                ),
                method("peek", "(LOuter;)I", MethodAccessFlags::empty(), user),
            ],
        );

        let output = decompile_class(&outer, &Config::default());
        assert!(output.method("access$000").is_none());
        assert_eq!(
            output.method("peek").map(MethodOutput::render),
            Some(vec!["return paramOuter.secret;".to_owned()])
        );

        let shown = Config {
            show_synthetic: true,
            ..Config::default()
        };
        assert!(decompile_class(&outer, &shown).method("access$000").is_some());
    }

    #[test]
    fn eclipse_enum_switch() {
        init_logger();
        let mut pool = PoolBuilder::new();
        let table = eclipse_switch_table(&mut pool, "Outer", "Color", &["RED", "GREEN"]);
        let code = {
            let mut b = CodeBuilder::new(&mut pool);
            b.invoke(op::INVOKESTATIC, "Outer", "$SWITCH_TABLE$Color", "()[I")
                .aload(0)
                .invoke(op::INVOKEVIRTUAL, "Color", "ordinal", "()I")
                .op(op::IALOAD)
                .tableswitch(1, "end", &["red", "green"])
                .label("red")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .jump(op::GOTO, "end")
                .label("green")
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .label("end")
                .op(op::RETURN);
            b.build(1)
        };
        let mut outer = class(
            "Outer",
            pool,
            vec![table, method("paint", "(LColor;)V", MethodAccessFlags::STATIC, code)],
        );
        outer.fields.push(FieldModel {
            access_flags: FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC | FieldAccessFlags::SYNTHETIC,
            name: "$SWITCH_TABLE$Color".to_owned(),
            descriptor: "[I".to_owned(),
            constant_value: None,
        });

        let output = decompile_class(&outer, &Config::default());
        assert!(output.method("$SWITCH_TABLE$Color").is_none());
        assert!(output.fields.is_empty());
        let lines = output.method("paint").map(MethodOutput::render).unwrap_or_default();
        assert_eq!(lines[0], "switch (paramColor) {", "{lines:?}");
        let cases: Vec<&str> = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| line.starts_with("case "))
            .collect();
        assert_eq!(cases, ["case RED:", "case GREEN:"]);
    }

    #[test]
    fn constructor_stores_become_field_initializers() {
        let mut pool = PoolBuilder::new();
        let code = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(0)
                .invoke(op::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
                .aload(0)
                .iconst(7)
                .field(op::PUTFIELD, "Point", "x", "I")
                .op(op::RETURN);
            b.build(1)
        };
        let mut point = class(
            "Point",
            pool,
            vec![method("<init>", "()V", MethodAccessFlags::PUBLIC, code)],
        );
        point.fields.push(FieldModel {
            access_flags: FieldAccessFlags::PRIVATE,
            name: "x".to_owned(),
            descriptor: "I".to_owned(),
            constant_value: None,
        });

        let output = decompile_class(&point, &Config::default());
        assert_eq!(output.fields[0].declaration, "private int x = 7;");
        assert!(output.methods.is_empty());
        assert_eq!(output.lines(), ["public class Point {", "    private int x = 7;", "}"]);
    }

    #[test]
    fn statements_land_on_their_lines() {
        let mut pool = PoolBuilder::new();
        let code = {
            let mut b = CodeBuilder::new(&mut pool);
            b.line(3)
                .invoke(op::INVOKESTATIC, "A", "g", "()V")
                .line(5)
                .invoke(op::INVOKESTATIC, "A", "h", "()V")
                .op(op::RETURN);
            b.build(0)
        };
        let test = class("Test", pool, vec![method("f", "()V", MethodAccessFlags::STATIC, code)]);

        let output = decompile_class(&test, &Config::default());
        assert!(output.layout.is_aligned());
        assert_eq!(output.layout.stats.relocation_rounds, 0);
        assert_eq!(
            output.lines(),
            [
                "public class Test {",
                "    static void f() {",
                "        A.g();",
                "",
                "        A.h();",
                "    }",
                "}",
            ]
        );

        let unaligned = Config {
            realign_line_numbers: false,
            ..Config::default()
        };
        let output = decompile_class(&test, &unaligned);
        assert_eq!(output.lines().len(), 6);
    }

    #[test]
    fn randomly_corrupted_methods_stay_isolated() {
        init_logger();
        let mut pool = PoolBuilder::new();
        let code = {
            let mut b = CodeBuilder::new(&mut pool);
            b.iconst(0)
                .istore(1)
                .label("head")
                .iload(1)
                .iload(0)
                .jump(op::IF_ICMPGE, "end")
                .iload(1)
                .invoke(op::INVOKESTATIC, "A", "g", "(I)V")
                .iinc(1, 1)
                .jump(op::GOTO, "head")
                .label("end")
                .op(op::RETURN);
            b.build(2)
        };
        let starts: Vec<usize> = decode(&code.bytecode)
            .unwrap()
            .iter()
            .map(|decoded| decoded.offset as usize)
            .collect();

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let mut corrupt = code.clone();
            if rng.random_bool(0.5) {
                let len = rng.random_range(0..corrupt.bytecode.len());
                corrupt.bytecode.truncate(len);
            } else {
                // 0xcb..=0xfd are unassigned opcodes.
                let at = starts[rng.random_range(0..starts.len())];
                corrupt.bytecode[at] = rng.random_range(0xcb..=0xfd);
            }
            let test = class(
                "Test",
                pool.clone(),
                vec![
                    method("corrupt", "(I)V", MethodAccessFlags::STATIC, corrupt),
                    method("intact", "(I)V", MethodAccessFlags::STATIC, code.clone()),
                ],
            );
            let output = decompile_class(&test, &Config::default());
            assert!(is_structured(&output, "intact"));
            assert!(output.method("corrupt").is_some_and(MethodOutput::is_errored));
        }
    }
}
