//! Control-flow structuring.
//!
//! The flat statement list of a method is turned into a tree in several steps:
//!
//! 1. [`lower`] finds `try` regions and `switch` bodies, nests every other jump into labeled
//!    blocks and `while (true)` loops and expresses it as `break`/`continue`. Jumps that can't be
//!    nested stay `goto`s.
//! 2. [`simplify`] turns blocks into `if`/`else` and infinite loops into `while`/`do-while`.
//! 3. [`idioms`] recognizes `for`, for-each, enum and string `switch`, and try-with-resources.
//! 4. [`labels`] drops the labels nothing needs, and [`declarations`] places local variable
//!    declarations.

mod cover;
mod declarations;
mod idioms;
mod labels;
mod lower;
mod nesting;
mod regions;
mod simplify;
pub mod statement;

pub use statement::{Label, Sink, Statement, StatementKind, emit, render};

use crate::builder::MethodIr;
use crate::context::ClassContext;
use crate::ir::StmtKind;

/// Rewrites run until nothing changes. Each round is a single bottom-up walk, so the count is
/// roughly the nesting depth of the method.
const SIMPLIFY_ROUNDS: usize = 64;

pub fn structure(ir: &mut MethodIr, cx: &ClassContext<'_>) -> Vec<Statement> {
    let mut stmts = lower::lower(ir);
    simplify::simplify(&mut ir.arena, &mut stmts, SIMPLIFY_ROUNDS);
    for _ in 0..cx.config.max_label_rounds {
        if !idioms::apply(&mut ir.arena, &mut stmts, cx) {
            break;
        }
        simplify::simplify(&mut ir.arena, &mut stmts, SIMPLIFY_ROUNDS);
    }
    labels::finalize(&mut stmts);
    if matches!(
        stmts.last(),
        Some(Statement {
            kind: StatementKind::Basic(StmtKind::Return(None)),
            ..
        })
    ) {
        stmts.pop();
    }
    declarations::place(&ir.arena, &mut stmts);
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessors::SwitchMapKey;
    use crate::locals;
    use crate::model::MethodAccessFlags;
    use crate::patterns::test_support::Fixture;
    use crate::patterns::{cleanup, reconstruct};
    use crate::testing::{CodeBuilder, init_logger, op};

    fn decompiled(fixture: &Fixture) -> Vec<String> {
        init_logger();
        let mut ir = fixture.build();
        let cx = fixture.cx();
        reconstruct(&mut ir, &cx);
        locals::reconstruct(&mut ir, cx.parameter_hints(&fixture.class.methods[0]), &fixture.config);
        cleanup(&mut ir);
        let stmts = structure(&mut ir, &cx);
        render(&ir.arena, &stmts)
    }

    fn fixture(descriptor: &str, max_locals: u16, assemble: impl FnOnce(&mut CodeBuilder<'_>)) -> Fixture {
        Fixture::new(descriptor, MethodAccessFlags::STATIC, max_locals, assemble)
    }

    #[test]
    fn counting_loop_is_a_for() {
        // for (int i = 0; i < n; i++) A.g(i);
        let fixture = fixture("(I)V", 2, |b| {
            b.local("n", "I", 0, 0, 64)
                .local("i", "I", 1, 0, 64)
                .iconst(0)
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
        });
        assert_eq!(
            decompiled(&fixture),
            ["for (int i = 0; i < n; i++) {", "    A.g(i);", "}"]
        );
    }

    #[test]
    fn loop_testing_at_the_bottom_is_a_while() {
        // while (A.c()) A.a();
        let fixture = fixture("()V", 0, |b| {
            b.jump(op::GOTO, "test")
                .label("body")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .label("test")
                .invoke(op::INVOKESTATIC, "A", "c", "()Z")
                .jump(op::IFNE, "body")
                .op(op::RETURN);
        });
        assert_eq!(decompiled(&fixture), ["while (A.c()) {", "    A.a();", "}"]);
    }

    #[test]
    fn do_while() {
        let fixture = fixture("()V", 0, |b| {
            b.label("body")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .invoke(op::INVOKESTATIC, "A", "c", "()Z")
                .jump(op::IFNE, "body")
                .op(op::RETURN);
        });
        assert_eq!(decompiled(&fixture), ["do {", "    A.a();", "} while (A.c());"]);
    }

    #[test]
    fn infinite_loop() {
        let fixture = fixture("()V", 0, |b| {
            b.label("body")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .jump(op::GOTO, "body");
        });
        assert_eq!(decompiled(&fixture), ["while (true) {", "    A.a();", "}"]);
    }

    #[test]
    fn iterator_loop_is_a_for_each() {
        // for (String s : list) A.g(s);
        let fixture = fixture("(Ljava/util/List;)V", 3, |b| {
            b.local("list", "Ljava/util/List;", 0, 0, 64)
                .local("s", "Ljava/lang/String;", 2, 0, 64)
                .aload(0)
                .invoke(op::INVOKEINTERFACE, "java/util/List", "iterator", "()Ljava/util/Iterator;")
                .astore(1)
                .label("head")
                .aload(1)
                .invoke(op::INVOKEINTERFACE, "java/util/Iterator", "hasNext", "()Z")
                .jump(op::IFEQ, "end")
                .aload(1)
                .invoke(op::INVOKEINTERFACE, "java/util/Iterator", "next", "()Ljava/lang/Object;")
                .class_op(op::CHECKCAST, "java/lang/String")
                .astore(2)
                .aload(2)
                .invoke(op::INVOKESTATIC, "A", "g", "(Ljava/lang/String;)V")
                .jump(op::GOTO, "head")
                .label("end")
                .op(op::RETURN);
        });
        let lines = decompiled(&fixture);
        assert!(lines.iter().any(|line| line == "for (String s : list) {"), "{lines:?}");
        assert!(lines.iter().any(|line| line == "    A.g(s);"), "{lines:?}");
        assert!(!lines.iter().any(|line| line.contains("hasNext")), "{lines:?}");
    }

    #[test]
    fn if_else() {
        let fixture = fixture("(Z)V", 1, |b| {
            b.local("flag", "Z", 0, 0, 64)
                .iload(0)
                .jump(op::IFEQ, "else")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .jump(op::GOTO, "end")
                .label("else")
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .label("end")
                .op(op::RETURN);
        });
        assert_eq!(
            decompiled(&fixture),
            ["if (flag) {", "    A.a();", "} else {", "    A.b();", "}"]
        );
    }

    #[test]
    fn else_if_chain() {
        let fixture = fixture("(ZZ)V", 2, |b| {
            b.local("a", "Z", 0, 0, 64)
                .local("b", "Z", 1, 0, 64)
                .iload(0)
                .jump(op::IFEQ, "second")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .jump(op::GOTO, "end")
                .label("second")
                .iload(1)
                .jump(op::IFEQ, "last")
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .jump(op::GOTO, "end")
                .label("last")
                .invoke(op::INVOKESTATIC, "A", "c", "()V")
                .label("end")
                .op(op::RETURN);
        });
        assert_eq!(
            decompiled(&fixture),
            [
                "if (a) {",
                "    A.a();",
                "} else if (b) {",
                "    A.b();",
                "} else {",
                "    A.c();",
                "}",
            ]
        );
    }

    #[test]
    fn enum_switch_uses_constant_names() {
        let mut fixture = fixture("(LColor;)V", 1, |b| {
            b.local("color", "LColor;", 0, 0, 64)
                .field(op::GETSTATIC, "Test$1", "$SwitchMap$Color", "[I")
                .aload(0)
                .invoke(op::INVOKEVIRTUAL, "Color", "ordinal", "()I")
                .op(op::IALOAD)
                .tableswitch(0, "end", &["a", "b", "c"])
                .label("a")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .jump(op::GOTO, "end")
                .label("b")
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .jump(op::GOTO, "end")
                .label("c")
                .invoke(op::INVOKESTATIC, "A", "c", "()V")
                .label("end")
                .op(op::RETURN);
        });
        fixture.analysis.switch_maps.insert(
            SwitchMapKey::Field {
                class: "Test$1".to_owned(),
                name: "$SwitchMap$Color".to_owned(),
            },
            [(0, "A"), (1, "B"), (2, "C")]
                .into_iter()
                .map(|(number, name)| (number, name.to_owned()))
                .collect(),
        );
        let lines = decompiled(&fixture);
        assert_eq!(lines[0], "switch (color) {", "{lines:?}");
        let cases: Vec<&str> = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| line.starts_with("case "))
            .collect();
        assert_eq!(cases, ["case A:", "case B:", "case C:"]);
    }

    #[test]
    fn string_switch() {
        // switch (s) { case "a": A.a(); break; case "b": A.b(); }
        let fixture = fixture("(Ljava/lang/String;)V", 3, |b| {
            b.local("s", "Ljava/lang/String;", 0, 0, 128)
                .aload(0)
                .astore(1)
                .iconst(-1)
                .istore(2)
                .aload(1)
                .invoke(op::INVOKEVIRTUAL, "java/lang/String", "hashCode", "()I")
                .lookupswitch("select", &[(97, "hash_a"), (98, "hash_b")])
                .label("hash_a")
                .aload(1)
                .ldc_string("a")
                .invoke(op::INVOKEVIRTUAL, "java/lang/String", "equals", "(Ljava/lang/Object;)Z")
                .jump(op::IFEQ, "select")
                .iconst(0)
                .istore(2)
                .jump(op::GOTO, "select")
                .label("hash_b")
                .aload(1)
                .ldc_string("b")
                .invoke(op::INVOKEVIRTUAL, "java/lang/String", "equals", "(Ljava/lang/Object;)Z")
                .jump(op::IFEQ, "select")
                .iconst(1)
                .istore(2)
                .label("select")
                .iload(2)
                .lookupswitch("end", &[(0, "case_a"), (1, "case_b")])
                .label("case_a")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .jump(op::GOTO, "end")
                .label("case_b")
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .label("end")
                .op(op::RETURN);
        });
        let lines = decompiled(&fixture);
        assert_eq!(lines[0], "switch (s) {", "{lines:?}");
        assert!(lines.iter().any(|line| line.trim() == "case \"a\":"), "{lines:?}");
        assert!(lines.iter().any(|line| line.trim() == "case \"b\":"), "{lines:?}");
        assert!(!lines.iter().any(|line| line.contains("hashCode")), "{lines:?}");
    }

    #[test]
    fn try_with_resources() {
        // try (R r = A.open()) { r.use(); }
        let fixture = fixture("()V", 3, |b| {
            b.local("r", "LR;", 0, 0, 128)
                .invoke(op::INVOKESTATIC, "A", "open", "()LR;")
                .astore(0)
                .label("start")
                .aload(0)
                .invoke(op::INVOKEVIRTUAL, "R", "use", "()V")
                .label("end")
                .aload(0)
                .invoke(op::INVOKEVIRTUAL, "R", "close", "()V")
                .jump(op::GOTO, "done")
                .label("handler")
                .astore(1)
                .label("close_start")
                .aload(0)
                .invoke(op::INVOKEVIRTUAL, "R", "close", "()V")
                .label("close_end")
                .jump(op::GOTO, "rethrow")
                .label("suppress")
                .astore(2)
                .aload(1)
                .aload(2)
                .invoke(
                    op::INVOKEVIRTUAL,
                    "java/lang/Throwable",
                    "addSuppressed",
                    "(Ljava/lang/Throwable;)V",
                )
                .label("rethrow")
                .aload(1)
                .op(op::ATHROW)
                .label("done")
                .op(op::RETURN)
                .try_catch("start", "end", "handler", Some("java/lang/Throwable"))
                .try_catch("close_start", "close_end", "suppress", Some("java/lang/Throwable"));
        });
        assert_eq!(
            decompiled(&fixture),
            ["try (R r = A.open()) {", "    r.use();", "}"]
        );
    }

    #[test]
    fn multi_catch() {
        let fixture = fixture("()V", 1, |b| {
            b.label("start")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .label("end")
                .jump(op::GOTO, "done")
                .label("handler")
                .astore(0)
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .label("done")
                .op(op::RETURN)
                .try_catch("start", "end", "handler", Some("java/io/IOException"))
                .try_catch("start", "end", "handler", Some("java/lang/RuntimeException"));
        });
        let lines = decompiled(&fixture);
        assert_eq!(lines[0], "try {", "{lines:?}");
        assert_eq!(lines[1], "    A.a();", "{lines:?}");
        assert!(
            lines[2].starts_with("} catch (IOException | RuntimeException "),
            "{lines:?}"
        );
        assert_eq!(lines[3], "    A.b();", "{lines:?}");
    }

    #[test]
    fn inline_finally_keeps_one_copy() {
        // try { A.a(); } finally { A.f(); }
        let fixture = fixture("()V", 1, |b| {
            b.label("start")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .label("end")
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .jump(op::GOTO, "done")
                .label("handler")
                .astore(0)
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .aload(0)
                .op(op::ATHROW)
                .label("done")
                .op(op::RETURN)
                .try_catch("start", "end", "handler", None);
        });
        assert_eq!(
            decompiled(&fixture),
            ["try {", "    A.a();", "} finally {", "    A.f();", "}"]
        );
    }

    #[test]
    fn subroutine_finally() {
        // try { A.a(); } finally { A.f(); } as compiled before Java 6.
        let fixture = fixture("()V", 3, |b| {
            b.label("start")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .label("end")
                .jump(op::JSR, "sub")
                .jump(op::GOTO, "done")
                .label("handler")
                .astore(1)
                .jump(op::JSR, "sub")
                .aload(1)
                .op(op::ATHROW)
                .label("sub")
                .astore(2)
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .op_u8(op::RET, 2)
                .label("done")
                .op(op::RETURN)
                .try_catch("start", "end", "handler", None);
        });
        assert_eq!(
            decompiled(&fixture),
            ["try {", "    A.a();", "} finally {", "    A.f();", "}"]
        );
    }

    #[test]
    fn synchronized_block() {
        let fixture = fixture("(Ljava/lang/Object;)V", 3, |b| {
            b.aload(0)
                .op(op::DUP)
                .astore(1)
                .op(op::MONITORENTER)
                .label("start")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .aload(1)
                .op(op::MONITOREXIT)
                .label("end")
                .jump(op::GOTO, "done")
                .label("handler")
                .astore(2)
                .aload(1)
                .op(op::MONITOREXIT)
                .label("handler_end")
                .aload(2)
                .op(op::ATHROW)
                .label("done")
                .op(op::RETURN)
                .try_catch("start", "end", "handler", None)
                .try_catch("handler", "handler_end", "handler", None);
        });
        assert_eq!(
            decompiled(&fixture),
            ["synchronized (paramObject) {", "    A.a();", "}"]
        );
    }

    #[test]
    fn crossing_jumps_keep_a_goto() {
        // A loop entered in its middle.
        let fixture = fixture("(I)V", 1, |b| {
            b.iload(0)
                .jump(op::IFEQ, "middle")
                .label("top")
                .invoke(op::INVOKESTATIC, "A", "a", "()V")
                .label("middle")
                .invoke(op::INVOKESTATIC, "A", "b", "()V")
                .iload(0)
                .jump(op::IFNE, "top")
                .op(op::RETURN);
        });
        let lines = decompiled(&fixture);
        assert!(lines.iter().any(|line| line.contains("goto label")), "{lines:?}");
        assert!(lines.iter().any(|line| line.contains("A.a();")), "{lines:?}");
        assert!(lines.iter().any(|line| line.contains("A.b();")), "{lines:?}");
    }
}
