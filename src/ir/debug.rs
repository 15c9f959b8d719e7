use super::{Arena, BinOp, CallKind, Expr, ExprId, LogicalOp, Stmt, StmtKind};
use crate::bytecode::Kind;
use crate::descriptor::{PrimitiveType, Type, simple_class_name};
use core::fmt::{self, Write};

/// Rendering of IR nodes as Java-like source. The output of expressions is what ends up in the
/// final listing, so unlike the usual `Debug` output it's meant to be read by humans.
pub trait DebugIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result;
}

impl<T: DebugIr + ?Sized> DebugIr for &T {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        T::fmt(self, f, arena)
    }
}

impl<T: DebugIr> DebugIr for Vec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        for stmt in self {
            writeln!(f, "{}", arena.debug(stmt))?;
        }
        Ok(())
    }
}

impl DebugIr for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        write_expr(f, arena, *self, 0)
    }
}

impl DebugIr for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        write!(f, "{}: {}", self.offset, arena.debug(&self.kind))
    }
}

impl DebugIr for StmtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>, arena: &Arena) -> fmt::Result {
        match self {
            StmtKind::Assign { target, value } => {
                write!(f, "{} = {}", arena.debug(target), arena.debug(value))
            }
            StmtKind::MultiAssign { targets, value } => {
                for target in targets.iter().rev() {
                    write!(f, "{} = ", arena.debug(target))?;
                }
                write!(f, "{}", arena.debug(value))
            }
            StmtKind::Expr(value) => write!(f, "{}", arena.debug(value)),
            StmtKind::Return(None) => write!(f, "return"),
            StmtKind::Return(Some(value)) => write!(f, "return {}", arena.debug(value)),
            StmtKind::Throw(value) => write!(f, "throw {}", arena.debug(value)),
            StmtKind::MonitorEnter(value) => write!(f, "monitorenter {}", arena.debug(value)),
            StmtKind::MonitorExit(value) => write!(f, "monitorexit {}", arena.debug(value)),
            StmtKind::If { condition, target } => {
                write!(f, "if ({}) goto {target}", arena.debug(condition))
            }
            StmtKind::Goto(target) => write!(f, "goto {target}"),
            StmtKind::Jsr(target) => write!(f, "jsr {target}"),
            StmtKind::Ret(slot) => write!(f, "ret slot{slot}"),
            StmtKind::Switch {
                key,
                default,
                cases,
            } => {
                write!(f, "switch ({}) {{", arena.debug(key))?;
                for (value, target) in cases {
                    write!(f, " {value} -> {target},")?;
                }
                write!(f, " default -> {default} }}")
            }
        }
    }
}

const ASSIGNMENT: u8 = 1;
const TERNARY: u8 = 2;
const UNARY: u8 = 13;
const POSTFIX: u8 = 14;

fn precedence(arena: &Arena, expr: &Expr) -> u8 {
    match expr {
        Expr::Assign { .. } | Expr::CompoundAssign { .. } => ASSIGNMENT,
        Expr::Ternary { .. } => TERNARY,
        Expr::Logical {
            op: LogicalOp::Or, ..
        } => 3,
        Expr::Logical {
            op: LogicalOp::And,
            ..
        } => 4,
        Expr::Binary { op, .. } => op.precedence(),
        Expr::InstanceOf { .. } => 9,
        Expr::StringConcat { .. } => BinOp::Add.precedence(),
        Expr::Cast { .. } | Expr::Neg(_) | Expr::Not(_) => UNARY,
        Expr::Convert { value, from, to } => {
            if is_widening(*from, *to) {
                precedence(arena, &arena[*value])
            } else {
                UNARY
            }
        }
        Expr::Increment { prefix: true, .. } => UNARY,
        Expr::Int(value) if *value < 0 => UNARY,
        Expr::Long(value) if *value < 0 => UNARY,
        _ => POSTFIX,
    }
}

/// Conversions that Java performs implicitly and that we therefore don't display.
fn is_widening(from: PrimitiveType, to: PrimitiveType) -> bool {
    use PrimitiveType::*;
    matches!(
        (from, to),
        (Int, Long) | (Int, Float) | (Int, Double) | (Long, Float) | (Long, Double) | (Float, Double)
    )
}

fn write_list(f: &mut fmt::Formatter<'_>, arena: &Arena, items: &[ExprId]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_expr(f, arena, *item, ASSIGNMENT)?;
    }
    Ok(())
}

/// The class qualifier for a static member, empty for members of the class being decompiled.
fn qualifier(arena: &Arena, class: &str) -> String {
    if class == arena.owner {
        String::new()
    } else {
        format!("{}.", simple_class_name(class))
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, arena: &Arena, id: ExprId, min_prec: u8) -> fmt::Result {
    let expr = &arena[id];
    let prec = precedence(arena, expr);
    if prec < min_prec {
        write!(f, "(")?;
        write_bare(f, arena, expr)?;
        write!(f, ")")
    } else {
        write_bare(f, arena, expr)
    }
}

fn write_float(
    f: &mut fmt::Formatter<'_>,
    value: f64,
    text: &str,
    class: &str,
    suffix: char,
) -> fmt::Result {
    if value.is_nan() {
        write!(f, "{class}.NaN")
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "POSITIVE" } else { "NEGATIVE" };
        write!(f, "{class}.{sign}_INFINITY")
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.1}{suffix}")
    } else {
        write!(f, "{text}{suffix}")
    }
}

pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ch if (ch as u32) < 0x20 || ch as u32 == 0x7f => {
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn write_array_type(f: &mut fmt::Formatter<'_>, ty: &Type, lengths: &[ExprId], arena: &Arena) -> fmt::Result {
    let mut base = ty;
    let mut dimensions = 0;
    while let Some(element) = base.element_type() {
        base = element;
        dimensions += 1;
    }
    write!(f, "new {base}")?;
    for length in lengths {
        write!(f, "[")?;
        write_expr(f, arena, *length, 0)?;
        write!(f, "]")?;
    }
    for _ in lengths.len()..dimensions {
        write!(f, "[]")?;
    }
    Ok(())
}

fn write_bare(f: &mut fmt::Formatter<'_>, arena: &Arena, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::This => write!(f, "this"),
        Expr::OuterThis { class } => write!(f, "{}.this", simple_class_name(class)),
        Expr::Slot { index, .. } => write!(f, "slot{index}"),
        Expr::Var(var) => match arena.locals.get(var.0 as usize) {
            Some(local) => write!(f, "{}", local.name),
            None => write!(f, "var{}", var.0),
        },
        Expr::Temp(temp) => write!(f, "tmp{temp}"),
        Expr::CaughtException => write!(f, "/* exception */"),
        Expr::ReturnAddress => write!(f, "/* return address */"),
        Expr::Null => write!(f, "null"),
        Expr::Bool(value) => write!(f, "{value}"),
        Expr::Int(value) => write!(f, "{value}"),
        Expr::Long(value) => write!(f, "{value}L"),
        Expr::Float(value) => write_float(f, *value as f64, &value.to_string(), "Float", 'F'),
        Expr::Double(value) => write_float(f, *value, &value.to_string(), "Double", 'D'),
        Expr::String(value) => write!(f, "{}", escape_string(value)),
        Expr::Class(ty) => write!(f, "{ty}.class"),
        Expr::MethodType(descriptor) => write!(f, "/* method type */ {}", escape_string(descriptor)),
        Expr::MethodHandle { owner, name } => write!(f, "{}::{name}", simple_class_name(owner)),
        Expr::Dynamic { name, .. } => write!(f, "/* dynamic */ {name}"),
        Expr::Field {
            object, class, name, ..
        } => match object {
            Some(object) => {
                write_expr(f, arena, *object, POSTFIX)?;
                write!(f, ".{name}")
            }
            None => write!(f, "{}{name}", qualifier(arena, class)),
        },
        Expr::ArrayElement { array, index } => {
            write_expr(f, arena, *array, POSTFIX)?;
            write!(f, "[")?;
            write_expr(f, arena, *index, 0)?;
            write!(f, "]")
        }
        Expr::ArrayLength { array } => {
            write_expr(f, arena, *array, POSTFIX)?;
            write!(f, ".length")
        }
        Expr::NewArray { ty, lengths } => write_array_type(f, ty, lengths, arena),
        Expr::NewArrayInit { ty, elements } => {
            write!(f, "new {ty} {{")?;
            write_list(f, arena, elements)?;
            write!(f, "}}")
        }
        Expr::NewUninitialized { class } => write!(f, "new {}", simple_class_name(class)),
        Expr::InvokeNew {
            class, arguments, ..
        } => {
            write!(f, "new {}(", simple_class_name(class))?;
            write_list(f, arena, arguments)?;
            write!(f, ")")
        }
        Expr::Call {
            class,
            name,
            kind,
            arguments,
            ..
        } => {
            match kind {
                CallKind::Static => write!(f, "{}{name}", qualifier(arena, class))?,
                CallKind::Dynamic => write!(f, "{name}")?,
                CallKind::Special { object } if name == "<init>" => {
                    if matches!(arena[*object], Expr::This) {
                        if *class == arena.owner {
                            write!(f, "this")?;
                        } else {
                            write!(f, "super")?;
                        }
                    } else {
                        write_expr(f, arena, *object, POSTFIX)?;
                        write!(f, ".<init>")?;
                    }
                }
                CallKind::Special { object }
                    if matches!(arena[*object], Expr::This) && *class != arena.owner =>
                {
                    write!(f, "super.{name}")?;
                }
                CallKind::Virtual { object }
                | CallKind::Special { object }
                | CallKind::Interface { object } => {
                    write_expr(f, arena, *object, POSTFIX)?;
                    write!(f, ".{name}")?;
                }
            }
            write!(f, "(")?;
            write_list(f, arena, arguments)?;
            write!(f, ")")
        }
        Expr::InstanceOf { object, class } => {
            write_expr(f, arena, *object, 10)?;
            write!(f, " instanceof {class}")
        }
        Expr::Cast { value, to } => {
            write!(f, "({to}) ")?;
            write_expr(f, arena, *value, UNARY)
        }
        Expr::Convert { value, from, to } => {
            if is_widening(*from, *to) {
                write_bare(f, arena, &arena[*value])
            } else {
                write!(f, "({to}) ")?;
                write_expr(f, arena, *value, UNARY)
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let prec = op.precedence();
            write_expr(f, arena, *lhs, prec)?;
            write!(f, " {op} ")?;
            write_expr(f, arena, *rhs, prec + 1)
        }
        Expr::Compare { kind, lhs, rhs, .. } => {
            let class = match kind {
                Kind::Long => "Long",
                Kind::Float => "Float",
                _ => "Double",
            };
            write!(f, "{class}.compare(")?;
            write_list(f, arena, &[*lhs, *rhs])?;
            write!(f, ")")
        }
        Expr::Neg(value) => {
            write!(f, "-")?;
            write_expr(f, arena, *value, UNARY)
        }
        Expr::Not(value) => {
            write!(f, "!")?;
            write_expr(f, arena, *value, UNARY)
        }
        Expr::Logical { op, lhs, rhs } => {
            let prec = precedence(arena, expr);
            write_expr(f, arena, *lhs, prec)?;
            write!(f, " {op} ")?;
            write_expr(f, arena, *rhs, prec + 1)
        }
        Expr::Ternary {
            condition,
            branches,
        } => {
            write_expr(f, arena, *condition, TERNARY + 1)?;
            write!(f, " ? ")?;
            write_expr(f, arena, branches[0], TERNARY + 1)?;
            write!(f, " : ")?;
            write_expr(f, arena, branches[1], TERNARY)
        }
        Expr::Increment {
            target,
            prefix,
            decrement,
        } => {
            let op = if *decrement { "--" } else { "++" };
            if *prefix {
                write!(f, "{op}")?;
                write_expr(f, arena, *target, UNARY)
            } else {
                write_expr(f, arena, *target, POSTFIX)?;
                write!(f, "{op}")
            }
        }
        Expr::CompoundAssign { target, op, value } => {
            write_expr(f, arena, *target, POSTFIX)?;
            write!(f, " {op}= ")?;
            write_expr(f, arena, *value, ASSIGNMENT)
        }
        Expr::Assign { target, value } => {
            write_expr(f, arena, *target, POSTFIX)?;
            write!(f, " = ")?;
            write_expr(f, arena, *value, ASSIGNMENT)
        }
        Expr::StringConcat { parts } => {
            let is_string = |index: usize| {
                parts
                    .get(index)
                    .is_some_and(|part| part.ty.is_string() || matches!(arena[part.value], Expr::String(_)))
            };
            // Without a string among the first two operands, `+` would be numeric addition.
            if !is_string(0) && !is_string(1) {
                write!(f, "\"\" + ")?;
            }
            let prec = BinOp::Add.precedence();
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " + ")?;
                }
                write_expr(f, arena, part.value, prec + 1)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ConcatPart;

    #[test]
    fn parenthesization() {
        let mut arena = Arena::new("Test");
        let a = arena.int(1);
        let b = arena.int(2);
        let c = arena.int(3);
        let sum = arena.alloc(Expr::Binary {
            op: BinOp::Add,
            lhs: a,
            rhs: b,
        });
        let product = arena.alloc(Expr::Binary {
            op: BinOp::Mul,
            lhs: sum,
            rhs: c,
        });
        assert_eq!(arena.debug(&product).to_string(), "(1 + 2) * 3");

        let x = arena.int(4);
        let y = arena.int(5);
        let z = arena.int(6);
        let diff = arena.alloc(Expr::Binary {
            op: BinOp::Sub,
            lhs: y,
            rhs: z,
        });
        let outer = arena.alloc(Expr::Binary {
            op: BinOp::Sub,
            lhs: x,
            rhs: diff,
        });
        assert_eq!(arena.debug(&outer).to_string(), "4 - (5 - 6)");
    }

    #[test]
    fn concat_needs_string_prefix() {
        let mut arena = Arena::new("Test");
        let a = arena.int(1);
        let b = arena.int(2);
        let concat = arena.alloc(Expr::StringConcat {
            parts: vec![
                ConcatPart {
                    value: a,
                    ty: Type::INT,
                },
                ConcatPart {
                    value: b,
                    ty: Type::INT,
                },
            ],
        });
        assert_eq!(arena.debug(&concat).to_string(), "\"\" + 1 + 2");
    }

    #[test]
    fn escapes() {
        assert_eq!(escape_string("a\"b\\\n\u{1}"), "\"a\\\"b\\\\\\n\\u0001\"");
    }
}
