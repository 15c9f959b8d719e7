use super::{Reconstructor, Targets, TempUses, absorb_previous, has_effects, replace_range};
use crate::builder::MethodIr;
use crate::context::ClassContext;
use crate::descriptor::{MethodDescriptor, PrimitiveType, Type};
use crate::ir::{Arena, BinOp, CallKind, ConcatPart, Expr, ExprId, StmtKind, TempId, exprs_equal};

/// `+ 1` or `- 1` in any numeric type.
fn is_unit(arena: &Arena, id: ExprId) -> bool {
    match arena[id] {
        Expr::Int(value) => value == 1,
        Expr::Long(value) => value == 1,
        Expr::Float(value) => value == 1.0,
        Expr::Double(value) => value == 1.0,
        _ => false,
    }
}

fn step_op(op: BinOp) -> Option<bool> {
    match op {
        BinOp::Add => Some(false),
        BinOp::Sub => Some(true),
        _ => None,
    }
}

/// Whether `a` and `b` denote the same storage location, and evaluating it twice is harmless.
fn same_location(arena: &Arena, a: ExprId, b: ExprId) -> bool {
    arena[a].is_lvalue()
        && !matches!(arena[a], Expr::Temp(_))
        && !arena.has_side_effects(a)
        && exprs_equal(arena, a, b)
}

/// Skips the narrowing conversion compilers insert before storing into a small-typed location.
/// Compound assignment and increments perform it implicitly.
fn strip_narrowing(arena: &Arena, value: ExprId, target: ExprId) -> ExprId {
    let Expr::Convert { value: inner, to, .. } = arena[value] else {
        return value;
    };
    let target_type = arena.type_of(target);
    let implicit = target_type.as_ref() == Some(&Type::Primitive(to))
        || (matches!(to, PrimitiveType::Byte | PrimitiveType::Short | PrimitiveType::Char)
            && target_type
                .as_ref()
                .and_then(Type::as_primitive)
                .is_some_and(PrimitiveType::is_int_like));
    if implicit { inner } else { value }
}

/// Skips a widening conversion of the operand, e.g. the `i2d` in `i = (int) (i + 1.5)`.
fn strip_widening(arena: &Arena, value: ExprId) -> ExprId {
    match arena[value] {
        Expr::Convert { value: inner, .. } => inner,
        _ => value,
    }
}

/// Pre- and post-increments and decrements.
///
/// Shapes recognized, with `L` any location and `tmp` the value left on the stack:
///
/// - `tmp = L; L += 1;` (local `iinc`) and `tmp = L; L = tmp + 1;` (`dup` forms) become
///   `tmp = L++`,
/// - `tmp = L + 1; L = tmp;` becomes `tmp = ++L`,
/// - `L += 1;` followed on the same line by a statement reading the local first becomes a `++L`
///   inside that statement,
/// - a lone `L += 1;` becomes `L++;`.
pub struct Increments;

impl Reconstructor for Increments {
    fn name(&self) -> &'static str {
        "increments"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let targets = Targets::of(ir);
        for index in 0..ir.stmts.len().saturating_sub(1) {
            if targets.is_entry(ir, index + 1) {
                continue;
            }
            if post_increment(ir, index) || pre_increment(ir, index) || fold_local_increment(ir, index)
            {
                return true;
            }
        }

        for stmt in &mut ir.stmts {
            let StmtKind::Expr(value) = stmt.kind else {
                continue;
            };
            let Expr::CompoundAssign { target, op, value: step } = ir.arena[value] else {
                continue;
            };
            let Some(decrement) = step_op(op) else {
                continue;
            };
            if is_unit(&ir.arena, step) {
                let increment = ir.arena.alloc(Expr::Increment {
                    target,
                    prefix: false,
                    decrement,
                });
                stmt.kind = StmtKind::Expr(increment);
                return true;
            }
        }
        false
    }
}

/// The location and direction of a `L += 1`/`L++` statement.
fn statement_step(arena: &Arena, kind: &StmtKind) -> Option<(ExprId, bool)> {
    let StmtKind::Expr(value) = *kind else {
        return None;
    };
    match arena[value] {
        Expr::CompoundAssign { target, op, value } if is_unit(arena, value) => {
            Some((target, step_op(op)?))
        }
        Expr::Increment {
            target,
            prefix: false,
            decrement,
        } => Some((target, decrement)),
        _ => None,
    }
}

fn post_increment(ir: &mut MethodIr, index: usize) -> bool {
    let Some((temp, location)) = ir.stmts[index].as_temp_assign(&ir.arena) else {
        return false;
    };
    let arena = &ir.arena;
    let decrement = match &ir.stmts[index + 1].kind {
        kind @ StmtKind::Expr(_) => match statement_step(arena, kind) {
            Some((target, decrement)) if same_location(arena, location, target) => decrement,
            _ => return false,
        },
        StmtKind::Assign { target, value } => {
            if !same_location(arena, location, *target) {
                return false;
            }
            let value = strip_narrowing(arena, *value, *target);
            match arena[value] {
                Expr::Binary { op, lhs, rhs }
                    if matches!(arena[lhs], Expr::Temp(t) if t == temp) && is_unit(arena, rhs) =>
                {
                    let Some(decrement) = step_op(op) else {
                        return false;
                    };
                    decrement
                }
                _ => return false,
            }
        }
        _ => return false,
    };
    let increment = ir.arena.alloc(Expr::Increment {
        target: location,
        prefix: false,
        decrement,
    });
    let StmtKind::Assign { value, .. } = &mut ir.stmts[index].kind else {
        return false;
    };
    *value = increment;
    ir.stmts.remove(index + 1);
    true
}

fn pre_increment(ir: &mut MethodIr, index: usize) -> bool {
    let Some((temp, value)) = ir.stmts[index].as_temp_assign(&ir.arena) else {
        return false;
    };
    let StmtKind::Assign {
        target: location,
        value: stored,
    } = ir.stmts[index + 1].kind
    else {
        return false;
    };
    let arena = &ir.arena;
    if !matches!(arena[stored], Expr::Temp(t) if t == temp) {
        return false;
    }
    let sum = strip_narrowing(arena, value, location);
    let Expr::Binary { op, lhs, rhs } = arena[sum] else {
        return false;
    };
    let Some(decrement) = step_op(op) else {
        return false;
    };
    if !is_unit(arena, rhs) || !same_location(arena, lhs, location) {
        return false;
    }
    let increment = ir.arena.alloc(Expr::Increment {
        target: lhs,
        prefix: true,
        decrement,
    });
    let StmtKind::Assign { value, .. } = &mut ir.stmts[index].kind else {
        return false;
    };
    *value = increment;
    ir.stmts.remove(index + 1);
    true
}

/// `iinc x 1` followed by a load of `x` in the next statement is `++x`, but it could just as well
/// be `x++;` followed by a statement using `x`. The two are merged only when they share a line.
fn fold_local_increment(ir: &mut MethodIr, index: usize) -> bool {
    let (first, second) = (&ir.stmts[index], &ir.stmts[index + 1]);
    if first.line.is_none() || first.line != second.line {
        return false;
    }
    let Some((target, decrement)) = statement_step(&ir.arena, &first.kind) else {
        return false;
    };
    let Expr::Slot { index: slot, .. } = ir.arena[target] else {
        return false;
    };
    let reads = match second.kind {
        // The target of a local store is written, not read.
        StmtKind::Assign { target, value } if matches!(ir.arena[target], Expr::Slot { .. }) => {
            vec![value]
        }
        _ => second.exprs(),
    };
    let Some(read) = first_clean_read(&ir.arena, &reads, slot) else {
        return false;
    };
    let location = ir.arena.deep_clone(read);
    ir.arena.replace(
        read,
        Expr::Increment {
            target: location,
            prefix: true,
            decrement,
        },
    );
    absorb_previous(ir, index);
    true
}

/// The first read of the slot in evaluation order, if nothing with an effect is evaluated before it.
fn first_clean_read(arena: &Arena, roots: &[ExprId], slot: u16) -> Option<ExprId> {
    fn visit(arena: &Arena, id: ExprId, slot: u16) -> Result<Option<ExprId>, ()> {
        let expr = &arena[id];
        if matches!(expr, Expr::Slot { index, .. } if *index == slot) {
            return Ok(Some(id));
        }
        for child in expr.children() {
            if let Some(found) = visit(arena, child, slot)? {
                return Ok(Some(found));
            }
        }
        if has_effects(expr) { Err(()) } else { Ok(None) }
    }

    for root in roots {
        if let Some(found) = visit(arena, *root, slot).ok()? {
            return Some(found);
        }
    }
    None
}

/// `L = L op v` becomes `L op= v`.
pub struct CompoundAssignments;

impl Reconstructor for CompoundAssignments {
    fn name(&self) -> &'static str {
        "compound assignments"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        for index in 0..ir.stmts.len() {
            let StmtKind::Assign { target, value } = ir.stmts[index].kind else {
                continue;
            };
            if !ir.arena[target].is_lvalue() || matches!(ir.arena[target], Expr::Temp(_)) {
                continue;
            }
            let Some(compound) = as_compound(&mut ir.arena, target, value) else {
                continue;
            };
            ir.stmts[index].kind = StmtKind::Expr(compound);
            return true;
        }
        false
    }
}

fn as_compound(arena: &mut Arena, target: ExprId, value: ExprId) -> Option<ExprId> {
    let stripped = strip_narrowing(arena, value, target);
    match arena[stripped].clone() {
        Expr::Binary { op, lhs, rhs } if !op.is_comparison() => {
            let lhs = strip_widening(arena, lhs);
            if !same_location(arena, lhs, target) {
                return None;
            }
            Some(arena.alloc(Expr::CompoundAssign {
                target,
                op,
                value: rhs,
            }))
        }
        // s = s + a + b
        Expr::StringConcat { mut parts } if parts.len() >= 2 => {
            if !same_location(arena, parts[0].value, target)
                || !arena.type_of(target).is_some_and(|ty| ty.is_string())
            {
                return None;
            }
            parts.remove(0);
            let rest = match &parts[..] {
                [single] => single.value,
                _ => arena.alloc(Expr::StringConcat { parts }),
            };
            Some(arena.alloc(Expr::CompoundAssign {
                target,
                op: BinOp::Add,
                value: rest,
            }))
        }
        _ => None,
    }
}

/// Assignment chains and assignments used as values.
///
/// `tmp = v; A = tmp; B = tmp;` with no other reads of `tmp` is `B = A = v;`. If `tmp` is read
/// elsewhere too, the stores fold into its definition one by one: `tmp = (A = v)`. Assignments left
/// as statement-level expressions become assignment statements.
pub struct Assignments;

impl Reconstructor for Assignments {
    fn name(&self) -> &'static str {
        "assignment chains"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        for stmt in &mut ir.stmts {
            if let StmtKind::Expr(value) = stmt.kind
                && let Expr::Assign { target, value } = ir.arena[value]
            {
                stmt.kind = StmtKind::Assign { target, value };
                return true;
            }
        }

        let uses = TempUses::collect(ir);
        let targets = Targets::of(ir);
        for index in 0..ir.stmts.len() {
            let Some((temp, value)) = ir.stmts[index].as_temp_assign(&ir.arena) else {
                continue;
            };
            if matches!(ir.arena[value], Expr::NewUninitialized { .. }) {
                continue;
            }
            let stores = chained_stores(ir, &targets, index, temp, value);
            if stores.is_empty() {
                continue;
            }

            if uses.def_count(temp) == 1 && uses.use_count(temp) == stores.len() && stores.len() >= 2 {
                let chain = StmtKind::MultiAssign {
                    targets: stores,
                    value,
                };
                let end = index + 1 + chain_len(&chain);
                replace_range(ir, index..end, chain);
                return true;
            }
            if uses.use_count(temp) > 1 || uses.def_count(temp) > 1 {
                let assign = ir.arena.alloc(Expr::Assign {
                    target: stores[0],
                    value,
                });
                let StmtKind::Assign { value, .. } = &mut ir.stmts[index].kind else {
                    continue;
                };
                *value = assign;
                ir.stmts.remove(index + 1);
                return true;
            }
        }
        false
    }
}

fn chain_len(kind: &StmtKind) -> usize {
    match kind {
        StmtKind::MultiAssign { targets, .. } => targets.len(),
        _ => 0,
    }
}

/// Targets of the `X = tmp` statements right after `tmp = value`, for targets that can be
/// evaluated before `value` without changing the result.
fn chained_stores(
    ir: &MethodIr,
    targets: &Targets,
    index: usize,
    temp: TempId,
    value: ExprId,
) -> Vec<ExprId> {
    let arena = &ir.arena;
    let value_writes = arena.any(value, &mut |expr| {
        matches!(
            expr,
            Expr::Increment { .. } | Expr::CompoundAssign { .. } | Expr::Assign { .. }
        )
    });
    let mut out = Vec::new();
    for next in index + 1..ir.stmts.len() {
        if targets.is_entry(ir, next) {
            break;
        }
        let StmtKind::Assign { target, value } = ir.stmts[next].kind else {
            break;
        };
        if !matches!(arena[value], Expr::Temp(t) if t == temp) || arena.uses_temp(target, temp) {
            break;
        }
        let simple = arena[target].children().into_iter().all(|child| {
            matches!(
                arena[child],
                Expr::This
                    | Expr::OuterThis { .. }
                    | Expr::Slot { .. }
                    | Expr::Var(_)
                    | Expr::Temp(_)
            ) || arena[child].is_constant()
        });
        if !simple || (value_writes && !arena[target].children().is_empty()) {
            break;
        }
        out.push(target);
    }
    out
}

/// `new StringBuilder().append(a).append(b).toString()` becomes `a + b`.
pub struct StringConcat;

impl Reconstructor for StringConcat {
    fn name(&self) -> &'static str {
        "string concatenation"
    }

    fn rewrite_once(&self, ir: &mut MethodIr, _cx: &ClassContext<'_>) -> bool {
        let roots: Vec<ExprId> = ir.stmts.iter().flat_map(|stmt| stmt.exprs()).collect();
        for root in roots {
            let mut found = None;
            ir.arena.walk(root, &mut |id, _| {
                if found.is_none()
                    && let Some(parts) = concat_parts(&ir.arena, id)
                {
                    found = Some((id, parts));
                }
            });
            if let Some((id, parts)) = found {
                ir.arena.replace(id, Expr::StringConcat { parts });
                return true;
            }
        }
        false
    }
}

fn is_builder_class(class: &str) -> bool {
    class == "java/lang/StringBuilder" || class == "java/lang/StringBuffer"
}

/// The operands of a `toString()` call on a builder chain.
fn concat_parts(arena: &Arena, id: ExprId) -> Option<Vec<ConcatPart>> {
    let Expr::Call {
        class,
        name,
        kind: CallKind::Virtual { object },
        arguments,
        ..
    } = &arena[id]
    else {
        return None;
    };
    if name != "toString" || !arguments.is_empty() || !is_builder_class(class) {
        return None;
    }

    let mut parts = Vec::new();
    let mut current = *object;
    loop {
        match &arena[current] {
            Expr::Call {
                class,
                name,
                descriptor,
                kind: CallKind::Virtual { object },
                arguments,
            } if name == "append" && is_builder_class(class) => {
                let [argument] = arguments[..] else {
                    return None;
                };
                let ty = MethodDescriptor::parse(descriptor).ok()?.parameters.pop()?;
                // `append(char[])` appends the characters, `+` would append the array reference.
                if ty.element_type().is_some() {
                    return None;
                }
                parts.push(ConcatPart {
                    value: argument,
                    ty,
                });
                current = *object;
            }
            Expr::InvokeNew {
                class,
                descriptor,
                arguments,
            } if is_builder_class(class) => {
                match (descriptor.as_str(), &arguments[..]) {
                    ("()V", []) => {}
                    ("(Ljava/lang/String;)V", [initial]) => parts.push(initial_part(arena, *initial)),
                    _ => return None,
                }
                break;
            }
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts)
}

/// `new StringBuilder(String.valueOf(x))` starts with `x` itself.
fn initial_part(arena: &Arena, value: ExprId) -> ConcatPart {
    if let Expr::Call {
        class,
        name,
        descriptor,
        kind: CallKind::Static,
        arguments,
    } = &arena[value]
        && class == "java/lang/String"
        && name == "valueOf"
        && let [argument] = arguments[..]
        && let Some(ty) = MethodDescriptor::parse(descriptor)
            .ok()
            .and_then(|mut descriptor| descriptor.parameters.pop())
        && ty.element_type().is_none()
    {
        return ConcatPart {
            value: argument,
            ty,
        };
    }
    ConcatPart {
        value,
        ty: Type::object("java/lang/String"),
    }
}
