//! Rewrites of compiler idioms on the flat statement list.
//!
//! Every reconstructor looks for one family of shapes and replaces each match with a single
//! higher-level statement or expression. They never merge statements across a jump target or an
//! exception range boundary, so the jumps left in the list stay meaningful.
//!
//! A reconstructor iterates internally until it finds nothing more to do, so running it a second
//! time is a no-op. The whole sequence is repeated because rewrites enable each other: a temporary
//! is only inlined into a condition after the construction it holds has been folded, a ternary is
//! only recognized after its branches have shrunk to one statement, and so on.

mod cleanup;
mod construction;
mod expressions;
mod flow;
pub mod initializers;
mod members;
mod temps;

pub use cleanup::cleanup;

use crate::builder::MethodIr;
use crate::bytecode::Kind;
use crate::context::ClassContext;
use crate::ir::{Arena, Expr, ExprId, Stmt, StmtKind, TempId};
use rustc_hash::{FxHashMap, FxHashSet};

pub trait Reconstructor {
    fn name(&self) -> &'static str;

    /// Rewrites one match. Returns `false` if there was nothing to rewrite.
    fn rewrite_once(&self, ir: &mut MethodIr, cx: &ClassContext<'_>) -> bool;

    /// Rewrites until nothing matches or the iteration cap is hit. Returns whether anything changed.
    fn run(&self, ir: &mut MethodIr, cx: &ClassContext<'_>) -> bool {
        let mut changed = false;
        // A single rewrite can expose several new matches, so the cap is per-statement rather than
        // global.
        let cap = cx.config.max_pattern_iterations.saturating_mul(ir.stmts.len().max(1));
        for _ in 0..cap {
            if !self.rewrite_once(ir, cx) {
                return changed;
            }
            changed = true;
        }
        log::debug!(
            "{} hit the iteration cap in {}.{}",
            self.name(),
            ir.class_name,
            ir.name
        );
        changed
    }
}

/// The reconstructors, in the order they're applied. Earlier ones normalize what later ones match.
pub fn reconstructors() -> Vec<Box<dyn Reconstructor>> {
    vec![
        Box::new(temps::DiscardedValues),
        Box::new(flow::Conditions),
        Box::new(construction::Construction),
        Box::new(construction::ArrayInitializers),
        Box::new(members::OuterThis),
        Box::new(members::Accessors),
        Box::new(expressions::Increments),
        Box::new(expressions::CompoundAssignments),
        Box::new(expressions::Assignments),
        Box::new(temps::InlineTemps),
        Box::new(flow::Ternaries),
        Box::new(members::ClassLiterals),
        Box::new(expressions::StringConcat),
    ]
}

/// Runs every reconstructor until none of them changes anything.
pub fn reconstruct(ir: &mut MethodIr, cx: &ClassContext<'_>) {
    let passes = reconstructors();
    for round in 0..cx.config.max_pattern_iterations {
        let mut changed = false;
        for pass in &passes {
            if pass.run(ir, cx) {
                log::trace!("{} changed {}.{} in round {round}", pass.name(), ir.class_name, ir.name);
                changed = true;
            }
        }
        if !changed {
            return;
        }
    }
    log::debug!(
        "Pattern reconstruction of {}.{} didn't converge",
        ir.class_name,
        ir.name
    );
}

/// Where each temporary is assigned and read.
#[derive(Default)]
pub struct TempUses {
    /// Indices of `tmp = value` statements.
    pub defs: FxHashMap<TempId, Vec<usize>>,
    /// Indices of statements reading the temporary, once per read.
    pub uses: FxHashMap<TempId, Vec<usize>>,
}

impl TempUses {
    pub fn collect(ir: &MethodIr) -> Self {
        let mut out = Self::default();
        for (index, stmt) in ir.stmts.iter().enumerate() {
            let mut roots = stmt.exprs();
            if let Some((temp, value)) = stmt.as_temp_assign(&ir.arena) {
                out.defs.entry(temp).or_default().push(index);
                roots = vec![value];
            }
            for root in roots {
                ir.arena.walk(root, &mut |_, expr| {
                    if let Expr::Temp(temp) = expr {
                        out.uses.entry(*temp).or_default().push(index);
                    }
                });
            }
        }
        out
    }

    pub fn def_count(&self, temp: TempId) -> usize {
        self.defs.get(&temp).map_or(0, Vec::len)
    }

    pub fn use_count(&self, temp: TempId) -> usize {
        self.uses.get(&temp).map_or(0, Vec::len)
    }

    pub fn uses(&self, temp: TempId) -> &[usize] {
        self.uses.get(&temp).map_or(&[], Vec::as_slice)
    }
}

/// Statement-level view of jump targets.
pub struct Targets {
    offsets: FxHashSet<u32>,
}

impl Targets {
    pub fn of(ir: &MethodIr) -> Self {
        Self {
            offsets: ir.jump_targets(),
        }
    }

    /// Whether control can enter the statement at `index` other than from the previous statement.
    pub fn is_entry(&self, ir: &MethodIr, index: usize) -> bool {
        ir.is_target(index, &self.offsets)
    }

    /// Whether any statement in `range` other than the first can be entered from elsewhere.
    pub fn splits(&self, ir: &MethodIr, range: core::ops::Range<usize>) -> bool {
        range.skip(1).any(|index| self.is_entry(ir, index))
    }
}

/// Whether the expression is the receiver of an instance method. Before local variables are
/// reconstructed, that's a load of slot 0.
pub fn is_this(ir: &MethodIr, id: ExprId) -> bool {
    match ir.arena[id] {
        Expr::This => true,
        Expr::Slot {
            index: 0,
            kind: Kind::Reference,
            ..
        } => !ir.is_static(),
        _ => false,
    }
}

/// Whether evaluating the expression writes anything.
pub fn has_effects(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Call { .. }
            | Expr::InvokeNew { .. }
            | Expr::Increment { .. }
            | Expr::CompoundAssign { .. }
            | Expr::Assign { .. }
    )
}

/// Finds the read of `temp` in `roots` and checks that nothing evaluated before it has an effect,
/// so that the value bound to `temp` can be computed in its place.
pub fn can_substitute(arena: &Arena, roots: &[ExprId], temp: TempId) -> bool {
    fn visit(arena: &Arena, id: ExprId, temp: TempId, dirty: &mut bool) -> Option<bool> {
        let expr = &arena[id];
        if matches!(expr, Expr::Temp(t) if *t == temp) {
            return Some(!*dirty);
        }
        for child in expr.children() {
            if let Some(found) = visit(arena, child, temp, dirty) {
                return Some(found);
            }
        }
        // Post-order: the node itself is evaluated after its children.
        if has_effects(expr) {
            *dirty = true;
        }
        None
    }

    let mut dirty = false;
    for root in roots {
        if let Some(found) = visit(arena, *root, temp, &mut dirty) {
            return found;
        }
    }
    false
}

/// Replaces the (single) read of `temp` under `root` with the expression at `value`.
pub fn substitute(arena: &mut Arena, root: ExprId, temp: TempId, value: ExprId) -> bool {
    let Some(node) = arena.find(root, &mut |expr| matches!(expr, Expr::Temp(t) if *t == temp)) else {
        return false;
    };
    let expr = arena[value].clone();
    arena.replace(node, expr);
    true
}

/// Folds the statement at `from` into the statement right after it, which takes over its address
/// and line.
pub fn absorb_previous(ir: &mut MethodIr, from: usize) {
    let removed = ir.stmts.remove(from);
    let stmt = &mut ir.stmts[from];
    stmt.offset = removed.offset;
    stmt.line = removed.line.or(stmt.line);
}

/// Replaces `stmts[range]` with a single statement at the address of the first one.
pub fn replace_range(ir: &mut MethodIr, range: core::ops::Range<usize>, kind: StmtKind) {
    let first = &ir.stmts[range.start];
    let stmt = Stmt::new(first.offset, first.line, kind);
    ir.stmts.splice(range, [stmt]);
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::builder::build_method;
    use crate::config::Config;
    use crate::context::Analysis;
    use crate::model::{ClassModel, MethodAccessFlags, PoolBuilder};
    use crate::testing::{CodeBuilder, class, method};

    pub struct Fixture {
        pub class: ClassModel,
        pub analysis: Analysis,
        pub config: Config,
        /// The method `build` decompiles.
        pub method: usize,
    }

    impl Fixture {
        pub fn new(
            descriptor: &str,
            flags: MethodAccessFlags,
            max_locals: u16,
            assemble: impl FnOnce(&mut CodeBuilder<'_>),
        ) -> Self {
            let mut pool = PoolBuilder::new();
            let code = {
                let mut builder = CodeBuilder::new(&mut pool);
                assemble(&mut builder);
                builder.build(max_locals)
            };
            Self::of(class("Test", pool, vec![method("f", descriptor, flags, code)]), 0)
        }

        pub fn of(class: ClassModel, method: usize) -> Self {
            let analysis = Analysis::collect(&class);
            Self {
                class,
                analysis,
                config: Config::default(),
                method,
            }
        }

        pub fn cx(&self) -> ClassContext<'_> {
            ClassContext::new(&self.class, &self.analysis, &self.config)
        }

        pub fn build(&self) -> MethodIr {
            let method = &self.class.methods[self.method];
            let code = method.code.as_ref().unwrap();
            build_method(&self.class, method, code).unwrap()
        }
    }

    pub fn render(ir: &MethodIr) -> Vec<String> {
        ir.stmts
            .iter()
            .map(|stmt| {
                let text = ir.arena.debug(stmt).to_string();
                // Drop the address prefix.
                text.split_once(": ").map_or(text.clone(), |(_, rest)| rest.to_owned())
            })
            .collect()
    }
}
