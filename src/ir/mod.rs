//! The per-method intermediate representation.
//!
//! The builder produces a flat list of statements over an expression arena. Statements keep the
//! address of the first instruction they were produced from, so that jumps (which still refer to
//! addresses at this point) and exception ranges can be resolved against them.

mod arena;
mod debug;
mod equivalence;
mod expr;
mod stmt;
mod types;

pub use arena::{Arena, ExprId};
pub use debug::{DebugIr, escape_string};
pub use equivalence::{exprs_equal, stmts_equivalent};
pub use expr::{BinOp, CallKind, ConcatPart, Expr, LogicalOp, TempId, VarId};
pub use stmt::{Stmt, StmtKind};
