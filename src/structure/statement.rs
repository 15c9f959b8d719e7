use crate::descriptor::Type;
use crate::ir::{Arena, ExprId, StmtKind, VarId};
use core::fmt::Write;

/// Identity of a statement that `break`/`continue` can refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

#[derive(Clone, Debug)]
pub struct Statement {
    pub line: Option<u32>,
    pub kind: StatementKind,
}

#[derive(Clone, Debug)]
pub enum StatementKind {
    /// A straight-line statement. Never a jump.
    Basic(StmtKind),
    /// `T x;` or `T x = value;`.
    Declare {
        var: VarId,
        value: Option<ExprId>,
    },
    /// `label: { ... }`. Only breaks can target it.
    Block {
        label: Label,
        body: Vec<Statement>,
    },
    If {
        condition: ExprId,
        then: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    While {
        label: Option<Label>,
        condition: ExprId,
        body: Vec<Statement>,
    },
    DoWhile {
        label: Option<Label>,
        body: Vec<Statement>,
        condition: ExprId,
    },
    /// `while (true)`. Loop labels are `None` once nothing refers to them by name.
    Loop {
        label: Option<Label>,
        body: Vec<Statement>,
    },
    For {
        label: Option<Label>,
        init: Vec<Statement>,
        condition: ExprId,
        update: Vec<Statement>,
        body: Vec<Statement>,
    },
    ForEach {
        label: Option<Label>,
        var: VarId,
        iterable: ExprId,
        body: Vec<Statement>,
    },
    Switch {
        label: Option<Label>,
        key: ExprId,
        kind: SwitchKind,
        cases: Vec<Case>,
    },
    Try {
        resources: Vec<Resource>,
        body: Vec<Statement>,
        catches: Vec<Catch>,
        finally: Option<Vec<Statement>>,
    },
    Synchronized {
        lock: ExprId,
        body: Vec<Statement>,
    },
    Break(Option<Label>),
    Continue(Option<Label>),
    IfBreak {
        condition: ExprId,
        label: Option<Label>,
    },
    IfContinue {
        condition: ExprId,
        label: Option<Label>,
    },
    /// Fallback for control flow that doesn't nest.
    Label(Label),
    Goto(Label),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchKind {
    Plain,
    Enum,
    String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseLabel {
    Int(i32),
    Enum(String),
    String(String),
    Default,
}

#[derive(Clone, Debug)]
pub struct Case {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub var: VarId,
    pub value: ExprId,
}

#[derive(Clone, Debug)]
pub struct Catch {
    pub types: Vec<Type>,
    pub var: VarId,
    pub body: Vec<Statement>,
}

impl Statement {
    pub fn new(line: Option<u32>, kind: StatementKind) -> Self {
        Self { line, kind }
    }

    /// Whether control never reaches the statement after this one by falling through.
    pub fn diverges(&self) -> bool {
        match &self.kind {
            StatementKind::Basic(kind) => {
                matches!(kind, StmtKind::Return(_) | StmtKind::Throw(_))
            }
            StatementKind::Break(_) | StatementKind::Continue(_) | StatementKind::Goto(_) => true,
            StatementKind::If { then, otherwise, .. } => {
                list_diverges(then) && list_diverges(otherwise)
            }
            StatementKind::Loop { label, body } => match label {
                Some(label) => !breaks_from(body, *label, true),
                None => !breaks_plainly(body),
            },
            StatementKind::Try {
                body,
                catches,
                finally,
                ..
            } => {
                finally.as_deref().is_some_and(list_diverges)
                    || (list_diverges(body) && catches.iter().all(|catch| list_diverges(&catch.body)))
            }
            StatementKind::Synchronized { body, .. } => list_diverges(body),
            StatementKind::Block { label, body } => {
                list_diverges(body) && !breaks_from(body, *label, false)
            }
            _ => false,
        }
    }

    /// Statement lists directly owned by this statement.
    pub fn lists(&self) -> Vec<&Vec<Statement>> {
        match &self.kind {
            StatementKind::Block { body, .. }
            | StatementKind::While { body, .. }
            | StatementKind::DoWhile { body, .. }
            | StatementKind::Loop { body, .. }
            | StatementKind::ForEach { body, .. }
            | StatementKind::Synchronized { body, .. } => vec![body],
            StatementKind::If { then, otherwise, .. } => vec![then, otherwise],
            StatementKind::For {
                init, update, body, ..
            } => vec![init, body, update],
            StatementKind::Switch { cases, .. } => cases.iter().map(|case| &case.body).collect(),
            StatementKind::Try {
                body,
                catches,
                finally,
                ..
            } => {
                let mut out = vec![body];
                out.extend(catches.iter().map(|catch| &catch.body));
                out.extend(finally);
                out
            }
            _ => Vec::new(),
        }
    }

    pub fn lists_mut(&mut self) -> Vec<&mut Vec<Statement>> {
        match &mut self.kind {
            StatementKind::Block { body, .. }
            | StatementKind::While { body, .. }
            | StatementKind::DoWhile { body, .. }
            | StatementKind::Loop { body, .. }
            | StatementKind::ForEach { body, .. }
            | StatementKind::Synchronized { body, .. } => vec![body],
            StatementKind::If { then, otherwise, .. } => vec![then, otherwise],
            StatementKind::For {
                init, update, body, ..
            } => vec![init, body, update],
            StatementKind::Switch { cases, .. } => {
                cases.iter_mut().map(|case| &mut case.body).collect()
            }
            StatementKind::Try {
                body,
                catches,
                finally,
                ..
            } => {
                let mut out = vec![body];
                out.extend(catches.iter_mut().map(|catch| &mut catch.body));
                out.extend(finally);
                out
            }
            _ => Vec::new(),
        }
    }

    /// Expressions evaluated by the statement itself, not by nested lists.
    pub fn exprs(&self) -> Vec<ExprId> {
        match &self.kind {
            StatementKind::Basic(kind) => crate::ir::Stmt::new(0, None, kind.clone()).exprs(),
            StatementKind::Declare { value, .. } => value.iter().copied().collect(),
            StatementKind::If { condition, .. }
            | StatementKind::While { condition, .. }
            | StatementKind::DoWhile { condition, .. }
            | StatementKind::For { condition, .. }
            | StatementKind::IfBreak { condition, .. }
            | StatementKind::IfContinue { condition, .. } => vec![*condition],
            StatementKind::ForEach { iterable, .. } => vec![*iterable],
            StatementKind::Switch { key, .. } => vec![*key],
            StatementKind::Synchronized { lock, .. } => vec![*lock],
            StatementKind::Try { resources, .. } => {
                resources.iter().map(|resource| resource.value).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether an unlabeled `break` inside this statement leaves it.
    pub fn is_breakable(&self) -> bool {
        self.is_loop() || matches!(self.kind, StatementKind::Switch { .. })
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::While { .. }
                | StatementKind::DoWhile { .. }
                | StatementKind::Loop { .. }
                | StatementKind::For { .. }
                | StatementKind::ForEach { .. }
        )
    }

    /// The label of a loop or a `switch`.
    pub fn breakable_label(&self) -> Option<Label> {
        match &self.kind {
            StatementKind::While { label, .. }
            | StatementKind::DoWhile { label, .. }
            | StatementKind::Loop { label, .. }
            | StatementKind::For { label, .. }
            | StatementKind::ForEach { label, .. }
            | StatementKind::Switch { label, .. } => *label,
            _ => None,
        }
    }

    pub fn breakable_label_mut(&mut self) -> Option<&mut Option<Label>> {
        match &mut self.kind {
            StatementKind::While { label, .. }
            | StatementKind::DoWhile { label, .. }
            | StatementKind::Loop { label, .. }
            | StatementKind::For { label, .. }
            | StatementKind::ForEach { label, .. }
            | StatementKind::Switch { label, .. } => Some(label),
            _ => None,
        }
    }
}

pub fn list_diverges(list: &[Statement]) -> bool {
    list.last().is_some_and(Statement::diverges)
}

/// Whether anything in `list` breaks out of `label`. With `plain`, an unlabeled `break` not nested
/// in another breakable statement counts as well.
pub fn breaks_from(list: &[Statement], label: Label, plain: bool) -> bool {
    list.iter().any(|stmt| match &stmt.kind {
        StatementKind::Break(target) | StatementKind::IfBreak { label: target, .. } => {
            *target == Some(label) || (plain && target.is_none())
        }
        _ => {
            let plain = plain && !stmt.is_breakable();
            stmt.lists().into_iter().any(|list| breaks_from(list, label, plain))
        }
    })
}

fn breaks_plainly(list: &[Statement]) -> bool {
    list.iter().any(|stmt| match &stmt.kind {
        StatementKind::Break(None) | StatementKind::IfBreak { label: None, .. } => true,
        _ if stmt.is_breakable() => false,
        _ => stmt.lists().into_iter().any(|list| breaks_plainly(list)),
    })
}

/// Receives a statement tree in reading order.
pub trait Sink {
    /// A complete line.
    fn line(&mut self, text: String, line: Option<u32>);
    /// A line that opens a nested list, e.g. `while (x) {`.
    fn open(&mut self, text: String, line: Option<u32>);
    /// Closes the innermost list. `text` is `}` optionally followed by more, e.g. `} while (x);`.
    fn close(&mut self, text: String);
    /// Closes the innermost list and opens the next one on a single line, e.g. `} else {`.
    fn reopen(&mut self, text: String, line: Option<u32>);
}

/// Feeds `stmts` into `sink`.
pub fn emit(arena: &Arena, stmts: &[Statement], sink: &mut impl Sink) {
    for stmt in stmts {
        emit_one(arena, stmt, sink);
    }
}

fn label_prefix(label: Option<Label>) -> String {
    label.map_or_else(String::new, |label| format!("label{}: ", label.0))
}

fn jump(word: &str, label: Option<Label>) -> String {
    match label {
        Some(label) => format!("{word} label{};", label.0),
        None => format!("{word};"),
    }
}

fn local_name(arena: &Arena, var: VarId) -> String {
    arena
        .locals
        .get(var.0 as usize)
        .map_or_else(|| format!("var{}", var.0), |local| local.name.clone())
}

fn local_type(arena: &Arena, var: VarId) -> String {
    arena
        .locals
        .get(var.0 as usize)
        .and_then(|local| local.ty.resolved())
        .map_or_else(|| "Object".to_owned(), |ty| ty.to_string())
}

/// `for` headers are one line: statements are rendered without the `;`.
fn inline_list(arena: &Arena, stmts: &[Statement]) -> String {
    let mut out = String::new();
    for (i, stmt) in stmts.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let mut lines = Lines::default();
        emit_one(arena, stmt, &mut lines);
        let text = lines.0.concat();
        out.push_str(text.trim_end_matches(';'));
    }
    out
}

/// Whether the list is exactly one nested `if`, for `else if` chains.
fn as_else_if(list: &[Statement]) -> Option<&Statement> {
    match list {
        [stmt @ Statement {
            kind: StatementKind::If { .. },
            ..
        }] => Some(stmt),
        _ => None,
    }
}

/// A `chained` if continues the list of the previous one as `} else if`.
fn emit_if(arena: &Arena, stmt: &Statement, chained: bool, sink: &mut impl Sink) {
    let StatementKind::If {
        condition,
        then,
        otherwise,
    } = &stmt.kind
    else {
        return;
    };
    let header = format!("if ({}) {{", arena.debug(condition));
    if chained {
        sink.reopen(format!("}} else {header}"), stmt.line);
    } else {
        sink.open(header, stmt.line);
    }
    emit(arena, then, sink);
    if let Some(nested) = as_else_if(otherwise) {
        emit_if(arena, nested, true, sink);
        return;
    }
    if !otherwise.is_empty() {
        sink.reopen("} else {".to_owned(), None);
        emit(arena, otherwise, sink);
    }
    sink.close("}".to_owned());
}

fn emit_one(arena: &Arena, stmt: &Statement, sink: &mut impl Sink) {
    let line = stmt.line;
    match &stmt.kind {
        StatementKind::Basic(kind) => sink.line(format!("{};", arena.debug(kind)), line),
        StatementKind::Declare { var, value } => {
            let mut text = format!("{} {}", local_type(arena, *var), local_name(arena, *var));
            if let Some(value) = value {
                let _ = write!(text, " = {}", arena.debug(value));
            }
            text.push(';');
            sink.line(text, line);
        }
        StatementKind::Block { label, body } => {
            sink.open(format!("label{}: {{", label.0), line);
            emit(arena, body, sink);
            sink.close("}".to_owned());
        }
        StatementKind::If { .. } => emit_if(arena, stmt, false, sink),
        StatementKind::While {
            label,
            condition,
            body,
        } => {
            sink.open(
                format!("{}while ({}) {{", label_prefix(*label), arena.debug(condition)),
                line,
            );
            emit(arena, body, sink);
            sink.close("}".to_owned());
        }
        StatementKind::DoWhile {
            label,
            body,
            condition,
        } => {
            sink.open(format!("{}do {{", label_prefix(*label)), line);
            emit(arena, body, sink);
            sink.close(format!("}} while ({});", arena.debug(condition)));
        }
        StatementKind::Loop { label, body } => {
            sink.open(format!("{}while (true) {{", label_prefix(*label)), line);
            emit(arena, body, sink);
            sink.close("}".to_owned());
        }
        StatementKind::For {
            label,
            init,
            condition,
            update,
            body,
        } => {
            sink.open(
                format!(
                    "{}for ({}; {}; {}) {{",
                    label_prefix(*label),
                    inline_list(arena, init),
                    arena.debug(condition),
                    inline_list(arena, update)
                ),
                line,
            );
            emit(arena, body, sink);
            sink.close("}".to_owned());
        }
        StatementKind::ForEach {
            label,
            var,
            iterable,
            body,
        } => {
            sink.open(
                format!(
                    "{}for ({} {} : {}) {{",
                    label_prefix(*label),
                    local_type(arena, *var),
                    local_name(arena, *var),
                    arena.debug(iterable)
                ),
                line,
            );
            emit(arena, body, sink);
            sink.close("}".to_owned());
        }
        StatementKind::Switch {
            label, key, cases, ..
        } => {
            sink.open(
                format!("{}switch ({}) {{", label_prefix(*label), arena.debug(key)),
                line,
            );
            for case in cases {
                let labels: Vec<String> = case
                    .labels
                    .iter()
                    .map(|label| match label {
                        CaseLabel::Int(value) => format!("case {value}:"),
                        CaseLabel::Enum(name) => format!("case {name}:"),
                        CaseLabel::String(value) => {
                            format!("case {}:", crate::ir::escape_string(value))
                        }
                        CaseLabel::Default => "default:".to_owned(),
                    })
                    .collect();
                sink.open(labels.join(" "), case.body.first().and_then(|stmt| stmt.line));
                emit(arena, &case.body, sink);
                sink.close(String::new());
            }
            sink.close("}".to_owned());
        }
        StatementKind::Try {
            resources,
            body,
            catches,
            finally,
        } => {
            let header = if resources.is_empty() {
                "try {".to_owned()
            } else {
                let resources: Vec<String> = resources
                    .iter()
                    .map(|resource| {
                        format!(
                            "{} {} = {}",
                            local_type(arena, resource.var),
                            local_name(arena, resource.var),
                            arena.debug(&resource.value)
                        )
                    })
                    .collect();
                format!("try ({}) {{", resources.join("; "))
            };
            sink.open(header, line);
            emit(arena, body, sink);
            for catch in catches {
                let types: Vec<String> = catch.types.iter().map(ToString::to_string).collect();
                sink.reopen(
                    format!(
                        "}} catch ({} {}) {{",
                        types.join(" | "),
                        local_name(arena, catch.var)
                    ),
                    None,
                );
                emit(arena, &catch.body, sink);
            }
            if let Some(finally) = finally {
                sink.reopen("} finally {".to_owned(), None);
                emit(arena, finally, sink);
            }
            sink.close("}".to_owned());
        }
        StatementKind::Synchronized { lock, body } => {
            sink.open(format!("synchronized ({}) {{", arena.debug(lock)), line);
            emit(arena, body, sink);
            sink.close("}".to_owned());
        }
        StatementKind::Break(label) => sink.line(jump("break", *label), line),
        StatementKind::Continue(label) => sink.line(jump("continue", *label), line),
        StatementKind::IfBreak { condition, label } => sink.line(
            format!("if ({}) {}", arena.debug(condition), jump("break", *label)),
            line,
        ),
        StatementKind::IfContinue { condition, label } => sink.line(
            format!("if ({}) {}", arena.debug(condition), jump("continue", *label)),
            line,
        ),
        StatementKind::Label(label) => sink.line(format!("label{}:", label.0), line),
        StatementKind::Goto(label) => sink.line(format!("goto label{};", label.0), line),
    }
}

/// Collects rendered lines without indentation.
#[derive(Default)]
struct Lines(Vec<String>);

impl Sink for Lines {
    fn line(&mut self, text: String, _line: Option<u32>) {
        self.0.push(text);
    }

    fn open(&mut self, text: String, _line: Option<u32>) {
        self.0.push(text);
    }

    fn close(&mut self, text: String) {
        self.0.push(text);
    }

    fn reopen(&mut self, text: String, _line: Option<u32>) {
        self.0.push(text);
    }
}

/// Renders statements as indented lines.
pub fn render(arena: &Arena, stmts: &[Statement]) -> Vec<String> {
    struct Indented {
        lines: Vec<String>,
        depth: usize,
    }

    impl Sink for Indented {
        fn line(&mut self, text: String, _line: Option<u32>) {
            self.lines.push(format!("{}{text}", "    ".repeat(self.depth)));
        }

        fn open(&mut self, text: String, _line: Option<u32>) {
            if !text.is_empty() {
                self.lines.push(format!("{}{text}", "    ".repeat(self.depth)));
            }
            self.depth += 1;
        }

        fn close(&mut self, text: String) {
            self.depth = self.depth.saturating_sub(1);
            if !text.is_empty() {
                self.lines.push(format!("{}{text}", "    ".repeat(self.depth)));
            }
        }

        fn reopen(&mut self, text: String, _line: Option<u32>) {
            let depth = self.depth.saturating_sub(1);
            self.lines.push(format!("{}{text}", "    ".repeat(depth)));
        }
    }

    let mut sink = Indented {
        lines: Vec::new(),
        depth: 0,
    };
    emit(arena, stmts, &mut sink);
    sink.lines
}
