//! What a decompiled class looks like to the text-emission side.

use crate::MethodDecompileError;
use crate::config::Config;
use crate::ir::Arena;
use crate::layout::{Layout, LayoutBuilder, Marker, order_members};
use crate::patterns::initializers::EnumConstant;
use crate::structure::{Sink, Statement, emit};

#[derive(Debug)]
pub struct FieldOutput {
    pub name: String,
    /// The complete declaration, e.g. `private int x = 5;`.
    pub declaration: String,
    /// Line of the initializer, if it came from code with line numbers.
    pub line: Option<u32>,
}

#[derive(Debug)]
pub enum MethodBody {
    Structured {
        arena: Arena,
        statements: Vec<Statement>,
    },
    /// The method couldn't be decompiled; `listing` is the raw bytecode.
    Errored {
        error: MethodDecompileError,
        listing: Vec<String>,
    },
    /// Abstract and native methods.
    Absent,
}

#[derive(Debug)]
pub struct MethodOutput {
    pub name: String,
    pub descriptor: String,
    /// The declaration line without the body, e.g. `public static void main(String[] args)`.
    pub header: String,
    pub body: MethodBody,
}

fn first_line_of(stmts: &[Statement]) -> Option<u32> {
    stmts
        .iter()
        .filter_map(|stmt| {
            let nested = stmt.lists().into_iter().filter_map(|list| first_line_of(list)).min();
            match (stmt.line, nested) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        })
        .min()
}

impl MethodOutput {
    pub fn is_errored(&self) -> bool {
        matches!(self.body, MethodBody::Errored { .. })
    }

    /// The smallest line number in the body.
    pub fn first_line(&self) -> Option<u32> {
        match &self.body {
            MethodBody::Structured { statements, .. } => first_line_of(statements),
            _ => None,
        }
    }

    /// The body as indented lines, without the header.
    pub fn render(&self) -> Vec<String> {
        match &self.body {
            MethodBody::Structured { arena, statements } => crate::structure::render(arena, statements),
            MethodBody::Errored { listing, .. } => listing.clone(),
            MethodBody::Absent => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ClassOutput {
    pub name: String,
    pub header: String,
    pub enum_constants: Vec<EnumConstant>,
    pub fields: Vec<FieldOutput>,
    pub methods: Vec<MethodOutput>,
    pub inner: Vec<ClassOutput>,
    /// The class, inner classes included, sequenced into lines.
    pub layout: Layout,
}

enum Member {
    Field(usize),
    Method(usize),
    Inner(usize),
}

impl ClassOutput {
    pub fn method(&self, name: &str) -> Option<&MethodOutput> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn lines(&self) -> Vec<String> {
        self.layout.lines()
    }

    pub fn first_line(&self) -> Option<u32> {
        let constants = self.enum_constants.iter().filter_map(|constant| constant.line);
        let fields = self.fields.iter().filter_map(|field| field.line);
        let methods = self.methods.iter().filter_map(MethodOutput::first_line);
        let inner = self.inner.iter().filter_map(ClassOutput::first_line);
        constants.chain(fields).chain(methods).chain(inner).min()
    }

    /// Builds `self.layout` from the members, realigning it to the original lines if asked to.
    pub(crate) fn lay_out(&mut self, config: &Config) {
        let mut builder = LayoutBuilder::new();
        self.feed(&mut builder, 0);
        let mut layout = builder.finish();
        if config.realign_line_numbers {
            layout.realign(config.max_layout_rounds);
            log::trace!("Layout of {}: {:?}", self.name, layout.stats);
        }
        self.layout = layout;
    }

    fn feed(&self, builder: &mut LayoutBuilder, blank_lines: u32) {
        builder.begin(Marker::Type, blank_lines);
        builder.open(format!("{} {{", self.header), None);

        let mut first = true;
        if !self.enum_constants.is_empty() {
            builder.begin(Marker::Field, 0);
            let last = self.enum_constants.len() - 1;
            for (index, constant) in self.enum_constants.iter().enumerate() {
                let mut text = constant.name.clone();
                if !constant.arguments.is_empty() {
                    text = format!("{text}({})", constant.arguments.join(", "));
                }
                text.push(if index == last { ';' } else { ',' });
                builder.line(text, constant.line);
            }
            builder.end();
            first = false;
        }

        let members: Vec<Member> = (0..self.fields.len())
            .map(Member::Field)
            .chain((0..self.methods.len()).map(Member::Method))
            .chain((0..self.inner.len()).map(Member::Inner))
            .collect();
        let lines: Vec<Option<u32>> = members
            .iter()
            .map(|member| match *member {
                Member::Field(index) => self.fields[index].line,
                Member::Method(index) => self.methods[index].first_line(),
                Member::Inner(index) => self.inner[index].first_line(),
            })
            .collect();

        let mut previous_was_field = false;
        for index in order_members(&lines) {
            let member = &members[index];
            let is_field = matches!(member, Member::Field(_));
            let blank_lines = u32::from(!first && !(is_field && previous_was_field));
            first = false;
            previous_was_field = is_field;
            match *member {
                Member::Field(index) => {
                    let field = &self.fields[index];
                    builder.begin(Marker::Field, blank_lines);
                    builder.line(field.declaration.clone(), field.line);
                    builder.end();
                }
                Member::Method(index) => {
                    builder.begin(Marker::Method, blank_lines);
                    feed_method(&self.methods[index], builder);
                    builder.end();
                }
                Member::Inner(index) => self.inner[index].feed(builder, blank_lines),
            }
        }

        builder.close("}".to_owned());
        builder.end();
    }
}

fn feed_method(method: &MethodOutput, builder: &mut LayoutBuilder) {
    match &method.body {
        MethodBody::Structured { arena, statements } => {
            builder.open(format!("{} {{", method.header), None);
            emit(arena, statements, builder);
            builder.close("}".to_owned());
        }
        MethodBody::Errored { error, listing } => {
            builder.open(format!("{} {{", method.header), None);
            builder.set_frozen(true);
            builder.line(format!("// Failed to decompile: {error}"), None);
            for line in listing {
                builder.line(format!("// {line}"), None);
            }
            builder.set_frozen(false);
            builder.close("}".to_owned());
        }
        MethodBody::Absent => builder.line(format!("{};", method.header), None),
    }
}
