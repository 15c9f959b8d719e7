//! Display names for locals without usable debug info.

use super::{LocalFlags, LocalVariable};
use crate::descriptor::{PrimitiveType, Type, simple_class_name};
use rustc_hash::{FxHashMap, FxHashSet};

const KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally", "float",
    "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "package", "private", "protected", "public", "return", "short", "static",
    "strictfp", "super", "switch", "synchronized", "this", "throw", "throws", "transient", "try",
    "void", "volatile", "while", "true", "false", "null", "var",
];

// `l` is skipped, it reads like `1`.
const INT_NAMES: &[&str] = &["i", "j", "k", "m", "n"];

/// `paramInt`, `paramString`, `paramArrayOfByte`.
fn type_word(ty: &Type) -> String {
    match ty {
        Type::Primitive(primitive) => {
            let name = primitive.to_string();
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => name,
            }
        }
        Type::Object(name) => simple_class_name(name).replace('.', ""),
        Type::Array(element) => format!("ArrayOf{}", type_word(element)),
        Type::Void => "Void".to_owned(),
    }
}

fn lower_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => word.to_owned(),
    }
}

/// The preferred name of a local of the given type.
fn local_base(ty: Option<&Type>) -> String {
    let Some(ty) = ty else {
        return "obj".to_owned();
    };
    match ty {
        Type::Primitive(PrimitiveType::Boolean) => "bool".to_owned(),
        Type::Primitive(PrimitiveType::Byte) => "b".to_owned(),
        Type::Primitive(PrimitiveType::Char) => "c".to_owned(),
        Type::Primitive(PrimitiveType::Short) => "s".to_owned(),
        Type::Primitive(PrimitiveType::Int) => "i".to_owned(),
        Type::Primitive(PrimitiveType::Long) => "l".to_owned(),
        Type::Primitive(PrimitiveType::Float) => "f".to_owned(),
        Type::Primitive(PrimitiveType::Double) => "d".to_owned(),
        _ if ty.is_string() => "str".to_owned(),
        Type::Object(name) if name == "java/lang/Object" => "obj".to_owned(),
        _ => lower_first(&type_word(ty)),
    }
}

/// Hands out unique names.
#[derive(Default)]
pub struct NameTable {
    taken: FxHashSet<String>,
    counters: FxHashMap<String, usize>,
}

impl NameTable {
    pub fn new(locals: &[LocalVariable]) -> Self {
        let mut table = Self::default();
        for local in locals {
            if !local.name.is_empty() {
                table.taken.insert(local.name.clone());
            }
        }
        table
    }

    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_owned());
    }

    fn is_free(&self, name: &str) -> bool {
        !self.taken.contains(name) && !KEYWORDS.contains(&name)
    }

    pub fn claim(&mut self, base: &str) -> String {
        if base == "i" {
            for name in INT_NAMES {
                if self.is_free(name) {
                    self.taken.insert((*name).to_owned());
                    return (*name).to_owned();
                }
            }
        }
        if self.is_free(base) {
            self.taken.insert(base.to_owned());
            return base.to_owned();
        }
        let counter = self.counters.entry(base.to_owned()).or_insert(0);
        loop {
            *counter += 1;
            let name = format!("{base}{counter}");
            if !self.taken.contains(&name) {
                self.taken.insert(name.clone());
                return name;
            }
        }
    }

    /// A name for a local of the given type, e.g. an unused catch variable.
    pub fn for_type(&mut self, ty: Option<&Type>, exception: bool) -> String {
        let base = match ty {
            Some(ty) if exception => lower_first(&type_word(ty)),
            _ => local_base(ty),
        };
        self.claim(&base)
    }
}

/// Names every local that doesn't have one yet.
pub fn assign(locals: &mut [LocalVariable]) {
    let mut table = NameTable::new(locals);

    // Parameters first, so that they get the unnumbered names.
    let mut parameter_words: FxHashMap<String, usize> = FxHashMap::default();
    for local in locals.iter() {
        if local.flags.contains(LocalFlags::PARAMETER) && local.name.is_empty() {
            let word = local.ty.resolved().map_or_else(|| "Object".to_owned(), |ty| type_word(&ty));
            *parameter_words.entry(word).or_insert(0) += 1;
        }
    }
    let mut parameter_counters: FxHashMap<String, usize> = FxHashMap::default();
    for local in locals.iter_mut() {
        if !local.name.is_empty() {
            continue;
        }
        if local.flags.contains(LocalFlags::THIS) {
            local.name = "this".to_owned();
        } else if local.flags.contains(LocalFlags::PARAMETER) {
            let word = local.ty.resolved().map_or_else(|| "Object".to_owned(), |ty| type_word(&ty));
            let base = format!("param{word}");
            if parameter_words.get(&word).copied().unwrap_or(0) > 1 {
                let counter = parameter_counters.entry(word).or_insert(0);
                *counter += 1;
                let name = format!("{base}{counter}");
                table.reserve(&name);
                local.name = name;
            } else {
                local.name = table.claim(&base);
            }
        }
    }

    for local in locals.iter_mut() {
        if !local.name.is_empty() {
            continue;
        }
        local.name = if local.slot.is_none() && !local.flags.contains(LocalFlags::EXCEPTION) {
            table.claim("tmp")
        } else {
            let ty = local.ty.resolved();
            table.for_type(ty.as_ref(), local.flags.contains(LocalFlags::EXCEPTION))
        };
    }
}
