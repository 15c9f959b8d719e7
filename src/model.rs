//! The pre-parsed class model handed to the core by the class-file reader.
//!
//! Parsing the binary format is someone else's job. Everything here is already split into
//! fields/methods/attributes; the only thing left in its raw form is the bytecode array itself.
//! The constant pool is kept as-is (with the JVM's 1-based indexing and the phantom slot after
//! `long`/`double` entries) because instructions refer to it by index.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Constant pool index {0} is out of bounds")]
    OutOfBounds(u16),

    #[error("Constant pool entry #{index} is not a {expected}")]
    UnexpectedKind { index: u16, expected: &'static str },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name: u16 },
    String { value: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    // Index 0 and the slot following a `long`/`double` entry.
    Unusable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved field or method reference.
#[derive(Clone, Copy, Debug)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// A resolved `ldc`/`ldc_w`/`ldc2_w` operand.
#[derive(Clone, Copy, Debug)]
pub enum Loadable<'a> {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(&'a str),
    Class(&'a str),
    MethodType(&'a str),
    MethodHandle { kind: u8, member: MemberRef<'a> },
    Dynamic { name: &'a str, descriptor: &'a str },
}

#[derive(Clone, Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// `entries[0]` must be `Constant::Unusable`; it's inserted if missing.
    pub fn new(mut entries: Vec<Constant>) -> Self {
        if entries.first() != Some(&Constant::Unusable) {
            entries.insert(0, Constant::Unusable);
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant, PoolError> {
        match self.entries.get(index as usize) {
            None | Some(Constant::Unusable) => Err(PoolError::OutOfBounds(index)),
            Some(constant) => Ok(constant),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, PoolError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            _ => Err(PoolError::UnexpectedKind {
                index,
                expected: "UTF-8 string",
            }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, PoolError> {
        match self.get(index)? {
            Constant::Class { name } => self.utf8(*name),
            _ => Err(PoolError::UnexpectedKind {
                index,
                expected: "class reference",
            }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), PoolError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(PoolError::UnexpectedKind {
                index,
                expected: "name and type",
            }),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, PoolError> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (MemberKind::Field, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
            } => (MemberKind::Method, *class, *name_and_type),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (MemberKind::InterfaceMethod, *class, *name_and_type),
            _ => {
                return Err(PoolError::UnexpectedKind {
                    index,
                    expected: "member reference",
                });
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            kind,
            class: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    pub fn field_ref(&self, index: u16) -> Result<MemberRef<'_>, PoolError> {
        let member = self.member_ref(index)?;
        if member.kind != MemberKind::Field {
            return Err(PoolError::UnexpectedKind {
                index,
                expected: "field reference",
            });
        }
        Ok(member)
    }

    pub fn method_ref(&self, index: u16) -> Result<MemberRef<'_>, PoolError> {
        let member = self.member_ref(index)?;
        if member.kind == MemberKind::Field {
            return Err(PoolError::UnexpectedKind {
                index,
                expected: "method reference",
            });
        }
        Ok(member)
    }

    /// Returns `(name, descriptor)` of an `invokedynamic` call site.
    pub fn invoke_dynamic(&self, index: u16) -> Result<(&str, &str), PoolError> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. } => self.name_and_type(*name_and_type),
            _ => Err(PoolError::UnexpectedKind {
                index,
                expected: "invokedynamic call site",
            }),
        }
    }

    pub fn loadable(&self, index: u16) -> Result<Loadable<'_>, PoolError> {
        Ok(match self.get(index)? {
            Constant::Integer(value) => Loadable::Integer(*value),
            Constant::Float(value) => Loadable::Float(*value),
            Constant::Long(value) => Loadable::Long(*value),
            Constant::Double(value) => Loadable::Double(*value),
            Constant::String { value } => Loadable::String(self.utf8(*value)?),
            Constant::Class { name } => Loadable::Class(self.utf8(*name)?),
            Constant::MethodType { descriptor } => Loadable::MethodType(self.utf8(*descriptor)?),
            Constant::MethodHandle { kind, reference } => Loadable::MethodHandle {
                kind: *kind,
                member: self.member_ref(*reference)?,
            },
            Constant::Dynamic { name_and_type, .. } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Loadable::Dynamic { name, descriptor }
            }
            _ => {
                return Err(PoolError::UnexpectedKind {
                    index,
                    expected: "loadable constant",
                });
            }
        })
    }
}

/// Incrementally assembles a constant pool, deduplicating entries.
///
/// The class-file reader doesn't need this, but everything that synthesizes classes (tests,
/// tooling) does.
#[derive(Clone, Debug)]
pub struct PoolBuilder {
    entries: Vec<Constant>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    pub fn push(&mut self, constant: Constant) -> u16 {
        if let Some(index) = self.entries.iter().position(|entry| *entry == constant) {
            return index as u16;
        }
        let is_wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if is_wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        self.push(Constant::Utf8(value.to_owned()))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.push(Constant::Class { name })
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        self.push(Constant::String { value })
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(Constant::Integer(value))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.push(Constant::Long(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.push(Constant::Double(value))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.push(Constant::NameAndType { name, descriptor })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.push(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.push(Constant::MethodRef {
            class,
            name_and_type,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.push(Constant::InterfaceMethodRef {
            class,
            name_and_type,
        })
    }

    pub fn build(self) -> ConstantPool {
        ConstantPool::new(self.entries)
    }
}

#[derive(Clone, Debug)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    /// `None` for catch-all entries (`finally`, `synchronized`).
    pub catch_type: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct LineNumberEntry {
    pub start: u32,
    pub line: u32,
}

#[derive(Clone, Debug)]
pub struct LocalVariableEntry {
    pub start: u32,
    pub length: u32,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

#[derive(Clone, Debug, Default)]
pub struct CodeModel {
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub line_numbers: Vec<LineNumberEntry>,
    pub local_variables: Vec<LocalVariableEntry>,
}

impl CodeModel {
    /// The source line of the instruction at `offset`, if the line number table covers it.
    pub fn line_at(&self, offset: u32) -> Option<u32> {
        // The table is not required to be sorted, and several entries may start at the same
        // address (the last one wins, matching what debuggers do).
        self.line_numbers
            .iter()
            .filter(|entry| entry.start <= offset)
            .max_by_key(|entry| entry.start)
            .map(|entry| entry.line)
    }
}

#[derive(Clone, Debug)]
pub struct FieldModel {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
    /// Pool index of the `ConstantValue` attribute.
    pub constant_value: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct MethodModel {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub code: Option<CodeModel>,
}

impl MethodModel {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// An `InnerClasses` attribute row.
#[derive(Clone, Debug)]
pub struct InnerClassLink {
    pub inner: String,
    pub outer: Option<String>,
    /// `None` for anonymous classes.
    pub simple_name: Option<String>,
    pub access_flags: ClassAccessFlags,
}

impl InnerClassLink {
    pub fn is_anonymous(&self) -> bool {
        self.simple_name.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct ClassModel {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub access_flags: ClassAccessFlags,
    pub pool: ConstantPool,
    pub fields: Vec<FieldModel>,
    pub methods: Vec<MethodModel>,
    pub inner_classes: Vec<InnerClassLink>,
    /// Models of the classes nested in this one, loaded by the collaborator.
    pub nested: Vec<ClassModel>,
}

impl ClassModel {
    pub fn new(name: &str, pool: ConstantPool) -> Self {
        Self {
            name: name.to_owned(),
            super_name: Some("java/lang/Object".to_owned()),
            interfaces: Vec::new(),
            signature: None,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            pool,
            fields: Vec::new(),
            methods: Vec::new(),
            inner_classes: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn is_enum(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ENUM)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// The `InnerClasses` row describing this class itself, if it's nested.
    pub fn own_link(&self) -> Option<&InnerClassLink> {
        self.inner_classes.iter().find(|link| link.inner == self.name)
    }

    /// The synthetic field holding the enclosing instance (`this$0`) of a non-static inner class.
    pub fn outer_this_field(&self) -> Option<&FieldModel> {
        if self
            .own_link()
            .is_some_and(|link| link.access_flags.contains(ClassAccessFlags::STATIC))
        {
            return None;
        }
        self.fields.iter().find(|field| {
            field.name.starts_with("this$")
                && field.descriptor.starts_with('L')
                && !field.access_flags.contains(FieldAccessFlags::STATIC)
        })
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodModel> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_builder_deduplicates() {
        let mut builder = PoolBuilder::new();
        let a = builder.field_ref("A", "x", "I");
        let b = builder.field_ref("A", "x", "I");
        let long = builder.long(5);
        let after_long = builder.utf8("after");
        assert_eq!(a, b);
        assert_eq!(after_long, long + 2);

        let pool = builder.build();
        let member = pool.field_ref(a).unwrap();
        assert_eq!((member.class, member.name, member.descriptor), ("A", "x", "I"));
        assert!(matches!(pool.get(long + 1), Err(PoolError::OutOfBounds(_))));
        assert!(matches!(
            pool.method_ref(a),
            Err(PoolError::UnexpectedKind { .. })
        ));
    }

    #[test]
    fn line_lookup() {
        let code = CodeModel {
            line_numbers: vec![
                LineNumberEntry { start: 0, line: 10 },
                LineNumberEntry { start: 5, line: 12 },
            ],
            ..CodeModel::default()
        };
        assert_eq!(code.line_at(0), Some(10));
        assert_eq!(code.line_at(4), Some(10));
        assert_eq!(code.line_at(9), Some(12));
        assert_eq!(CodeModel::default().line_at(3), None);
    }
}
