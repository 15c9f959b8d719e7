use core::fmt::{self, Display};
use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Unexpected end of descriptor {0:?}")]
    UnexpectedEnd(String),

    #[error("Invalid character {ch:?} in descriptor {descriptor:?}")]
    InvalidChar { ch: char, descriptor: String },

    #[error("Trailing data in descriptor {0:?}")]
    TrailingData(String),

    #[error("Descriptor {0:?} is not a method descriptor")]
    NotMethod(String),
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    /// boolean
    Boolean,
    /// byte
    Byte,
    /// char
    Char,
    /// short
    Short,
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
}

impl PrimitiveType {
    pub fn width(self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    pub fn descriptor_char(self) -> char {
        match self {
            Self::Boolean => 'Z',
            Self::Byte => 'B',
            Self::Char => 'C',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
        }
    }

    fn from_descriptor_char(ch: char) -> Option<Self> {
        Some(match ch {
            'Z' => Self::Boolean,
            'B' => Self::Byte,
            'C' => Self::Char,
            'S' => Self::Short,
            'I' => Self::Int,
            'J' => Self::Long,
            'F' => Self::Float,
            'D' => Self::Double,
            _ => return None,
        })
    }

    /// Whether the JVM represents this type as an `int` on the operand stack.
    pub fn is_int_like(self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(PrimitiveType),
    /// Internal name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<Type>),
    Void,
}

impl Type {
    pub const INT: Type = Type::Primitive(PrimitiveType::Int);
    pub const BOOLEAN: Type = Type::Primitive(PrimitiveType::Boolean);

    pub fn object(name: &str) -> Self {
        Self::Object(name.to_owned())
    }

    pub fn java_lang_object() -> Self {
        Self::object("java/lang/Object")
    }

    /// Parses a field descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut chars = descriptor.char_indices().peekable();
        let ty = parse_one(descriptor, &mut chars)?;
        if chars.next().is_some() {
            return Err(DescriptorError::TrailingData(descriptor.to_owned()));
        }
        Ok(ty)
    }

    /// Interprets the operand of `checkcast`/`anewarray`/`instanceof`, which is an internal name
    /// for classes and a descriptor for arrays.
    pub fn from_class_operand(name: &str) -> Result<Self, DescriptorError> {
        if name.starts_with('[') {
            Self::parse(name)
        } else {
            Ok(Self::object(name))
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Primitive(primitive) => primitive.width(),
            Self::Void => 0,
            Self::Object(_) | Self::Array(_) => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Self::Primitive(primitive) => Some(*primitive),
            _ => None,
        }
    }

    pub fn is_boolean(&self) -> bool {
        *self == Self::BOOLEAN
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::Object(name) if name == "java/lang/String")
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Self::Array(element) => Some(element),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> String {
        match self {
            Self::Primitive(primitive) => primitive.descriptor_char().to_string(),
            Self::Object(name) => format!("L{name};"),
            Self::Array(element) => format!("[{}", element.descriptor()),
            Self::Void => "V".to_owned(),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(primitive) => write!(f, "{primitive}"),
            Self::Object(name) => write!(f, "{}", simple_class_name(name)),
            Self::Array(element) => write!(f, "{element}[]"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// `java/util/Map$Entry` -> `Map.Entry`. Anonymous classes (`Foo$1`) keep their number, which is
/// as good as any other name.
pub fn simple_class_name(internal_name: &str) -> String {
    let unqualified = internal_name.rsplit('/').next().unwrap_or(internal_name);
    unqualified.replace('$', ".")
}

type Chars<'a> = core::iter::Peekable<core::str::CharIndices<'a>>;

fn parse_one(descriptor: &str, chars: &mut Chars<'_>) -> Result<Type, DescriptorError> {
    let Some((start, ch)) = chars.next() else {
        return Err(DescriptorError::UnexpectedEnd(descriptor.to_owned()));
    };
    if let Some(primitive) = PrimitiveType::from_descriptor_char(ch) {
        return Ok(Type::Primitive(primitive));
    }
    match ch {
        'V' => Ok(Type::Void),
        '[' => Ok(Type::Array(Box::new(parse_one(descriptor, chars)?))),
        'L' => {
            for (end, ch) in chars.by_ref() {
                if ch == ';' {
                    let name = &descriptor[start + 1..end];
                    if name.is_empty() {
                        return Err(DescriptorError::InvalidChar {
                            ch,
                            descriptor: descriptor.to_owned(),
                        });
                    }
                    return Ok(Type::object(name));
                }
            }
            Err(DescriptorError::UnexpectedEnd(descriptor.to_owned()))
        }
        _ => Err(DescriptorError::InvalidChar {
            ch,
            descriptor: descriptor.to_owned(),
        }),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut chars = descriptor.char_indices().peekable();
        if chars.next().map(|(_, ch)| ch) != Some('(') {
            return Err(DescriptorError::NotMethod(descriptor.to_owned()));
        }
        let mut parameters = Vec::new();
        loop {
            match chars.peek() {
                None => return Err(DescriptorError::UnexpectedEnd(descriptor.to_owned())),
                Some((_, ')')) => {
                    chars.next();
                    break;
                }
                Some(_) => {
                    let parameter = parse_one(descriptor, &mut chars)?;
                    if parameter == Type::Void {
                        return Err(DescriptorError::InvalidChar {
                            ch: 'V',
                            descriptor: descriptor.to_owned(),
                        });
                    }
                    parameters.push(parameter);
                }
            }
        }
        let return_type = parse_one(descriptor, &mut chars)?;
        if chars.next().is_some() {
            return Err(DescriptorError::TrailingData(descriptor.to_owned()));
        }
        Ok(Self {
            parameters,
            return_type,
        })
    }

    /// The number of stack slots taken by the arguments, not counting the receiver.
    pub fn parameter_width(&self) -> usize {
        self.parameters.iter().map(Type::width).sum()
    }
}
