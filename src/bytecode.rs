//! Bytecode decoding.
//!
//! Opcode families that differ only in how the operand is encoded (`iload_0`..`iload_3`, `iload`,
//! `wide iload`; `iconst_*`, `bipush`, `sipush`) collapse onto a single variant keyed by the
//! computed operand, so that nothing downstream has to care about encoding details.

use crate::descriptor::PrimitiveType;
use byteorder::{BigEndian, ReadBytesExt};
use core::fmt;
use displaydoc::Display;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unexpected end of bytecode in the instruction at {0}")]
    UnexpectedEnd(u32),

    #[error("Unknown opcode {opcode:#04x} at {offset}")]
    UnknownOpcode { offset: u32, opcode: u8 },

    #[error("Opcode {opcode:#04x} cannot be prefixed with wide at {offset}")]
    InvalidWide { offset: u32, opcode: u8 },

    #[error("Invalid newarray type {atype} at {offset}")]
    InvalidArrayType { offset: u32, atype: u8 },

    #[error("Jump at {0} targets an address outside of the code")]
    JumpOutOfBounds(u32),
}

/// The type class an opcode operates on.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Kind {
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// reference
    Reference,
}

impl Kind {
    pub fn width(self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    pub fn primitive(self) -> Option<PrimitiveType> {
        Some(match self {
            Self::Int => PrimitiveType::Int,
            Self::Long => PrimitiveType::Long,
            Self::Float => PrimitiveType::Float,
            Self::Double => PrimitiveType::Double,
            Self::Reference => return None,
        })
    }

    fn from_primitive(primitive: PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::Long => Self::Long,
            PrimitiveType::Float => Self::Float,
            PrimitiveType::Double => Self::Double,
            _ => Self::Int,
        }
    }

    fn prefix(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Reference => 'a',
        }
    }
}

/// Element type of `xaload`/`xastore`. `baload` is shared by `byte[]` and `boolean[]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    ByteOrBoolean,
    Char,
    Short,
}

impl ArrayKind {
    pub fn width(self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// What the conditional jump compares its operand against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfOperand {
    /// `ifeq`..`ifle`: a single int against zero.
    Zero,
    /// `ifnull`/`ifnonnull`.
    Null,
    /// `if_icmp*`: two ints.
    IntPair,
    /// `if_acmp*`: two references.
    ReferencePair,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IntConst(i32),
    LongConst(i64),
    FloatConst(f32),
    DoubleConst(f64),
    Ldc(u16),
    Ldc2(u16),
    Load { kind: Kind, index: u16 },
    Store { kind: Kind, index: u16 },
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Arith { op: ArithOp, kind: Kind },
    Neg(Kind),
    Iinc { index: u16, delta: i16 },
    Convert { from: PrimitiveType, to: PrimitiveType },
    /// `lcmp`, `fcmpl`, `fcmpg`, `dcmpl`, `dcmpg`.
    Compare { kind: Kind, nan_is_greater: bool },
    If { cmp: Cmp, operand: IfOperand, target: u32 },
    Goto(u32),
    Jsr(u32),
    Ret(u16),
    TableSwitch { default: u32, low: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
    Return(Option<Kind>),
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    Invoke { kind: InvokeKind, index: u16 },
    InvokeDynamic(u16),
    New(u16),
    NewArray(PrimitiveType),
    ANewArray(u16),
    MultiANewArray { index: u16, dimensions: u8 },
    ArrayLength,
    AThrow,
    CheckCast(u16),
    InstanceOf(u16),
    MonitorEnter,
    MonitorExit,
}

/// The effect of an instruction on control flow, ignoring exception handlers.
pub struct InsnControlFlow {
    pub can_jump_to: Vec<u32>,
    pub can_fallthrough: bool,
}

impl InsnControlFlow {
    pub fn is_normal(&self) -> bool {
        self.can_jump_to.is_empty() && self.can_fallthrough
    }
}

impl Instruction {
    pub fn control_flow(&self) -> InsnControlFlow {
        let (can_jump_to, can_fallthrough) = match self {
            Self::Return(_) | Self::AThrow | Self::Ret(_) => (Vec::new(), false),
            Self::Goto(target) => (vec![*target], false),
            // `jsr` returns to the next instruction via `ret`, which is as good as falling through
            // for everything we're concerned with.
            Self::Jsr(target) => (vec![*target], true),
            Self::If { target, .. } => (vec![*target], true),
            Self::TableSwitch {
                default, targets, ..
            } => (
                core::iter::once(*default).chain(targets.iter().copied()).collect(),
                false,
            ),
            Self::LookupSwitch { default, pairs } => (
                core::iter::once(*default)
                    .chain(pairs.iter().map(|(_, target)| *target))
                    .collect(),
                false,
            ),
            _ => (Vec::new(), true),
        };
        InsnControlFlow {
            can_jump_to,
            can_fallthrough,
        }
    }

    /// The local slot read or written by this instruction, if any.
    pub fn slot(&self) -> Option<u16> {
        match self {
            Self::Load { index, .. }
            | Self::Store { index, .. }
            | Self::Iinc { index, .. }
            | Self::Ret(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::AConstNull => write!(f, "aconst_null"),
            Self::IntConst(value) => write!(f, "iconst {value}"),
            Self::LongConst(value) => write!(f, "lconst {value}"),
            Self::FloatConst(value) => write!(f, "fconst {value}"),
            Self::DoubleConst(value) => write!(f, "dconst {value}"),
            Self::Ldc(index) => write!(f, "ldc #{index}"),
            Self::Ldc2(index) => write!(f, "ldc2_w #{index}"),
            Self::Load { kind, index } => write!(f, "{}load {index}", kind.prefix()),
            Self::Store { kind, index } => write!(f, "{}store {index}", kind.prefix()),
            Self::ArrayLoad(kind) => write!(f, "{kind:?} array load"),
            Self::ArrayStore(kind) => write!(f, "{kind:?} array store"),
            Self::Pop => write!(f, "pop"),
            Self::Pop2 => write!(f, "pop2"),
            Self::Dup => write!(f, "dup"),
            Self::DupX1 => write!(f, "dup_x1"),
            Self::DupX2 => write!(f, "dup_x2"),
            Self::Dup2 => write!(f, "dup2"),
            Self::Dup2X1 => write!(f, "dup2_x1"),
            Self::Dup2X2 => write!(f, "dup2_x2"),
            Self::Swap => write!(f, "swap"),
            Self::Arith { op, kind } => write!(f, "{}{}", kind.prefix(), format!("{op:?}").to_lowercase()),
            Self::Neg(kind) => write!(f, "{}neg", kind.prefix()),
            Self::Iinc { index, delta } => write!(f, "iinc {index} {delta}"),
            Self::Convert { from, to } => write!(f, "{from}2{to}"),
            Self::Compare {
                kind,
                nan_is_greater,
            } => match kind {
                Kind::Long => write!(f, "lcmp"),
                _ => write!(
                    f,
                    "{}cmp{}",
                    kind.prefix(),
                    if *nan_is_greater { 'g' } else { 'l' }
                ),
            },
            Self::If {
                cmp,
                operand,
                target,
            } => write!(f, "if {operand:?} {cmp:?} -> {target}"),
            Self::Goto(target) => write!(f, "goto {target}"),
            Self::Jsr(target) => write!(f, "jsr {target}"),
            Self::Ret(index) => write!(f, "ret {index}"),
            Self::TableSwitch {
                default,
                low,
                targets,
            } => write!(f, "tableswitch {low}.. {targets:?} default {default}"),
            Self::LookupSwitch { default, pairs } => {
                write!(f, "lookupswitch {pairs:?} default {default}")
            }
            Self::Return(None) => write!(f, "return"),
            Self::Return(Some(kind)) => write!(f, "{}return", kind.prefix()),
            Self::GetStatic(index) => write!(f, "getstatic #{index}"),
            Self::PutStatic(index) => write!(f, "putstatic #{index}"),
            Self::GetField(index) => write!(f, "getfield #{index}"),
            Self::PutField(index) => write!(f, "putfield #{index}"),
            Self::Invoke { kind, index } => {
                write!(f, "invoke{} #{index}", format!("{kind:?}").to_lowercase())
            }
            Self::InvokeDynamic(index) => write!(f, "invokedynamic #{index}"),
            Self::New(index) => write!(f, "new #{index}"),
            Self::NewArray(element) => write!(f, "newarray {element}"),
            Self::ANewArray(index) => write!(f, "anewarray #{index}"),
            Self::MultiANewArray { index, dimensions } => {
                write!(f, "multianewarray #{index} {dimensions}")
            }
            Self::ArrayLength => write!(f, "arraylength"),
            Self::AThrow => write!(f, "athrow"),
            Self::CheckCast(index) => write!(f, "checkcast #{index}"),
            Self::InstanceOf(index) => write!(f, "instanceof #{index}"),
            Self::MonitorEnter => write!(f, "monitorenter"),
            Self::MonitorExit => write!(f, "monitorexit"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub offset: u32,
    pub length: u32,
    pub insn: Instruction,
}

struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    code_len: u32,
    // Address of the instruction being decoded, used for relative jumps and error reporting.
    start: u32,
}

impl Reader<'_> {
    fn position(&self) -> u32 {
        self.cursor.position() as u32
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.cursor
            .read_u8()
            .map_err(|_| DecodeError::UnexpectedEnd(self.start))
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        self.cursor
            .read_i8()
            .map_err(|_| DecodeError::UnexpectedEnd(self.start))
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| DecodeError::UnexpectedEnd(self.start))
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        self.cursor
            .read_i16::<BigEndian>()
            .map_err(|_| DecodeError::UnexpectedEnd(self.start))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|_| DecodeError::UnexpectedEnd(self.start))
    }

    fn target(&self, relative: i32) -> Result<u32, DecodeError> {
        let target = self.start as i64 + relative as i64;
        if target < 0 || target >= self.code_len as i64 {
            return Err(DecodeError::JumpOutOfBounds(self.start));
        }
        Ok(target as u32)
    }

    fn align4(&mut self) -> Result<(), DecodeError> {
        while self.position() % 4 != 0 {
            self.u8()?;
        }
        Ok(())
    }
}

fn load_store_kind(base: u8, opcode: u8) -> Kind {
    [Kind::Int, Kind::Long, Kind::Float, Kind::Double, Kind::Reference][(opcode - base) as usize]
}

fn array_kind(base: u8, opcode: u8) -> ArrayKind {
    [
        ArrayKind::Int,
        ArrayKind::Long,
        ArrayKind::Float,
        ArrayKind::Double,
        ArrayKind::Reference,
        ArrayKind::ByteOrBoolean,
        ArrayKind::Char,
        ArrayKind::Short,
    ][(opcode - base) as usize]
}

fn arith(opcode: u8) -> Instruction {
    use ArithOp::*;
    let numeric = [Kind::Int, Kind::Long, Kind::Float, Kind::Double];
    let integral = [Kind::Int, Kind::Long];
    match opcode {
        96..=115 => {
            let op = [Add, Sub, Mul, Div, Rem][((opcode - 96) / 4) as usize];
            Instruction::Arith {
                op,
                kind: numeric[((opcode - 96) % 4) as usize],
            }
        }
        116..=119 => Instruction::Neg(numeric[(opcode - 116) as usize]),
        _ => {
            let op = [Shl, Shr, Ushr, And, Or, Xor][((opcode - 120) / 2) as usize];
            Instruction::Arith {
                op,
                kind: integral[((opcode - 120) % 2) as usize],
            }
        }
    }
}

fn convert(opcode: u8) -> Instruction {
    use PrimitiveType::*;
    let (from, to) = match opcode {
        133 => (Int, Long),
        134 => (Int, Float),
        135 => (Int, Double),
        136 => (Long, Int),
        137 => (Long, Float),
        138 => (Long, Double),
        139 => (Float, Int),
        140 => (Float, Long),
        141 => (Float, Double),
        142 => (Double, Int),
        143 => (Double, Long),
        144 => (Double, Float),
        145 => (Int, Byte),
        146 => (Int, Char),
        _ => (Int, Short),
    };
    Instruction::Convert { from, to }
}

const CMPS: [Cmp; 6] = [Cmp::Eq, Cmp::Ne, Cmp::Lt, Cmp::Ge, Cmp::Gt, Cmp::Le];

/// Decodes the whole code array. Every byte must belong to exactly one instruction.
pub fn decode(code: &[u8]) -> Result<Vec<Decoded>, DecodeError> {
    let mut reader = Reader {
        cursor: Cursor::new(code),
        code_len: code.len() as u32,
        start: 0,
    };
    let mut out = Vec::new();

    while (reader.position() as usize) < code.len() {
        reader.start = reader.position();
        let offset = reader.start;
        let opcode = reader.u8()?;
        let insn = decode_one(&mut reader, opcode)?;
        out.push(Decoded {
            offset,
            length: reader.position() - offset,
            insn,
        });
    }

    Ok(out)
}

fn decode_one(reader: &mut Reader<'_>, opcode: u8) -> Result<Instruction, DecodeError> {
    use Instruction::*;

    let offset = reader.start;
    Ok(match opcode {
        0 => Nop,
        1 => AConstNull,
        2..=8 => IntConst(opcode as i32 - 3),
        9 | 10 => LongConst((opcode - 9) as i64),
        11..=13 => FloatConst((opcode - 11) as f32),
        14 | 15 => DoubleConst((opcode - 14) as f64),
        16 => IntConst(reader.i8()? as i32),
        17 => IntConst(reader.i16()? as i32),
        18 => Ldc(reader.u8()? as u16),
        19 => Ldc(reader.u16()?),
        20 => Ldc2(reader.u16()?),
        21..=25 => Load {
            kind: load_store_kind(21, opcode),
            index: reader.u8()? as u16,
        },
        26..=45 => Load {
            kind: load_store_kind(0, (opcode - 26) / 4),
            index: ((opcode - 26) % 4) as u16,
        },
        46..=53 => ArrayLoad(array_kind(46, opcode)),
        54..=58 => Store {
            kind: load_store_kind(54, opcode),
            index: reader.u8()? as u16,
        },
        59..=78 => Store {
            kind: load_store_kind(0, (opcode - 59) / 4),
            index: ((opcode - 59) % 4) as u16,
        },
        79..=86 => ArrayStore(array_kind(79, opcode)),
        87 => Pop,
        88 => Pop2,
        89 => Dup,
        90 => DupX1,
        91 => DupX2,
        92 => Dup2,
        93 => Dup2X1,
        94 => Dup2X2,
        95 => Swap,
        96..=131 => arith(opcode),
        132 => Iinc {
            index: reader.u8()? as u16,
            delta: reader.i8()? as i16,
        },
        133..=147 => convert(opcode),
        148 => Compare {
            kind: Kind::Long,
            nan_is_greater: false,
        },
        149..=152 => Compare {
            kind: if opcode <= 150 {
                Kind::Float
            } else {
                Kind::Double
            },
            nan_is_greater: opcode % 2 == 0,
        },
        153..=158 => If {
            cmp: CMPS[(opcode - 153) as usize],
            operand: IfOperand::Zero,
            target: {
                let relative = reader.i16()?;
                reader.target(relative as i32)?
            },
        },
        159..=164 => If {
            cmp: CMPS[(opcode - 159) as usize],
            operand: IfOperand::IntPair,
            target: {
                let relative = reader.i16()?;
                reader.target(relative as i32)?
            },
        },
        165 | 166 => If {
            cmp: CMPS[(opcode - 165) as usize],
            operand: IfOperand::ReferencePair,
            target: {
                let relative = reader.i16()?;
                reader.target(relative as i32)?
            },
        },
        167 => {
            let relative = reader.i16()?;
            Goto(reader.target(relative as i32)?)
        }
        168 => {
            let relative = reader.i16()?;
            Jsr(reader.target(relative as i32)?)
        }
        169 => Ret(reader.u8()? as u16),
        170 => {
            reader.align4()?;
            let default = reader.i32()?;
            let default = reader.target(default)?;
            let low = reader.i32()?;
            let high = reader.i32()?;
            if high < low {
                return Err(DecodeError::UnexpectedEnd(offset));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > reader.code_len as usize {
                return Err(DecodeError::UnexpectedEnd(offset));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let relative = reader.i32()?;
                targets.push(reader.target(relative)?);
            }
            TableSwitch {
                default,
                low,
                targets,
            }
        }
        171 => {
            reader.align4()?;
            let default = reader.i32()?;
            let default = reader.target(default)?;
            let count = reader.i32()?;
            if count < 0 || count as usize > reader.code_len as usize {
                return Err(DecodeError::UnexpectedEnd(offset));
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = reader.i32()?;
                let relative = reader.i32()?;
                pairs.push((key, reader.target(relative)?));
            }
            LookupSwitch { default, pairs }
        }
        172..=176 => Return(Some(load_store_kind(172, opcode))),
        177 => Return(None),
        178 => GetStatic(reader.u16()?),
        179 => PutStatic(reader.u16()?),
        180 => GetField(reader.u16()?),
        181 => PutField(reader.u16()?),
        182 => Invoke {
            kind: InvokeKind::Virtual,
            index: reader.u16()?,
        },
        183 => Invoke {
            kind: InvokeKind::Special,
            index: reader.u16()?,
        },
        184 => Invoke {
            kind: InvokeKind::Static,
            index: reader.u16()?,
        },
        185 => {
            let index = reader.u16()?;
            // count, 0
            reader.u8()?;
            reader.u8()?;
            Invoke {
                kind: InvokeKind::Interface,
                index,
            }
        }
        186 => {
            let index = reader.u16()?;
            reader.u16()?;
            InvokeDynamic(index)
        }
        187 => New(reader.u16()?),
        188 => {
            let atype = reader.u8()?;
            NewArray(match atype {
                4 => PrimitiveType::Boolean,
                5 => PrimitiveType::Char,
                6 => PrimitiveType::Float,
                7 => PrimitiveType::Double,
                8 => PrimitiveType::Byte,
                9 => PrimitiveType::Short,
                10 => PrimitiveType::Int,
                11 => PrimitiveType::Long,
                _ => return Err(DecodeError::InvalidArrayType { offset, atype }),
            })
        }
        189 => ANewArray(reader.u16()?),
        190 => ArrayLength,
        191 => AThrow,
        192 => CheckCast(reader.u16()?),
        193 => InstanceOf(reader.u16()?),
        194 => MonitorEnter,
        195 => MonitorExit,
        196 => {
            let opcode = reader.u8()?;
            match opcode {
                21..=25 => Load {
                    kind: load_store_kind(21, opcode),
                    index: reader.u16()?,
                },
                54..=58 => Store {
                    kind: load_store_kind(54, opcode),
                    index: reader.u16()?,
                },
                132 => Iinc {
                    index: reader.u16()?,
                    delta: reader.i16()?,
                },
                169 => Ret(reader.u16()?),
                _ => return Err(DecodeError::InvalidWide { offset, opcode }),
            }
        }
        197 => MultiANewArray {
            index: reader.u16()?,
            dimensions: reader.u8()?,
        },
        198 | 199 => If {
            cmp: if opcode == 198 { Cmp::Eq } else { Cmp::Ne },
            operand: IfOperand::Null,
            target: {
                let relative = reader.i16()?;
                reader.target(relative as i32)?
            },
        },
        200 => {
            let relative = reader.i32()?;
            Goto(reader.target(relative)?)
        }
        201 => {
            let relative = reader.i32()?;
            Jsr(reader.target(relative)?)
        }
        _ => return Err(DecodeError::UnknownOpcode { offset, opcode }),
    })
}

/// Raw listing used as the display fallback for methods that fail to decompile. Decodes as much
/// as possible and reports the first undecodable instruction inline.
pub fn listing(code: &[u8]) -> Vec<String> {
    let mut reader = Reader {
        cursor: Cursor::new(code),
        code_len: code.len() as u32,
        start: 0,
    };
    let mut lines = Vec::new();
    while (reader.position() as usize) < code.len() {
        reader.start = reader.position();
        let Ok(opcode) = reader.u8() else { break };
        match decode_one(&mut reader, opcode) {
            Ok(insn) => lines.push(format!("{}: {insn}", reader.start)),
            Err(error) => {
                lines.push(format!("{}: <{error}>", reader.start));
                break;
            }
        }
    }
    lines
}

/// Extracts the `Kind` a `Convert` result is pushed as.
pub fn stack_kind(primitive: PrimitiveType) -> Kind {
    Kind::from_primitive(primitive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_collapse() {
        let code = [
            0x1a, // iload_0
            0x15, 0x05, // iload 5
            0xc4, 0x15, 0x01, 0x00, // wide iload 256
            0x02, // iconst_m1
            0x10, 0xfe, // bipush -2
            0x11, 0x01, 0x00, // sipush 256
            0x4e, // astore_3
            0xb1, // return
        ];
        let insns: Vec<Instruction> = decode(&code).unwrap().into_iter().map(|d| d.insn).collect();
        assert_eq!(
            insns,
            [
                Instruction::Load {
                    kind: Kind::Int,
                    index: 0
                },
                Instruction::Load {
                    kind: Kind::Int,
                    index: 5
                },
                Instruction::Load {
                    kind: Kind::Int,
                    index: 256
                },
                Instruction::IntConst(-1),
                Instruction::IntConst(-2),
                Instruction::IntConst(256),
                Instruction::Store {
                    kind: Kind::Reference,
                    index: 3
                },
                Instruction::Return(None),
            ]
        );
    }

    #[test]
    fn switch_padding() {
        // nop; iload_0; tableswitch (padding to 4) default=+20 low=0 high=1 [+20, +20]
        let mut code = vec![0x00, 0x1a, 0xaa, 0x00];
        for value in [22i32, 0, 1, 22, 22] {
            code.extend(value.to_be_bytes());
        }
        code.push(0xb1);
        let decoded = decode(&code).unwrap();
        assert_eq!(
            decoded[2].insn,
            Instruction::TableSwitch {
                default: 24,
                low: 0,
                targets: vec![24, 24]
            }
        );
        assert_eq!(decoded[3].offset, 24);
    }

    #[test]
    fn errors() {
        assert!(matches!(decode(&[0x10]), Err(DecodeError::UnexpectedEnd(0))));
        assert!(matches!(
            decode(&[0x00, 0xff]),
            Err(DecodeError::UnknownOpcode {
                offset: 1,
                opcode: 0xff
            })
        ));
        assert!(matches!(
            decode(&[0xa7, 0x00, 0x10]),
            Err(DecodeError::JumpOutOfBounds(0))
        ));
        assert!(matches!(
            decode(&[0xc4, 0x60, 0x00, 0x00]),
            Err(DecodeError::InvalidWide { .. })
        ));
    }

    #[test]
    fn listing_survives_garbage() {
        let lines = listing(&[0x1a, 0xac, 0xfe]);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2: <"));
    }
}
