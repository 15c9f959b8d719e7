//! Hand-assembling bytecode for tests.

use crate::model::{
    ClassModel, CodeModel, ExceptionEntry, LineNumberEntry, LocalVariableEntry,
    MethodAccessFlags, MethodModel, PoolBuilder,
};
use rustc_hash::FxHashMap;

pub mod op {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const LCONST_1: u8 = 0x0a;
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const IALOAD: u8 = 0x2e;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const IASTORE: u8 = 0x4f;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const DUP_X1: u8 = 0x5a;
    pub const DUP2: u8 = 0x5c;
    pub const IADD: u8 = 0x60;
    pub const LADD: u8 = 0x61;
    pub const ISUB: u8 = 0x64;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9a;
    pub const IFGT: u8 = 0x9d;
    pub const IFLE: u8 = 0x9e;
    pub const IF_ICMPGE: u8 = 0xa2;
    pub const IF_ICMPLE: u8 = 0xa4;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const IRETURN: u8 = 0xac;
    pub const LRETURN: u8 = 0xad;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ARRAYLENGTH: u8 = 0xbe;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const MONITORENTER: u8 = 0xc2;
    pub const MONITOREXIT: u8 = 0xc3;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
}

struct Fixup {
    at: usize,
    base: u32,
    label: &'static str,
    wide: bool,
}

/// Assembles a `Code` attribute. Jumps refer to labels, which are resolved by `build`.
pub struct CodeBuilder<'a> {
    pub pool: &'a mut PoolBuilder,
    code: Vec<u8>,
    labels: FxHashMap<&'static str, u32>,
    fixups: Vec<Fixup>,
    handlers: Vec<(&'static str, &'static str, &'static str, Option<String>)>,
    lines: Vec<LineNumberEntry>,
    locals: Vec<LocalVariableEntry>,
}

impl<'a> CodeBuilder<'a> {
    pub fn new(pool: &'a mut PoolBuilder) -> Self {
        Self {
            pool,
            code: Vec::new(),
            labels: FxHashMap::default(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            locals: Vec::new(),
        }
    }

    pub fn pc(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn label(&mut self, name: &'static str) -> &mut Self {
        self.labels.insert(name, self.pc());
        self
    }

    /// Starts a new source line at the current address.
    pub fn line(&mut self, line: u32) -> &mut Self {
        let start = self.pc();
        self.lines.push(LineNumberEntry { start, line });
        self
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Self {
        self.code.extend([opcode, operand]);
        self
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Self {
        self.code.push(opcode);
        self.code.extend(operand.to_be_bytes());
        self
    }

    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => self.op((0x03 + value) as u8),
            -128..=127 => self.op_u8(0x10, value as i8 as u8),
            -32768..=32767 => self.op_u16(0x11, value as i16 as u16),
            _ => {
                let index = self.pool.integer(value);
                self.op_u16(0x13, index)
            }
        }
    }

    pub fn ldc_string(&mut self, value: &str) -> &mut Self {
        let index = self.pool.string(value);
        self.op_u16(0x13, index)
    }

    pub fn iload(&mut self, index: u8) -> &mut Self {
        self.op_u8(op::ILOAD, index)
    }

    pub fn istore(&mut self, index: u8) -> &mut Self {
        self.op_u8(op::ISTORE, index)
    }

    pub fn aload(&mut self, index: u8) -> &mut Self {
        self.op_u8(op::ALOAD, index)
    }

    pub fn astore(&mut self, index: u8) -> &mut Self {
        self.op_u8(op::ASTORE, index)
    }

    pub fn iinc(&mut self, index: u8, delta: i8) -> &mut Self {
        self.code.extend([op::IINC, index, delta as u8]);
        self
    }

    pub fn field(&mut self, opcode: u8, class: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.field_ref(class, name, descriptor);
        self.op_u16(opcode, index)
    }

    pub fn invoke(&mut self, opcode: u8, class: &str, name: &str, descriptor: &str) -> &mut Self {
        if opcode == op::INVOKEINTERFACE {
            let index = self.pool.interface_method_ref(class, name, descriptor);
            self.op_u16(opcode, index);
            // The count operand is never looked at.
            self.code.extend([1, 0]);
            return self;
        }
        let index = self.pool.method_ref(class, name, descriptor);
        self.op_u16(opcode, index)
    }

    pub fn class_op(&mut self, opcode: u8, class: &str) -> &mut Self {
        let index = self.pool.class(class);
        self.op_u16(opcode, index)
    }

    pub fn jump(&mut self, opcode: u8, label: &'static str) -> &mut Self {
        let base = self.pc();
        self.code.push(opcode);
        self.fixups.push(Fixup {
            at: self.code.len(),
            base,
            label,
            wide: false,
        });
        self.code.extend([0, 0]);
        self
    }

    fn switch_header(&mut self, opcode: u8) -> u32 {
        let base = self.pc();
        self.code.push(opcode);
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
        base
    }

    fn wide_label(&mut self, base: u32, label: &'static str) {
        self.fixups.push(Fixup {
            at: self.code.len(),
            base,
            label,
            wide: true,
        });
        self.code.extend([0; 4]);
    }

    pub fn tableswitch(&mut self, low: i32, default: &'static str, targets: &[&'static str]) -> &mut Self {
        let base = self.switch_header(0xaa);
        self.wide_label(base, default);
        self.code.extend(low.to_be_bytes());
        self.code
            .extend((low + targets.len() as i32 - 1).to_be_bytes());
        for target in targets {
            self.wide_label(base, target);
        }
        self
    }

    pub fn lookupswitch(&mut self, default: &'static str, pairs: &[(i32, &'static str)]) -> &mut Self {
        let base = self.switch_header(0xab);
        self.wide_label(base, default);
        self.code.extend((pairs.len() as i32).to_be_bytes());
        for (key, target) in pairs {
            self.code.extend(key.to_be_bytes());
            self.wide_label(base, target);
        }
        self
    }

    pub fn try_catch(
        &mut self,
        start: &'static str,
        end: &'static str,
        handler: &'static str,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.handlers
            .push((start, end, handler, catch_type.map(str::to_owned)));
        self
    }

    pub fn local(&mut self, name: &str, descriptor: &str, index: u16, start: u32, length: u32) -> &mut Self {
        self.locals.push(LocalVariableEntry {
            start,
            length,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            index,
        });
        self
    }

    pub fn build(&mut self, max_locals: u16) -> CodeModel {
        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let target = self.labels[fixup.label];
            let delta = target as i32 - fixup.base as i32;
            if fixup.wide {
                code[fixup.at..fixup.at + 4].copy_from_slice(&delta.to_be_bytes());
            } else {
                code[fixup.at..fixup.at + 2].copy_from_slice(&(delta as i16).to_be_bytes());
            }
        }
        let exception_table = self
            .handlers
            .iter()
            .map(|(start, end, handler, catch_type)| ExceptionEntry {
                start: self.labels[start],
                end: self.labels[end],
                handler: self.labels[handler],
                catch_type: catch_type.clone(),
            })
            .collect();
        CodeModel {
            max_locals,
            bytecode: code,
            exception_table,
            line_numbers: self.lines.clone(),
            local_variables: self.locals.clone(),
        }
    }
}

pub fn method(name: &str, descriptor: &str, access_flags: MethodAccessFlags, code: CodeModel) -> MethodModel {
    MethodModel {
        access_flags,
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        code: Some(code),
    }
}

pub fn class(name: &str, pool: PoolBuilder, methods: Vec<MethodModel>) -> ClassModel {
    let mut class = ClassModel::new(name, pool.build());
    class.methods = methods;
    class
}

/// Eclipse's `$SWITCH_TABLE$<enum>()`: a lazily filled cache mapping `constants[i].ordinal()` to
/// `i + 1`, with every store guarded against the constant having been removed.
pub fn eclipse_switch_table(pool: &mut PoolBuilder, owner: &str, enum_class: &str, constants: &[&str]) -> MethodModel {
    const GUARDS: [(&str, &str, &str, &str); 3] = [
        ("s0", "e0", "h0", "n0"),
        ("s1", "e1", "h1", "n1"),
        ("s2", "e2", "h2", "n2"),
    ];
    assert!(constants.len() <= GUARDS.len());
    let field = format!("$SWITCH_TABLE${}", enum_class.replace('/', "$"));
    let enum_descriptor = format!("L{enum_class};");
    let mut b = CodeBuilder::new(pool);
    b.field(op::GETSTATIC, owner, &field, "[I")
        .op(op::DUP)
        .jump(op::IFNULL, "fill")
        .op(op::ARETURN)
        .label("fill")
        .op(op::POP)
        .invoke(op::INVOKESTATIC, enum_class, "values", &format!("()[{enum_descriptor}"))
        .op(op::ARRAYLENGTH)
        .op_u8(op::NEWARRAY, 10)
        .astore(0);
    for (case, (constant, (start, end, handler, next))) in constants.iter().zip(GUARDS).enumerate() {
        b.label(start)
            .aload(0)
            .field(op::GETSTATIC, enum_class, constant, &enum_descriptor)
            .invoke(op::INVOKEVIRTUAL, enum_class, "ordinal", "()I")
            .iconst(case as i32 + 1)
            .op(op::IASTORE)
            .label(end)
            .jump(op::GOTO, next)
            .label(handler)
            .op(op::POP)
            .label(next)
            .try_catch(start, end, handler, Some("java/lang/NoSuchFieldError"));
    }
    b.aload(0)
        .op(op::DUP)
        .field(op::PUTSTATIC, owner, &field, "[I")
        .op(op::ARETURN);
    let code = b.build(1);
    method(
        &field,
        "()[I",
        MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC,
        code,
    )
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
