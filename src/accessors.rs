//! Recognition of compiler-generated bridge methods.
//!
//! Before nestmates, javac let inner classes reach private members of their neighbours through
//! package-private static methods called `access$000`, `access$100`, ... Each one has a tiny fixed
//! body. Calls to them are replaced with the member access they proxy, and the methods themselves
//! are hidden.
//!
//! Enum switches are lowered through a lookup array translating ordinals to dense case numbers.
//! javac keeps the arrays in `$SwitchMap$...` static fields of a synthetic class and fills them in
//! its `<clinit>`; Eclipse generates a `$SWITCH_TABLE$...` method filling a cache field lazily.
//! Both initializers are parsed into an ordinal-to-constant table here.

use crate::bytecode::{ArithOp, ArrayKind, Decoded, Instruction, InvokeKind, Kind, decode};
use crate::model::{ClassModel, ConstantPool, MethodAccessFlags, MethodModel};
use rustc_hash::FxHashMap;

/// What an accessor method does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorKind {
    /// `static T access$000() { return Outer.field; }`
    StaticGet,
    /// `static T access$002(T value) { return Outer.field = value; }`
    StaticPut,
    /// `static T access$100(Outer self) { return self.field; }`
    InstanceGet,
    /// `static T access$102(Outer self, T value) { return self.field = value; }`
    InstancePut,
    /// `static T access$008() { return Outer.field++; }`, or `--`, or a prefix form.
    StaticIncrement { prefix: bool, decrement: bool },
    /// `static T access$108(Outer self) { return self.field++; }`, or `--`, or a prefix form.
    InstanceIncrement { prefix: bool, decrement: bool },
    /// `static R access$200(Outer self, A... args) { return self.method(args); }`
    Invoke(InvokeKind),
}

/// The member an accessor proxies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessorRecord {
    pub kind: AccessorKind,
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

/// Key of a class member: owner, name, descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberKey {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        Self {
            class: class.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }
}

/// Where a switch map lives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SwitchMapKey {
    /// javac: `Outer$1.$SwitchMap$pkg$Color[color.ordinal()]`.
    Field { class: String, name: String },
    /// Eclipse: `$SWITCH_TABLE$pkg$Color()[color.ordinal()]`.
    Method { class: String, name: String },
}

/// Dense case number to enum constant name.
pub type SwitchMap = FxHashMap<i32, String>;

pub fn is_accessor_name(name: &str) -> bool {
    name.strip_prefix("access$")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn is_accessor_candidate(method: &MethodModel) -> bool {
    is_accessor_name(&method.name)
        && method.access_flags.contains(MethodAccessFlags::STATIC)
        && !method.access_flags.intersects(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::PROTECTED | MethodAccessFlags::PRIVATE,
        )
}

/// Consumes consecutive loads of slots `first..`, in order. Returns the number of slots loaded.
fn leading_loads(insns: &[Instruction], first: u16) -> (usize, u16) {
    let mut slot = first;
    let mut count = 0;
    for insn in insns {
        match insn {
            Instruction::Load { kind, index } if *index == slot => {
                slot += kind.width() as u16;
                count += 1;
            }
            _ => break,
        }
    }
    (count, slot)
}

fn is_return(insn: &Instruction) -> bool {
    matches!(insn, Instruction::Return(_))
}

fn is_value_return(insn: &Instruction) -> bool {
    matches!(insn, Instruction::Return(Some(_)))
}

fn is_dup(insn: &Instruction) -> bool {
    matches!(
        insn,
        Instruction::Dup | Instruction::Dup2 | Instruction::DupX1 | Instruction::Dup2X1
    )
}

/// `x + 1` or `x - 1` in any numeric kind. Returns whether it is a decrement.
fn unit_step(one: &Instruction, arith: &Instruction) -> Option<bool> {
    let Instruction::Arith { op, kind } = arith else {
        return None;
    };
    let is_one = match (one, kind) {
        (Instruction::IntConst(1), Kind::Int) => true,
        (Instruction::LongConst(1), Kind::Long) => true,
        (Instruction::FloatConst(value), Kind::Float) => *value == 1.0,
        (Instruction::DoubleConst(value), Kind::Double) => *value == 1.0,
        _ => false,
    };
    match op {
        _ if !is_one => None,
        ArithOp::Add => Some(false),
        ArithOp::Sub => Some(true),
        _ => None,
    }
}

/// Increments of a field through an accessor: the value is read, stepped by one and written
/// back, with a copy of either the old or the new value returned.
fn classify_increment(insns: &[Instruction]) -> Option<(u16, AccessorKind)> {
    let (read, write, prefix, decrement, instance) = match insns {
        [
            Instruction::Load { index: 0, .. },
            Instruction::Dup,
            Instruction::GetField(read),
            copy,
            one,
            arith,
            Instruction::PutField(write),
            ret,
        ] if matches!(copy, Instruction::DupX1 | Instruction::Dup2X1) && is_value_return(ret) => {
            (read, write, false, unit_step(one, arith)?, true)
        }
        [
            Instruction::Load { index: 0, .. },
            Instruction::Dup,
            Instruction::GetField(read),
            one,
            arith,
            copy,
            Instruction::PutField(write),
            ret,
        ] if matches!(copy, Instruction::DupX1 | Instruction::Dup2X1) && is_value_return(ret) => {
            (read, write, true, unit_step(one, arith)?, true)
        }
        [
            Instruction::GetStatic(read),
            copy,
            one,
            arith,
            Instruction::PutStatic(write),
            ret,
        ] if matches!(copy, Instruction::Dup | Instruction::Dup2) && is_value_return(ret) => {
            (read, write, false, unit_step(one, arith)?, false)
        }
        [
            Instruction::GetStatic(read),
            one,
            arith,
            copy,
            Instruction::PutStatic(write),
            ret,
        ] if matches!(copy, Instruction::Dup | Instruction::Dup2) && is_value_return(ret) => {
            (read, write, true, unit_step(one, arith)?, false)
        }
        _ => return None,
    };
    if read != write {
        return None;
    }
    let kind = if instance {
        AccessorKind::InstanceIncrement { prefix, decrement }
    } else {
        AccessorKind::StaticIncrement { prefix, decrement }
    };
    Some((*read, kind))
}

/// Classifies an accessor by the shape of its body. Anything unexpected yields `None`.
pub fn classify(pool: &ConstantPool, method: &MethodModel) -> Option<AccessorRecord> {
    if !is_accessor_candidate(method) {
        return None;
    }
    let code = method.code.as_ref()?;
    let insns: Vec<Instruction> = decode(&code.bytecode)
        .ok()?
        .into_iter()
        .map(|decoded| decoded.insn)
        .filter(|insn| *insn != Instruction::Nop)
        .collect();

    let field = |index: u16, kind: AccessorKind| {
        let member = pool.field_ref(index).ok()?;
        Some(AccessorRecord {
            kind,
            class: member.class.to_owned(),
            name: member.name.to_owned(),
            descriptor: member.descriptor.to_owned(),
        })
    };

    match insns.as_slice() {
        [Instruction::GetStatic(index), ret] if is_value_return(ret) => {
            field(*index, AccessorKind::StaticGet)
        }
        [
            Instruction::Load { index: 0, .. },
            Instruction::GetField(index),
            ret,
        ] if is_value_return(ret) => field(*index, AccessorKind::InstanceGet),
        [Instruction::Load { index: 0, .. }, dup, Instruction::PutStatic(index), ret]
            if is_dup(dup) && is_value_return(ret) =>
        {
            field(*index, AccessorKind::StaticPut)
        }
        [Instruction::Load { index: 0, .. }, Instruction::PutStatic(index), ret]
            if is_return(ret) =>
        {
            field(*index, AccessorKind::StaticPut)
        }
        [
            Instruction::Load { index: 0, .. },
            Instruction::Load { index: 1, .. },
            dup,
            Instruction::PutField(index),
            ret,
        ] if is_dup(dup) && is_value_return(ret) => field(*index, AccessorKind::InstancePut),
        [
            Instruction::Load { index: 0, .. },
            Instruction::Load { index: 1, .. },
            Instruction::PutField(index),
            ret,
        ] if is_return(ret) => field(*index, AccessorKind::InstancePut),
        _ => match classify_increment(&insns) {
            Some((index, kind)) => field(index, kind),
            None => classify_invoke(pool, &insns),
        },
    }
}

fn classify_invoke(pool: &ConstantPool, insns: &[Instruction]) -> Option<AccessorRecord> {
    let (count, _) = leading_loads(insns, 0);
    match &insns[count..] {
        [Instruction::Invoke { kind, index }, ret] if is_return(ret) => {
            let member = pool.method_ref(*index).ok()?;
            if member.name == "<init>" {
                return None;
            }
            Some(AccessorRecord {
                kind: AccessorKind::Invoke(*kind),
                class: member.class.to_owned(),
                name: member.name.to_owned(),
                descriptor: member.descriptor.to_owned(),
            })
        }
        _ => None,
    }
}

/// Methods and fields of `class` that the pre-analysis understood and that are normally hidden.
#[derive(Debug, Default)]
pub struct ClassScan {
    pub accessors: FxHashMap<MemberKey, AccessorRecord>,
    pub switch_maps: FxHashMap<SwitchMapKey, SwitchMap>,
}

/// Runs the accessor and switch-map matchers over one class.
pub fn scan_class(class: &ClassModel) -> ClassScan {
    let mut scan = ClassScan::default();
    for method in &class.methods {
        if let Some(record) = classify(&class.pool, method) {
            log::debug!(
                "{}.{}{} is an accessor of {}.{} ({:?})",
                class.name,
                method.name,
                method.descriptor,
                record.class,
                record.name,
                record.kind
            );
            scan.accessors
                .insert(MemberKey::new(&class.name, &method.name, &method.descriptor), record);
            continue;
        }

        let Some(code) = &method.code else {
            continue;
        };
        let Ok(insns) = decode(&code.bytecode) else {
            continue;
        };
        if method.name == "<clinit>" {
            for (field, map) in parse_javac_switch_maps(&class.pool, &insns) {
                scan.switch_maps.insert(
                    SwitchMapKey::Field {
                        class: class.name.clone(),
                        name: field,
                    },
                    map,
                );
            }
        } else if method.name.starts_with("$SWITCH_TABLE$")
            && method.descriptor == "()[I"
            && method.access_flags.contains(MethodAccessFlags::STATIC)
            && let Some(map) = parse_eclipse_switch_table(&class.pool, &insns)
        {
            scan.switch_maps.insert(
                SwitchMapKey::Method {
                    class: class.name.clone(),
                    name: method.name.clone(),
                },
                map,
            );
        }
    }
    scan
}

/// Matches `<array>; getstatic Enum.CONST; invokevirtual ordinal()I; iconst n; iastore` at
/// `insns[at]`, where `<array>` is the single instruction before the constant. Returns the array
/// instruction, the case number and the constant name.
fn ordinal_store<'a>(
    pool: &'a ConstantPool,
    insns: &'a [Decoded],
    at: usize,
) -> Option<(&'a Instruction, i32, &'a str)> {
    let window = insns.get(at..at + 5)?;
    let [array, constant, ordinal, case, store] = window else {
        return None;
    };
    let Instruction::GetStatic(constant) = constant.insn else {
        return None;
    };
    let Instruction::Invoke {
        kind: InvokeKind::Virtual,
        index: ordinal,
    } = ordinal.insn
    else {
        return None;
    };
    let Instruction::IntConst(case) = case.insn else {
        return None;
    };
    if store.insn != Instruction::ArrayStore(ArrayKind::Int) {
        return None;
    }
    let constant = pool.field_ref(constant).ok()?;
    let ordinal = pool.method_ref(ordinal).ok()?;
    if ordinal.name != "ordinal" || ordinal.descriptor != "()I" {
        return None;
    }
    if constant.descriptor.strip_prefix('L')?.strip_suffix(';')? != constant.class {
        return None;
    }
    Some((&array.insn, case, constant.name))
}

fn parse_javac_switch_maps(pool: &ConstantPool, insns: &[Decoded]) -> Vec<(String, SwitchMap)> {
    let mut maps: Vec<(String, SwitchMap)> = Vec::new();
    for at in 0..insns.len() {
        let Some((Instruction::GetStatic(field), case, constant)) = ordinal_store(pool, insns, at)
        else {
            continue;
        };
        let Ok(field) = pool.field_ref(*field) else {
            continue;
        };
        if !field.name.starts_with("$SwitchMap$") || field.descriptor != "[I" {
            continue;
        }
        let position = match maps.iter().position(|(name, _)| name == field.name) {
            Some(position) => position,
            None => {
                maps.push((field.name.to_owned(), SwitchMap::default()));
                maps.len() - 1
            }
        };
        maps[position].1.insert(case, constant.to_owned());
    }
    maps
}

fn parse_eclipse_switch_table(pool: &ConstantPool, insns: &[Decoded]) -> Option<SwitchMap> {
    let mut map = SwitchMap::default();
    for at in 0..insns.len() {
        if let Some((
            Instruction::Load {
                kind: Kind::Reference,
                ..
            },
            case,
            constant,
        )) = ordinal_store(pool, insns, at)
        {
            map.insert(case, constant.to_owned());
        }
    }
    (!map.is_empty()).then_some(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PoolBuilder;
    use crate::testing::{CodeBuilder, class, eclipse_switch_table, method, op};

    fn accessor(
        pool: &mut PoolBuilder,
        descriptor: &str,
        assemble: impl FnOnce(&mut CodeBuilder<'_>),
    ) -> MethodModel {
        let mut builder = CodeBuilder::new(pool);
        assemble(&mut builder);
        let code = builder.build(2);
        method("access$000", descriptor, MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC, code)
    }

    #[test]
    fn instance_field_get() {
        let mut pool = PoolBuilder::new();
        let m = accessor(&mut pool, "(LOuter;)I", |b| {
            b.aload(0).field(op::GETFIELD, "Outer", "secret", "I").op(op::IRETURN);
        });
        let record = classify(&pool.build(), &m).unwrap();
        assert_eq!(record.kind, AccessorKind::InstanceGet);
        assert_eq!((record.class.as_str(), record.name.as_str()), ("Outer", "secret"));
    }

    #[test]
    fn static_put_and_invoke() {
        let mut pool = PoolBuilder::new();
        let put = accessor(&mut pool, "(I)I", |b| {
            b.iload(0).op(op::DUP).field(op::PUTSTATIC, "Outer", "count", "I").op(op::IRETURN);
        });
        let call = accessor(&mut pool, "(LOuter;I)V", |b| {
            b.aload(0)
                .iload(1)
                .invoke(op::INVOKESPECIAL, "Outer", "hidden", "(I)V")
                .op(op::RETURN);
        });
        let pool = pool.build();
        assert_eq!(classify(&pool, &put).unwrap().kind, AccessorKind::StaticPut);
        let call = classify(&pool, &call).unwrap();
        assert_eq!(call.kind, AccessorKind::Invoke(InvokeKind::Special));
        assert_eq!(call.name, "hidden");
    }

    #[test]
    fn increment_accessors() {
        let mut pool = PoolBuilder::new();
        // return self.count++;
        let instance_post = accessor(&mut pool, "(LOuter;)I", |b| {
            b.aload(0)
                .op(op::DUP)
                .field(op::GETFIELD, "Outer", "count", "I")
                .op(op::DUP_X1)
                .iconst(1)
                .op(op::IADD)
                .field(op::PUTFIELD, "Outer", "count", "I")
                .op(op::IRETURN);
        });
        // return --self.count;
        let instance_pre = accessor(&mut pool, "(LOuter;)I", |b| {
            b.aload(0)
                .op(op::DUP)
                .field(op::GETFIELD, "Outer", "count", "I")
                .iconst(1)
                .op(op::ISUB)
                .op(op::DUP_X1)
                .field(op::PUTFIELD, "Outer", "count", "I")
                .op(op::IRETURN);
        });
        // return Outer.total++;
        let static_post = accessor(&mut pool, "()J", |b| {
            b.field(op::GETSTATIC, "Outer", "total", "J")
                .op(op::DUP2)
                .op(op::LCONST_1)
                .op(op::LADD)
                .field(op::PUTSTATIC, "Outer", "total", "J")
                .op(op::LRETURN);
        });
        // Reads one field and writes another.
        let mismatched = accessor(&mut pool, "()I", |b| {
            b.field(op::GETSTATIC, "Outer", "a", "I")
                .iconst(1)
                .op(op::IADD)
                .op(op::DUP)
                .field(op::PUTSTATIC, "Outer", "b", "I")
                .op(op::IRETURN);
        });
        let pool = pool.build();

        let record = classify(&pool, &instance_post).unwrap();
        assert_eq!(
            record.kind,
            AccessorKind::InstanceIncrement {
                prefix: false,
                decrement: false
            }
        );
        assert_eq!(record.name, "count");
        assert_eq!(
            classify(&pool, &instance_pre).unwrap().kind,
            AccessorKind::InstanceIncrement {
                prefix: true,
                decrement: true
            }
        );
        let record = classify(&pool, &static_post).unwrap();
        assert_eq!(
            record.kind,
            AccessorKind::StaticIncrement {
                prefix: false,
                decrement: false
            }
        );
        assert_eq!((record.name.as_str(), record.descriptor.as_str()), ("total", "J"));
        assert!(classify(&pool, &mismatched).is_none());
    }

    #[test]
    fn unexpected_shapes_are_left_alone() {
        let mut pool = PoolBuilder::new();
        let odd = accessor(&mut pool, "(LOuter;)I", |b| {
            b.aload(0)
                .field(op::GETFIELD, "Outer", "secret", "I")
                .iconst(1)
                .op(op::IADD)
                .op(op::IRETURN);
        });
        let mut public = odd.clone();
        public.access_flags |= MethodAccessFlags::PUBLIC;
        let pool = pool.build();
        assert!(classify(&pool, &odd).is_none());
        assert!(classify(&pool, &public).is_none());
        assert!(!is_accessor_name("access$"));
        assert!(!is_accessor_name("access$x1"));
    }

    #[test]
    fn javac_switch_map() {
        let mut pool = PoolBuilder::new();
        let clinit = {
            let mut b = CodeBuilder::new(&mut pool);
            b.invoke(op::INVOKESTATIC, "Color", "values", "()[LColor;")
                .op(op::ARRAYLENGTH)
                .op_u8(op::NEWARRAY, 10)
                .field(op::PUTSTATIC, "Outer$1", "$SwitchMap$Color", "[I");
            for (case, name) in [(1, "RED"), (2, "GREEN")] {
                b.field(op::GETSTATIC, "Outer$1", "$SwitchMap$Color", "[I")
                    .field(op::GETSTATIC, "Color", name, "LColor;")
                    .invoke(op::INVOKEVIRTUAL, "Color", "ordinal", "()I")
                    .iconst(case)
                    .op(op::IASTORE);
            }
            b.op(op::RETURN);
            b.build(0)
        };
        let class = class(
            "Outer$1",
            pool,
            vec![method("<clinit>", "()V", MethodAccessFlags::STATIC, clinit)],
        );
        let scan = scan_class(&class);
        let map = &scan.switch_maps[&SwitchMapKey::Field {
            class: "Outer$1".to_owned(),
            name: "$SwitchMap$Color".to_owned(),
        }];
        assert_eq!(map[&1], "RED");
        assert_eq!(map[&2], "GREEN");
    }

    #[test]
    fn eclipse_switch_table_method() {
        let mut pool = PoolBuilder::new();
        let table = eclipse_switch_table(&mut pool, "Outer", "Color", &["RED", "GREEN", "BLUE"]);
        let class = class("Outer", pool, vec![table]);
        let scan = scan_class(&class);
        let map = &scan.switch_maps[&SwitchMapKey::Method {
            class: "Outer".to_owned(),
            name: "$SWITCH_TABLE$Color".to_owned(),
        }];
        assert_eq!(map.len(), 3);
        assert_eq!(map[&1], "RED");
        assert_eq!(map[&2], "GREEN");
        assert_eq!(map[&3], "BLUE");
        assert!(scan.accessors.is_empty());
    }
}
