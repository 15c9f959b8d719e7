//! Reconstruction of local variables from slot accesses.
//!
//! The builder leaves every local access as a `Slot` expression tagged with its address. Here the
//! accesses of each slot are split into variables (by debug info when it's available, by the
//! category of the stored values otherwise), each variable gets a type and a name, and the `Slot`
//! and surviving `Temp` expressions are replaced with `Var`.
//!
//! Variables sharing a slot always have disjoint address ranges.

mod constraints;
mod names;

pub use constraints::IntSet;
pub use names::NameTable;

use crate::builder::MethodIr;
use crate::bytecode::Kind;
use crate::config::Config;
use crate::descriptor::{MethodDescriptor, PrimitiveType, Type};
use crate::ir::{Arena, Expr, ExprId, StmtKind, TempId, VarId};
use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};

bitflags! {
    pub struct LocalFlags: u8 {
        const PARAMETER = 0x01;
        const THIS = 0x02;
        /// Bound to the exception object at the start of a handler.
        const EXCEPTION = 0x04;
        /// The enclosing instance passed to a constructor of an inner class.
        const OUTER_THIS = 0x08;
        /// Not present in the bytecode at all; made up to have something to display.
        const PLACEHOLDER = 0x10;
        /// Hidden from method signatures.
        const SYNTHETIC = 0x20;
        /// Name and type come from the `LocalVariableTable`.
        const DEBUG_INFO = 0x40;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum VarType {
    Resolved(Type),
    /// An int-category variable whose exact type is still being narrowed.
    Ints(IntSet),
    /// A reference whose stores disagree on the type.
    Object,
    ReturnAddress,
    Undefined,
}

impl VarType {
    pub fn resolved(&self) -> Option<Type> {
        match self {
            Self::Resolved(ty) => Some(ty.clone()),
            Self::Object => Some(Type::java_lang_object()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalVariable {
    /// `None` for variables made from stack temporaries.
    pub slot: Option<u16>,
    pub start: u32,
    pub length: u32,
    pub ty: VarType,
    pub name: String,
    pub flags: LocalFlags,
}

impl LocalVariable {
    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end()
    }
}

/// What the class knows about the leading parameters of a method.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParameterHints {
    /// Enum constructors take the constant name and ordinal first.
    pub enum_constructor: bool,
    /// Inner class constructors take the enclosing instance first.
    pub outer_this: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Int,
    Long,
    Float,
    Double,
    Reference,
    ReturnAddress,
}

impl Category {
    fn of_kind(kind: Kind) -> Self {
        match kind {
            Kind::Int => Self::Int,
            Kind::Long => Self::Long,
            Kind::Float => Self::Float,
            Kind::Double => Self::Double,
            Kind::Reference => Self::Reference,
        }
    }

    fn of_type(ty: &Type) -> Self {
        match ty.as_primitive() {
            Some(primitive) if primitive.is_int_like() => Self::Int,
            Some(primitive) => match primitive {
                PrimitiveType::Long => Self::Long,
                PrimitiveType::Float => Self::Float,
                _ => Self::Double,
            },
            None => Self::Reference,
        }
    }
}

struct Access {
    id: ExprId,
    slot: u16,
    category: Category,
    offset: u32,
    store: bool,
}

/// A variable under construction.
struct Record {
    local: LocalVariable,
    category: Category,
    last_access: Option<u32>,
    stored: bool,
    // Extends to the end of the method unless the slot is reused.
    open_ended: bool,
}

impl Record {
    fn new(slot: u16, start: u32, length: u32, category: Category, ty: VarType) -> Self {
        Self {
            local: LocalVariable {
                slot: Some(slot),
                start,
                length,
                ty,
                name: String::new(),
                flags: LocalFlags::empty(),
            },
            category,
            last_access: None,
            stored: false,
            open_ended: false,
        }
    }

    fn touch(&mut self, offset: u32) {
        self.last_access = Some(self.last_access.map_or(offset, |last| last.max(offset)));
        if !self.open_ended && offset >= self.local.end() {
            self.local.length = offset + 1 - self.local.start;
        }
    }

    fn close(&mut self) {
        if self.open_ended {
            self.open_ended = false;
            let end = self.last_access.map_or(self.local.start + 1, |last| last + 1);
            self.local.length = end.saturating_sub(self.local.start).max(1);
        }
    }
}

/// Visits each `(target, value)` write in the method, including nested assignment expressions.
fn for_each_store(ir: &MethodIr, mut f: impl FnMut(ExprId, ExprId, u32)) {
    for stmt in &ir.stmts {
        match &stmt.kind {
            StmtKind::Assign { target, value } => f(*target, *value, stmt.offset),
            StmtKind::MultiAssign { targets, value } => {
                for target in targets {
                    f(*target, *value, stmt.offset);
                }
            }
            _ => {}
        }
        for root in stmt.exprs() {
            ir.arena.walk(root, &mut |_, expr| {
                if let Expr::Assign { target, value } = expr {
                    f(*target, *value, stmt.offset);
                }
            });
        }
    }
}

fn collect_accesses(ir: &MethodIr) -> Vec<Access> {
    let mut stored_values: FxHashMap<ExprId, ExprId> = FxHashMap::default();
    for_each_store(ir, |target, value, _| {
        stored_values.insert(target, value);
    });

    let mut accesses = Vec::new();
    for stmt in &ir.stmts {
        for root in stmt.exprs() {
            ir.arena.walk(root, &mut |id, expr| {
                if let Expr::Slot {
                    index,
                    kind,
                    offset,
                } = expr
                {
                    let stored = stored_values.get(&id);
                    let category = match stored {
                        Some(value) if matches!(ir.arena[*value], Expr::ReturnAddress) => {
                            Category::ReturnAddress
                        }
                        _ => Category::of_kind(*kind),
                    };
                    accesses.push(Access {
                        id,
                        slot: *index,
                        category,
                        offset: *offset,
                        store: stored.is_some(),
                    });
                }
            });
        }
    }
    // A store and a load at the same address: the store comes first.
    accesses.sort_by_key(|access| (access.offset, !access.store));
    accesses
}

/// Returns the records and how many of them (at the front) come from debug info.
fn seed_records(ir: &MethodIr, hints: ParameterHints, config: &Config) -> (Vec<Record>, usize) {
    let mut records = Vec::new();

    if config.use_debug_names {
        for entry in &ir.local_variables {
            let Ok(ty) = Type::parse(&entry.descriptor) else {
                continue;
            };
            let overlaps = records.iter().any(|record: &Record| {
                record.local.slot == Some(entry.index)
                    && record.local.start < entry.start + entry.length
                    && entry.start < record.local.end()
            });
            if overlaps {
                log::debug!("Ignoring overlapping debug entry for `{}`", entry.name);
                continue;
            }
            let mut record = Record::new(
                entry.index,
                entry.start,
                entry.length,
                Category::of_type(&ty),
                VarType::Resolved(ty),
            );
            record.local.name = entry.name.clone();
            record.local.flags = LocalFlags::DEBUG_INFO;
            records.push(record);
        }
    }

    let debug_records = records.len();

    // Parameters, unless debug info already covers them.
    let mut slot = 0u16;
    let mut parameters: Vec<(Type, LocalFlags)> = Vec::new();
    if !ir.is_static() {
        parameters.push((Type::object(&ir.class_name), LocalFlags::THIS));
    }
    for (i, ty) in ir.descriptor.parameters.iter().enumerate() {
        let mut flags = LocalFlags::PARAMETER;
        if ir.is_constructor() {
            if hints.enum_constructor && i < 2 {
                flags |= LocalFlags::SYNTHETIC;
            } else if hints.outer_this && i == 0 {
                flags |= LocalFlags::SYNTHETIC | LocalFlags::OUTER_THIS;
            }
        }
        parameters.push((ty.clone(), flags));
    }
    for (ty, flags) in parameters {
        let width = ty.width() as u16;
        if let Some(record) = records
            .iter_mut()
            .find(|record| record.local.slot == Some(slot) && record.local.covers(0))
        {
            record.local.flags |= flags;
            if flags.contains(LocalFlags::THIS) {
                record.local.name = "this".to_owned();
            }
        } else {
            let mut record = Record::new(slot, 0, ir.code_len.max(1), Category::of_type(&ty), VarType::Resolved(ty));
            record.local.flags = flags;
            record.open_ended = true;
            records.push(record);
        }
        slot += width;
    }
    (records, debug_records)
}

/// Splits slot accesses into variables and rewrites them to `Var`/`This`.
pub fn reconstruct(ir: &mut MethodIr, hints: ParameterHints, config: &Config) {
    let accesses = collect_accesses(ir);
    let (mut records, debug_records) = seed_records(ir, hints, config);

    // The fallback record currently receiving accesses of each slot.
    let mut current: FxHashMap<u16, usize> = FxHashMap::default();
    for (i, record) in records.iter().enumerate() {
        if record.open_ended && let Some(slot) = record.local.slot {
            current.insert(slot, i);
        }
    }

    let mut owner: FxHashMap<ExprId, usize> = FxHashMap::default();
    for access in &accesses {
        let debug = records[..debug_records].iter().position(|record| {
            record.local.slot == Some(access.slot)
                && record.local.covers(access.offset)
                && record.category == access.category
        });
        let index = if let Some(index) = debug {
            if let Some(previous) = current.remove(&access.slot) {
                records[previous].close();
            }
            index
        } else {
            match current.get(&access.slot) {
                Some(&index) if records[index].category == access.category => index,
                previous => {
                    if let Some(&previous) = previous {
                        records[previous].close();
                    }
                    let ty = match access.category {
                        Category::Int => VarType::Ints(IntSet::all()),
                        Category::Long => VarType::Resolved(Type::Primitive(PrimitiveType::Long)),
                        Category::Float => VarType::Resolved(Type::Primitive(PrimitiveType::Float)),
                        Category::Double => VarType::Resolved(Type::Primitive(PrimitiveType::Double)),
                        Category::Reference => VarType::Undefined,
                        Category::ReturnAddress => VarType::ReturnAddress,
                    };
                    records.push(Record::new(access.slot, access.offset, 1, access.category, ty));
                    current.insert(access.slot, records.len() - 1);
                    records.len() - 1
                }
            }
        };
        records[index].touch(access.offset);
        if access.store {
            records[index].stored = true;
        }
        owner.insert(access.id, index);
    }

    enforce_disjoint(&mut records);

    // `this` stays `this` unless the slot is overwritten.
    let this_record = records.iter().position(|record| {
        record.local.flags.contains(LocalFlags::THIS) && !record.stored
    });

    ir.arena.locals = records.iter().map(|record| record.local.clone()).collect();
    for (id, index) in owner {
        let replacement = if Some(index) == this_record {
            Expr::This
        } else {
            Expr::Var(VarId(index as u32))
        };
        ir.arena.replace(id, replacement);
    }

    convert_temps(ir);
    mark_exception_variables(ir);
    infer_reference_types(ir, config);

    let ints: Vec<VarId> = ir
        .arena
        .locals
        .iter()
        .enumerate()
        .filter(|(_, local)| matches!(local.ty, VarType::Ints(_)))
        .map(|(i, _)| VarId(i as u32))
        .collect();
    constraints::solve_ints(ir, &ints, config.max_type_iterations);

    insert_casts(ir);
    names::assign(&mut ir.arena.locals);
    log::trace!(
        "Reconstructed {} locals for {}.{}",
        ir.arena.locals.len(),
        ir.class_name,
        ir.name
    );
}

/// Clips ranges so that variables sharing a slot never overlap.
fn enforce_disjoint(records: &mut [Record]) {
    let mut by_slot: FxHashMap<u16, Vec<usize>> = FxHashMap::default();
    for (i, record) in records.iter().enumerate() {
        if let Some(slot) = record.local.slot {
            by_slot.entry(slot).or_default().push(i);
        }
    }
    for (_, mut indices) in by_slot {
        indices.sort_by_key(|&i| (records[i].local.start, records[i].local.length));
        for pair in indices.windows(2) {
            let next_start = records[pair[1]].local.start;
            let local = &mut records[pair[0]].local;
            if local.end() > next_start {
                local.length = next_start.saturating_sub(local.start);
            }
        }
    }
}

/// Stack temporaries that survived the patterns become ordinary variables without a slot.
fn convert_temps(ir: &mut MethodIr) {
    let mut uses: FxHashMap<TempId, Vec<ExprId>> = FxHashMap::default();
    let mut first_offset: FxHashMap<TempId, u32> = FxHashMap::default();
    for stmt in &ir.stmts {
        for root in stmt.exprs() {
            ir.arena.walk(root, &mut |id, expr| {
                if let Expr::Temp(temp) = expr {
                    uses.entry(*temp).or_default().push(id);
                    first_offset.entry(*temp).or_insert(stmt.offset);
                }
            });
        }
    }
    let mut temps: Vec<TempId> = uses.keys().copied().collect();
    temps.sort();
    for temp in temps {
        let var = VarId(ir.arena.locals.len() as u32);
        let start = first_offset.get(&temp).copied().unwrap_or(0);
        ir.arena.locals.push(LocalVariable {
            slot: None,
            start,
            length: ir.code_len.saturating_sub(start),
            ty: VarType::Undefined,
            name: String::new(),
            flags: LocalFlags::empty(),
        });
        for id in &uses[&temp] {
            ir.arena.replace(*id, Expr::Var(var));
        }
    }
}

fn mark_exception_variables(ir: &mut MethodIr) {
    let mut marked = Vec::new();
    for stmt in &ir.stmts {
        if let StmtKind::Assign { target, value } = stmt.kind
            && matches!(ir.arena[value], Expr::CaughtException)
            && let Expr::Var(var) = ir.arena[target]
        {
            let mut types: Vec<Type> = ir
                .exception_table
                .iter()
                .filter(|entry| entry.handler == stmt.offset)
                .map(|entry| Type::object(entry.catch_type.as_deref().unwrap_or("java/lang/Throwable")))
                .collect();
            types.dedup();
            let ty = if types.len() == 1 {
                types.remove(0)
            } else {
                Type::object("java/lang/Throwable")
            };
            marked.push((var, ty));
        }
    }
    for (var, ty) in marked {
        let local = &mut ir.arena.locals[var.0 as usize];
        local.flags |= LocalFlags::EXCEPTION;
        if !local.flags.contains(LocalFlags::DEBUG_INFO) {
            local.ty = VarType::Resolved(ty);
        }
    }
}

/// Joins the types of the values stored into each untyped variable. Disagreeing stores make the
/// variable an `Object`.
fn infer_reference_types(ir: &mut MethodIr, config: &Config) {
    let undefined: FxHashSet<VarId> = ir
        .arena
        .locals
        .iter()
        .enumerate()
        .filter(|(_, local)| local.ty == VarType::Undefined)
        .map(|(i, _)| VarId(i as u32))
        .collect();

    for iteration in 0..config.max_type_iterations {
        let mut stores: Vec<(VarId, ExprId)> = Vec::new();
        for_each_store(ir, |target, value, _| {
            if let Expr::Var(var) = ir.arena[target]
                && undefined.contains(&var)
            {
                stores.push((var, value));
            }
        });

        let mut changed = false;
        for (var, value) in stores {
            let current = ir.arena.locals[var.0 as usize].ty.clone();
            let next = match (current, ir.arena.type_of(value)) {
                (current, None) => current,
                (VarType::Undefined, Some(ty)) => match ty.as_primitive() {
                    Some(primitive) if primitive.is_int_like() => VarType::Ints(IntSet::all()),
                    _ => VarType::Resolved(ty),
                },
                (VarType::Resolved(old), Some(ty)) if old != ty => {
                    if old.is_reference() && ty.is_reference() {
                        VarType::Object
                    } else {
                        VarType::Resolved(old)
                    }
                }
                (current, Some(_)) => current,
            };
            if next != ir.arena.locals[var.0 as usize].ty {
                ir.arena.locals[var.0 as usize].ty = next;
                changed = true;
            }
        }
        if !changed {
            log::trace!("Reference types converged after {} iterations", iteration + 1);
            break;
        }
    }

    for var in undefined {
        let local = &mut ir.arena.locals[var.0 as usize];
        if local.ty == VarType::Undefined {
            local.ty = VarType::Object;
        }
    }
}

/// Wraps the expression at `id` in a cast, in place.
fn wrap_cast(arena: &mut Arena, id: ExprId, to: Type) {
    let inner = arena.alloc(arena[id].clone());
    arena.replace(id, Expr::Cast { value: inner, to });
}

/// Variables widened to `Object` lose the static type their users rely on; give it back with
/// casts.
fn insert_casts(ir: &mut MethodIr) {
    let is_widened = |arena: &Arena, id: ExprId| match arena[id] {
        Expr::Var(var) => arena.locals[var.0 as usize].ty == VarType::Object,
        _ => false,
    };
    let needs = |ty: &Type| ty.is_reference() && *ty != Type::java_lang_object();

    let mut casts: Vec<(ExprId, Type)> = Vec::new();
    for stmt in &ir.stmts {
        for root in stmt.exprs() {
            ir.arena.walk(root, &mut |_, expr| match expr {
                Expr::Call {
                    class,
                    descriptor,
                    kind,
                    arguments,
                    ..
                } => {
                    if let Some(object) = kind.object()
                        && is_widened(&ir.arena, object)
                    {
                        casts.push((object, Type::object(class)));
                    }
                    if let Ok(descriptor) = MethodDescriptor::parse(descriptor) {
                        for (argument, parameter) in arguments.iter().zip(descriptor.parameters) {
                            if is_widened(&ir.arena, *argument) && needs(&parameter) {
                                casts.push((*argument, parameter));
                            }
                        }
                    }
                }
                Expr::Field {
                    object: Some(object),
                    class,
                    ..
                } if is_widened(&ir.arena, *object) => {
                    casts.push((*object, Type::object(class)));
                }
                _ => {}
            });
        }
        match stmt.kind {
            StmtKind::Assign { target, value } if is_widened(&ir.arena, value) => {
                if let Some(ty) = ir.arena.type_of(target).filter(|ty| needs(ty)) {
                    casts.push((value, ty));
                }
            }
            StmtKind::Return(Some(value))
                if is_widened(&ir.arena, value) && needs(&ir.descriptor.return_type) =>
            {
                casts.push((value, ir.descriptor.return_type.clone()));
            }
            _ => {}
        }
    }
    casts.retain(|(_, ty)| needs(ty));
    for (id, ty) in casts {
        wrap_cast(&mut ir.arena, id, ty);
    }
}

/// A variable for a catch clause whose exception is never stored.
pub fn placeholder(arena: &mut Arena, ty: &Type) -> VarId {
    let mut table = NameTable::new(&arena.locals);
    let name = table.for_type(Some(ty), true);
    arena.locals.push(LocalVariable {
        slot: None,
        start: 0,
        length: 0,
        ty: VarType::Resolved(ty.clone()),
        name,
        flags: LocalFlags::EXCEPTION | LocalFlags::PLACEHOLDER,
    });
    VarId(arena.locals.len() as u32 - 1)
}

/// Names for the parameters of a method whose body isn't available.
pub fn parameter_names(types: &[Type]) -> Vec<String> {
    let mut locals: Vec<LocalVariable> = types
        .iter()
        .map(|ty| LocalVariable {
            slot: None,
            start: 0,
            length: 0,
            ty: VarType::Resolved(ty.clone()),
            name: String::new(),
            flags: LocalFlags::PARAMETER,
        })
        .collect();
    names::assign(&mut locals);
    locals.into_iter().map(|local| local.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_method;
    use crate::model::{MethodAccessFlags, PoolBuilder};
    use crate::testing::{CodeBuilder, class, method, op};
    use proptest::prelude::*;

    fn reconstructed(
        descriptor: &str,
        max_locals: u16,
        assemble: impl FnOnce(&mut CodeBuilder<'_>),
    ) -> MethodIr {
        let mut pool = PoolBuilder::new();
        let code = {
            let mut builder = CodeBuilder::new(&mut pool);
            assemble(&mut builder);
            builder.build(max_locals)
        };
        let m = method("f", descriptor, MethodAccessFlags::STATIC, code);
        let class = class("Test", pool, vec![m.clone()]);
        let mut ir = build_method(&class, &m, m.code.as_ref().unwrap()).unwrap();
        reconstruct(&mut ir, ParameterHints::default(), &Config::default());
        ir
    }

    fn local_named<'a>(ir: &'a MethodIr, name: &str) -> &'a LocalVariable {
        ir.arena
            .locals
            .iter()
            .find(|local| local.name == name)
            .unwrap_or_else(|| panic!("no local named {name}: {:?}", ir.arena.locals))
    }

    #[test]
    fn parameters_and_locals() {
        let ir = reconstructed("(ILjava/lang/String;)V", 3, |b| {
            b.iload(0).istore(2).op(op::RETURN);
        });
        assert_eq!(
            local_named(&ir, "paramInt").ty,
            VarType::Resolved(Type::INT)
        );
        assert!(local_named(&ir, "paramString").flags.contains(LocalFlags::PARAMETER));
        assert_eq!(local_named(&ir, "i").ty, VarType::Resolved(Type::INT));
    }

    #[test]
    fn boolean_from_uses() {
        // int x = 1; g(x) where g takes a boolean
        let ir = reconstructed("()V", 1, |b| {
            b.iconst(1)
                .istore(0)
                .iload(0)
                .invoke(op::INVOKESTATIC, "A", "g", "(Z)V")
                .op(op::RETURN);
        });
        assert_eq!(
            local_named(&ir, "bool").ty,
            VarType::Resolved(Type::BOOLEAN)
        );
    }

    #[test]
    fn char_from_assignment() {
        let ir = reconstructed("()C", 1, |b| {
            b.iconst(65).istore(0).iload(0).op(op::IRETURN);
        });
        assert_eq!(
            local_named(&ir, "c").ty,
            VarType::Resolved(Type::Primitive(PrimitiveType::Char))
        );
    }

    #[test]
    fn reused_slot_splits() {
        // int i = 0; String s = "a";  (same slot)
        let ir = reconstructed("()V", 1, |b| {
            b.iconst(0)
                .istore(0)
                .ldc_string("a")
                .astore(0)
                .op(op::RETURN);
        });
        let slot0: Vec<&LocalVariable> = ir
            .arena
            .locals
            .iter()
            .filter(|local| local.slot == Some(0))
            .collect();
        assert_eq!(slot0.len(), 2);
        assert!(slot0[0].end() <= slot0[1].start);
        assert_eq!(slot0[1].ty, VarType::Resolved(Type::object("java/lang/String")));
    }

    #[test]
    fn conflicting_references_get_casts() {
        // Object o = cond ? "a" : new Integer... modelled as two stores of unrelated types
        let ir = reconstructed("(Z)I", 2, |b| {
            b.iload(0)
                .jump(op::IFEQ, "else")
                .ldc_string("a")
                .astore(1)
                .jump(op::GOTO, "end")
                .label("else")
                .invoke(op::INVOKESTATIC, "A", "list", "()Ljava/util/List;")
                .astore(1)
                .label("end")
                .aload(1)
                .invoke(op::INVOKEVIRTUAL, "java/lang/String", "length", "()I")
                .op(op::IRETURN);
        });
        assert_eq!(local_named(&ir, "obj").ty, VarType::Object);
        let last = ir.stmts.last().unwrap();
        let rendered = ir.arena.debug(last).to_string();
        assert!(rendered.contains("(String) obj"), "{rendered}");
    }

    #[test]
    fn debug_names_win() {
        let ir = reconstructed("(I)I", 2, |b| {
            b.iload(0)
                .istore(1)
                .iload(1)
                .op(op::IRETURN)
                .local("count", "I", 0, 0, 6)
                .local("copy", "I", 1, 4, 3);
        });
        assert!(ir.arena.locals.iter().any(|local| local.name == "count"));
        assert!(ir.arena.locals.iter().any(|local| local.name == "copy"));
        assert_eq!(
            ir.arena.locals.iter().filter(|local| local.slot == Some(1)).count(),
            1
        );
    }

    #[test]
    fn exception_variable_type() {
        let ir = reconstructed("()V", 1, |b| {
            b.label("start")
                .invoke(op::INVOKESTATIC, "A", "f", "()V")
                .label("end")
                .op(op::RETURN)
                .label("handler")
                .astore(0)
                .op(op::RETURN)
                .try_catch("start", "end", "handler", Some("java/io/IOException"));
        });
        let local = local_named(&ir, "iOException");
        assert!(local.flags.contains(LocalFlags::EXCEPTION));
    }

    #[derive(Clone, Debug)]
    enum Step {
        StoreInt(u8),
        StoreRef(u8),
        LoadInt(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4).prop_map(Step::StoreInt),
            (0u8..4).prop_map(Step::StoreRef),
            (0u8..4).prop_map(Step::LoadInt),
        ]
    }

    proptest! {
        #[test]
        fn slots_are_disjoint(steps in proptest::collection::vec(step(), 1..40)) {
            let ir = reconstructed("()V", 4, |b| {
                let mut is_int = [false; 4];
                for step in &steps {
                    match *step {
                        Step::StoreInt(slot) => {
                            b.iconst(slot as i32).istore(slot);
                            is_int[slot as usize] = true;
                        }
                        Step::StoreRef(slot) => {
                            b.op(op::ACONST_NULL).astore(slot);
                            is_int[slot as usize] = false;
                        }
                        Step::LoadInt(slot) => {
                            if is_int[slot as usize] {
                                b.iload(slot).op(op::POP);
                            }
                        }
                    }
                }
                b.op(op::RETURN);
            });
            let locals = &ir.arena.locals;
            for (i, a) in locals.iter().enumerate() {
                for b in &locals[i + 1..] {
                    if a.slot.is_some() && a.slot == b.slot {
                        prop_assert!(
                            a.end() <= b.start || b.end() <= a.start,
                            "{a:?} overlaps {b:?}"
                        );
                    }
                }
            }
        }
    }
}
