//! Declaration headers: the `public final class A extends B` and `static int f(int paramInt)` lines
//! around the decompiled bodies.

use crate::context::ClassContext;
use crate::descriptor::{MethodDescriptor, Type, simple_class_name};
use crate::ir::Arena;
use crate::locals::{self, LocalFlags};
use crate::model::{ClassAccessFlags, ClassModel, FieldAccessFlags, FieldModel, MethodAccessFlags, MethodModel};

/// The name a class is declared under inside its parent.
pub fn declared_name(class: &ClassModel) -> String {
    let unqualified = class.name.rsplit('/').next().unwrap_or(&class.name);
    match class.own_link() {
        Some(link) => match &link.simple_name {
            Some(simple_name) => simple_name.clone(),
            // Anonymous classes have no name of their own.
            None => unqualified.to_owned(),
        },
        None => unqualified.rsplit('$').next().unwrap_or(unqualified).to_owned(),
    }
}

pub fn class_header(class: &ClassModel) -> String {
    // Nested classes keep their real modifiers in the `InnerClasses` row; the class's own flags
    // have `private`/`protected` widened and `static` dropped.
    let flags = class.own_link().map_or(class.access_flags, |link| link.access_flags);
    let is_interface = flags.contains(ClassAccessFlags::INTERFACE);
    let is_enum = flags.contains(ClassAccessFlags::ENUM);

    let mut words = Vec::new();
    for (flag, word) in [
        (ClassAccessFlags::PUBLIC, "public"),
        (ClassAccessFlags::PROTECTED, "protected"),
        (ClassAccessFlags::PRIVATE, "private"),
        (ClassAccessFlags::STATIC, "static"),
    ] {
        if flags.contains(flag) {
            words.push(word);
        }
    }
    if flags.contains(ClassAccessFlags::ABSTRACT) && !is_interface && !is_enum {
        words.push("abstract");
    }
    if flags.contains(ClassAccessFlags::FINAL) && !is_enum {
        words.push("final");
    }
    words.push(if flags.contains(ClassAccessFlags::ANNOTATION) {
        "@interface"
    } else if is_interface {
        "interface"
    } else if is_enum {
        "enum"
    } else {
        "class"
    });

    let mut header = format!("{} {}", words.join(" "), declared_name(class));
    let interfaces: Vec<String> = class.interfaces.iter().map(|name| simple_class_name(name)).collect();
    if is_interface {
        if !interfaces.is_empty() && !flags.contains(ClassAccessFlags::ANNOTATION) {
            header.push_str(&format!(" extends {}", interfaces.join(", ")));
        }
    } else {
        let implicit_super = if is_enum { "java/lang/Enum" } else { "java/lang/Object" };
        if let Some(super_name) = class.super_name.as_deref()
            && super_name != implicit_super
        {
            header.push_str(&format!(" extends {}", simple_class_name(super_name)));
        }
        if !interfaces.is_empty() {
            header.push_str(&format!(" implements {}", interfaces.join(", ")));
        }
    }
    header
}

/// `private static final int X = 5;`. `initializer` is the rendered initial value, if any.
pub fn field_declaration(field: &FieldModel, initializer: Option<&str>) -> String {
    let mut words = Vec::new();
    for (flag, word) in [
        (FieldAccessFlags::PUBLIC, "public"),
        (FieldAccessFlags::PROTECTED, "protected"),
        (FieldAccessFlags::PRIVATE, "private"),
        (FieldAccessFlags::STATIC, "static"),
        (FieldAccessFlags::FINAL, "final"),
        (FieldAccessFlags::TRANSIENT, "transient"),
        (FieldAccessFlags::VOLATILE, "volatile"),
    ] {
        if field.access_flags.contains(flag) {
            words.push(word.to_owned());
        }
    }
    words.push(
        Type::parse(&field.descriptor).map_or_else(|_| field.descriptor.clone(), |ty| ty.to_string()),
    );
    words.push(field.name.clone());
    let mut text = words.join(" ");
    if let Some(initializer) = initializer {
        text.push_str(" = ");
        text.push_str(initializer);
    }
    text.push(';');
    text
}

fn method_modifiers(cx: &ClassContext<'_>, method: &MethodModel) -> Vec<&'static str> {
    let flags = method.access_flags;
    let in_interface = cx.class.is_interface();
    let mut words = Vec::new();
    for (flag, word) in [
        (MethodAccessFlags::PUBLIC, "public"),
        (MethodAccessFlags::PROTECTED, "protected"),
        (MethodAccessFlags::PRIVATE, "private"),
    ] {
        // Interface members are implicitly public, enum constructors implicitly private.
        let implicit = (in_interface && flag == MethodAccessFlags::PUBLIC)
            || (cx.info.is_enum && method.is_constructor() && flag == MethodAccessFlags::PRIVATE);
        if flags.contains(flag) && !implicit {
            words.push(word);
        }
    }
    if flags.contains(MethodAccessFlags::STATIC) {
        words.push("static");
    }
    if in_interface {
        if !flags.intersects(MethodAccessFlags::STATIC | MethodAccessFlags::ABSTRACT | MethodAccessFlags::PRIVATE) {
            words.push("default");
        }
    } else if flags.contains(MethodAccessFlags::ABSTRACT) {
        words.push("abstract");
    }
    for (flag, word) in [
        (MethodAccessFlags::FINAL, "final"),
        (MethodAccessFlags::SYNCHRONIZED, "synchronized"),
        (MethodAccessFlags::NATIVE, "native"),
        (MethodAccessFlags::STRICT, "strictfp"),
    ] {
        if flags.contains(flag) {
            words.push(word);
        }
    }
    words
}

/// How many leading parameters the compiler added to a constructor.
pub fn hidden_parameters(cx: &ClassContext<'_>, method: &MethodModel) -> usize {
    let hints = cx.parameter_hints(method);
    if hints.enum_constructor {
        2
    } else {
        usize::from(hints.outer_this)
    }
}

/// Parameter names in declaration order, hidden ones included.
fn parameter_names(
    cx: &ClassContext<'_>,
    method: &MethodModel,
    descriptor: &MethodDescriptor,
    arena: Option<&Arena>,
) -> Vec<(String, bool)> {
    if let Some(arena) = arena {
        let mut parameters: Vec<_> = arena
            .locals
            .iter()
            .filter(|local| local.flags.contains(LocalFlags::PARAMETER) && !local.flags.contains(LocalFlags::THIS))
            .collect();
        parameters.sort_by_key(|local| local.slot);
        if parameters.len() == descriptor.parameters.len() {
            return parameters
                .into_iter()
                .map(|local| (local.name.clone(), local.flags.contains(LocalFlags::SYNTHETIC)))
                .collect();
        }
    }

    let visible = descriptor
        .parameters
        .get(hidden_parameters(cx, method)..)
        .unwrap_or_default();
    let mut names = vec![(String::new(), true); descriptor.parameters.len() - visible.len()];
    names.extend(locals::parameter_names(visible).into_iter().map(|name| (name, false)));
    names
}

/// The header of a method declaration, without the opening brace or the trailing `;`.
///
/// `arena` is the arena of the decompiled body, so that the parameters are named the way the body
/// refers to them. Without one, names are made up from the types.
pub fn method_header(cx: &ClassContext<'_>, method: &MethodModel, arena: Option<&Arena>) -> String {
    if method.name == "<clinit>" {
        return "static".to_owned();
    }
    let Ok(descriptor) = MethodDescriptor::parse(&method.descriptor) else {
        return format!("{}{}", method.name, method.descriptor);
    };

    let mut words: Vec<String> = method_modifiers(cx, method).into_iter().map(str::to_owned).collect();
    if method.is_constructor() {
        words.push(declared_name(cx.class));
    } else {
        words.push(descriptor.return_type.to_string());
        words.push(method.name.clone());
    }

    let names = parameter_names(cx, method, &descriptor, arena);
    let count = descriptor.parameters.len();
    let mut parameters = Vec::new();
    for (index, (ty, (name, hidden))) in descriptor.parameters.iter().zip(names).enumerate() {
        if hidden {
            continue;
        }
        let is_varargs = index + 1 == count && method.access_flags.contains(MethodAccessFlags::VARARGS);
        let ty = match (is_varargs, ty.element_type()) {
            (true, Some(element)) => format!("{element}..."),
            _ => ty.to_string(),
        };
        parameters.push(format!("{ty} {name}"));
    }
    format!("{}({})", words.join(" "), parameters.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Analysis;
    use crate::model::{CodeModel, InnerClassLink, PoolBuilder};
    use crate::testing::{class, method};

    fn header_of(model: &ClassModel, index: usize) -> String {
        let analysis = Analysis::collect(model);
        let config = Config::default();
        let cx = ClassContext::new(model, &analysis, &config);
        method_header(&cx, &model.methods[index], None)
    }

    #[test]
    fn plain_method() {
        let model = class(
            "a/Test",
            PoolBuilder::new(),
            vec![
                method(
                    "max",
                    "(II)I",
                    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                    CodeModel::default(),
                ),
                method(
                    "format",
                    "(Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/String;",
                    MethodAccessFlags::PRIVATE | MethodAccessFlags::VARARGS,
                    CodeModel::default(),
                ),
            ],
        );
        assert_eq!(header_of(&model, 0), "public static int max(int paramInt1, int paramInt2)");
        assert_eq!(
            header_of(&model, 1),
            "private String format(String paramString, Object... paramArrayOfObject)"
        );
    }

    #[test]
    fn synthetic_constructor_parameters_are_hidden() {
        let mut inner = class(
            "a/Outer$Inner",
            PoolBuilder::new(),
            vec![method("<init>", "(La/Outer;I)V", MethodAccessFlags::empty(), CodeModel::default())],
        );
        inner.fields.push(FieldModel {
            access_flags: FieldAccessFlags::FINAL | FieldAccessFlags::SYNTHETIC,
            name: "this$0".to_owned(),
            descriptor: "La/Outer;".to_owned(),
            constant_value: None,
        });
        inner.inner_classes.push(InnerClassLink {
            inner: "a/Outer$Inner".to_owned(),
            outer: Some("a/Outer".to_owned()),
            simple_name: Some("Inner".to_owned()),
            access_flags: ClassAccessFlags::PRIVATE,
        });
        assert_eq!(header_of(&inner, 0), "Inner(int paramInt)");
        assert_eq!(class_header(&inner), "private class Inner");

        let mut color = class(
            "a/Color",
            PoolBuilder::new(),
            vec![method(
                "<init>",
                "(Ljava/lang/String;II)V",
                MethodAccessFlags::PRIVATE,
                CodeModel::default(),
            )],
        );
        color.access_flags |= ClassAccessFlags::ENUM | ClassAccessFlags::FINAL;
        color.super_name = Some("java/lang/Enum".to_owned());
        assert_eq!(header_of(&color, 0), "Color(int paramInt)");
        assert_eq!(class_header(&color), "public enum Color");
    }

    #[test]
    fn fields_and_class_headers() {
        let field = FieldModel {
            access_flags: FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
            name: "NAMES".to_owned(),
            descriptor: "[Ljava/lang/String;".to_owned(),
            constant_value: None,
        };
        assert_eq!(
            field_declaration(&field, Some("new String[0]")),
            "private static final String[] NAMES = new String[0];"
        );

        let mut model = class("a/List", PoolBuilder::new(), Vec::new());
        model.access_flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT;
        model.super_name = Some("a/Base".to_owned());
        model.interfaces = vec!["java/lang/Iterable".to_owned(), "a/Sized".to_owned()];
        assert_eq!(
            class_header(&model),
            "public abstract class List extends Base implements Iterable, Sized"
        );
    }
}
