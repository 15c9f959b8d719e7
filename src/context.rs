//! Whole-class state shared by the per-method passes.
//!
//! Everything here is computed once, before any method is decompiled, and is read-only afterwards.
//! Nested classes are scanned before the classes enclosing them: an outer class calls accessors
//! defined by its inner classes and vice versa, and enum switches in the outer class read switch
//! maps stored in a synthetic inner class.

use crate::accessors::{AccessorRecord, ClassScan, MemberKey, SwitchMap, SwitchMapKey, scan_class};
use crate::config::Config;
use crate::locals::ParameterHints;
use crate::model::{ClassModel, FieldAccessFlags, MethodModel};
use rustc_hash::{FxHashMap, FxHashSet};

/// Facts about a class that its own methods and its neighbours' methods need.
#[derive(Clone, Debug, Default)]
pub struct ClassInfo {
    pub is_enum: bool,
    /// `this$0` and the class it points to, for non-static inner classes.
    pub outer_this: Option<(String, String)>,
    pub is_anonymous: bool,
}

/// Tables built by the pre-analysis over a tree of classes.
#[derive(Debug, Default)]
pub struct Analysis {
    pub accessors: FxHashMap<MemberKey, AccessorRecord>,
    pub switch_maps: FxHashMap<SwitchMapKey, SwitchMap>,
    pub classes: FxHashMap<String, ClassInfo>,
}

impl Analysis {
    /// Scans `root` and everything nested in it, innermost classes first.
    pub fn collect(root: &ClassModel) -> Self {
        let mut analysis = Self::default();
        analysis.visit(root);
        log::debug!(
            "Pre-analysis of {}: {} accessors, {} switch maps",
            root.name,
            analysis.accessors.len(),
            analysis.switch_maps.len()
        );
        analysis
    }

    fn visit(&mut self, class: &ClassModel) {
        for nested in &class.nested {
            self.visit(nested);
        }
        let ClassScan {
            accessors,
            switch_maps,
        } = scan_class(class);
        self.accessors.extend(accessors);
        self.switch_maps.extend(switch_maps);
        self.classes.insert(class.name.clone(), class_info(class));
    }

    pub fn accessor(&self, class: &str, name: &str, descriptor: &str) -> Option<&AccessorRecord> {
        self.accessors.get(&MemberKey::new(class, name, descriptor))
    }
}

fn class_info(class: &ClassModel) -> ClassInfo {
    let outer_this = class.outer_this_field().map(|field| {
        let outer = field
            .descriptor
            .strip_prefix('L')
            .and_then(|name| name.strip_suffix(';'))
            .unwrap_or("java/lang/Object")
            .to_owned();
        (field.name.clone(), outer)
    });
    ClassInfo {
        is_enum: class.is_enum(),
        outer_this,
        is_anonymous: class.own_link().is_some_and(|link| link.is_anonymous()),
    }
}

/// The view of one class that the per-method passes get.
pub struct ClassContext<'a> {
    pub class: &'a ClassModel,
    pub analysis: &'a Analysis,
    pub config: &'a Config,
    pub info: ClassInfo,
}

impl<'a> ClassContext<'a> {
    pub fn new(class: &'a ClassModel, analysis: &'a Analysis, config: &'a Config) -> Self {
        let info = analysis
            .classes
            .get(&class.name)
            .cloned()
            .unwrap_or_else(|| class_info(class));
        Self {
            class,
            analysis,
            config,
            info,
        }
    }

    pub fn parameter_hints(&self, method: &MethodModel) -> ParameterHints {
        let constructor = method.is_constructor();
        ParameterHints {
            enum_constructor: constructor && self.info.is_enum,
            outer_this: constructor && self.info.outer_this.is_some(),
        }
    }

    /// Whether the member is compiler-generated plumbing that isn't displayed.
    pub fn is_hidden_method(&self, method: &MethodModel) -> bool {
        if self.config.show_synthetic {
            return false;
        }
        let key = MemberKey::new(&self.class.name, &method.name, &method.descriptor);
        if self.analysis.accessors.contains_key(&key) {
            return true;
        }
        if method.name.starts_with("$SWITCH_TABLE$") {
            return self.analysis.switch_maps.contains_key(&SwitchMapKey::Method {
                class: self.class.name.clone(),
                name: method.name.clone(),
            });
        }
        if method.name == "class$" && method.descriptor == "(Ljava/lang/String;)Ljava/lang/Class;" {
            return true;
        }
        if self.info.is_enum {
            let enum_descriptor = format!("L{};", self.class.name);
            return match method.name.as_str() {
                "values" => method.descriptor == format!("()[{enum_descriptor}"),
                "valueOf" => method.descriptor == format!("(Ljava/lang/String;){enum_descriptor}"),
                "$values" => true,
                _ => false,
            };
        }
        false
    }

    pub fn is_hidden_field(&self, name: &str, access_flags: FieldAccessFlags) -> bool {
        if self.config.show_synthetic {
            return false;
        }
        if self
            .info
            .outer_this
            .as_ref()
            .is_some_and(|(field, _)| field == name)
        {
            return true;
        }
        let is_static_synthetic = access_flags.contains(FieldAccessFlags::STATIC)
            && access_flags.contains(FieldAccessFlags::SYNTHETIC);
        if name.starts_with("$SwitchMap$") || name.starts_with("$SWITCH_TABLE$") {
            return access_flags.contains(FieldAccessFlags::STATIC);
        }
        if name.starts_with("class$") {
            return access_flags.contains(FieldAccessFlags::STATIC);
        }
        (self.info.is_enum && name == "$VALUES") || (is_static_synthetic && name == "$assertionsDisabled")
    }

    /// Names of the enum constants declared by this class.
    pub fn enum_constants(&self) -> FxHashSet<&'a str> {
        if !self.info.is_enum {
            return FxHashSet::default();
        }
        self.class
            .fields
            .iter()
            .filter(|field| field.access_flags.contains(FieldAccessFlags::ENUM))
            .map(|field| field.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassAccessFlags, FieldModel, InnerClassLink, MethodAccessFlags, PoolBuilder};
    use crate::testing::{CodeBuilder, class, method, op};

    #[test]
    fn nested_accessors_are_visible_from_the_root() {
        let mut pool = PoolBuilder::new();
        let code = {
            let mut b = CodeBuilder::new(&mut pool);
            b.aload(0).field(op::GETFIELD, "Outer", "secret", "I").op(op::IRETURN);
            b.build(1)
        };
        let mut outer = class(
            "Outer",
            pool,
            vec![method("access$000", "(LOuter;)I", MethodAccessFlags::STATIC, code)],
        );
        let mut inner = class("Outer$Inner", PoolBuilder::new(), Vec::new());
        inner.fields.push(FieldModel {
            access_flags: FieldAccessFlags::FINAL | FieldAccessFlags::SYNTHETIC,
            name: "this$0".to_owned(),
            descriptor: "LOuter;".to_owned(),
            constant_value: None,
        });
        inner.inner_classes.push(InnerClassLink {
            inner: "Outer$Inner".to_owned(),
            outer: Some("Outer".to_owned()),
            simple_name: Some("Inner".to_owned()),
            access_flags: ClassAccessFlags::empty(),
        });
        outer.nested.push(inner);

        let analysis = Analysis::collect(&outer);
        assert!(analysis.accessor("Outer", "access$000", "(LOuter;)I").is_some());
        let info = &analysis.classes["Outer$Inner"];
        assert_eq!(
            info.outer_this,
            Some(("this$0".to_owned(), "Outer".to_owned()))
        );

        let config = Config::default();
        let cx = ClassContext::new(&outer, &analysis, &config);
        assert!(cx.is_hidden_method(&outer.methods[0]));
        let shown = Config {
            show_synthetic: true,
            ..Config::default()
        };
        let cx = ClassContext::new(&outer, &analysis, &shown);
        assert!(!cx.is_hidden_method(&outer.methods[0]));
    }
}
