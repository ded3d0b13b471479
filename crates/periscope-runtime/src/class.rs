//! Class, member, and assembly definitions.
//!
//! Hosted applications describe their world through builders: an
//! [`AssemblyDef`] holds [`ClassDef`]s, whose method bodies are native
//! closures over the runtime. Definitions are inert until loaded into a
//! [`RuntimeCore`](crate::runtime::RuntimeCore), which assigns method
//! slots and method tables.

use std::fmt;
use std::sync::Arc;

use crate::runtime::RuntimeCore;
use crate::value::{ObjectId, Value};
use crate::Result;

/// Identity of a loaded method, unique within one runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSlot(pub u64);

/// Invocation context passed to native method bodies.
pub struct CallContext {
    /// The receiver; `None` for static methods and constructors before
    /// allocation.
    pub instance: Option<ObjectId>,
    pub args: Vec<Value>,
    /// Bound generic arguments, in declaration order. Empty for
    /// non-generic methods.
    pub generic_args: Vec<String>,
}

/// A native method body.
pub type NativeFn = Arc<dyn Fn(&mut RuntimeCore, CallContext) -> Result<Value> + Send + Sync>;

/// A method or constructor definition.
#[derive(Clone)]
pub struct MethodDef {
    pub name: String,
    /// Full name of the return type; `System.Void` for void.
    pub return_type: String,
    /// `(parameter name, parameter type full name)` pairs.
    pub parameters: Vec<(String, String)>,
    /// Names of generic type parameters; these act as stub type names in
    /// `parameters` and `return_type` until bound at call time.
    pub generic_params: Vec<String>,
    pub is_static: bool,
    pub body: NativeFn,
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("return_type", &self.return_type)
            .field("parameters", &self.parameters)
            .field("generic_params", &self.generic_params)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

impl MethodDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: "System.Void".to_string(),
            parameters: Vec::new(),
            generic_params: Vec::new(),
            is_static: false,
            body: Arc::new(|_, _| Ok(Value::Null)),
        }
    }

    /// Constructor definitions use the conventional `.ctor` name.
    pub fn ctor() -> Self {
        Self::new(".ctor")
    }

    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push((name.into(), type_name.into()));
        self
    }

    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = type_name.into();
        self
    }

    pub fn generic(mut self, param: impl Into<String>) -> Self {
        self.generic_params.push(param.into());
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn body(
        mut self,
        body: impl Fn(&mut RuntimeCore, CallContext) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.body = Arc::new(body);
        self
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}

/// A field definition.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
    pub is_static: bool,
    /// Initial value for instance fields; current value for statics.
    pub initial: Value,
}

/// A property definition; accessors name methods of the declaring class.
#[derive(Clone, Debug)]
pub struct PropertyDef {
    pub name: String,
    pub type_name: String,
    pub getter: Option<String>,
    pub setter: Option<String>,
}

/// An event definition.
#[derive(Clone, Debug)]
pub struct EventDef {
    pub name: String,
    /// Full name of the delegate type the handlers must match.
    pub delegate_type: String,
}

/// A class (or enum) definition.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub full_name: String,
    pub base: Option<String>,
    pub fields: Vec<FieldDef>,
    pub properties: Vec<PropertyDef>,
    pub methods: Vec<MethodDef>,
    pub constructors: Vec<MethodDef>,
    pub events: Vec<EventDef>,
    pub is_enum: bool,
    /// `(member name, numeric value)` pairs for enums.
    pub enum_members: Vec<(String, i64)>,
}

impl ClassDef {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            base: Some("System.Object".to_string()),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            events: Vec::new(),
            is_enum: false,
            enum_members: Vec::new(),
        }
    }

    /// Define an enumeration type.
    pub fn new_enum(full_name: impl Into<String>) -> Self {
        let mut class = Self::new(full_name);
        class.base = Some("System.Enum".to_string());
        class.is_enum = true;
        class
    }

    pub fn base_type(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// A root class with no base.
    pub fn no_base(mut self) -> Self {
        self.base = None;
        self
    }

    pub fn field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            type_name: type_name.into(),
            is_static: false,
            initial: Value::Null,
        });
        self
    }

    pub fn field_with(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        initial: Value,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            type_name: type_name.into(),
            is_static: false,
            initial,
        });
        self
    }

    pub fn static_field(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        initial: Value,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            type_name: type_name.into(),
            is_static: true,
            initial,
        });
        self
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        getter: Option<&str>,
        setter: Option<&str>,
    ) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            type_name: type_name.into(),
            getter: getter.map(str::to_string),
            setter: setter.map(str::to_string),
        });
        self
    }

    pub fn method(mut self, def: MethodDef) -> Self {
        self.methods.push(def);
        self
    }

    pub fn constructor(mut self, def: MethodDef) -> Self {
        self.constructors.push(def);
        self
    }

    pub fn event(mut self, name: impl Into<String>, delegate_type: impl Into<String>) -> Self {
        self.events.push(EventDef {
            name: name.into(),
            delegate_type: delegate_type.into(),
        });
        self
    }

    pub fn enum_member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.enum_members.push((name.into(), value));
        self
    }
}

/// An assembly: a named bag of classes, loaded as a unit.
#[derive(Clone, Debug)]
pub struct AssemblyDef {
    pub name: String,
    pub classes: Vec<ClassDef>,
}

impl AssemblyDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn class(mut self, class: ClassDef) -> Self {
        self.classes.push(class);
        self
    }
}
