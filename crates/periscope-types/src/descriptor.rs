//! Type and member descriptors.
//!
//! A [`TypeDescriptor`] is the wire representation of a resolved target
//! type: its identity is `(assembly, full_name)` and it is immutable once
//! published. Member descriptors reference other types by full name only;
//! the referenced descriptors are materialised lazily by whoever holds
//! the type cache.

use serde::{Deserialize, Serialize};

/// A fully resolved target type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Namespace-qualified type name, e.g. `System.Collections.ArrayList`.
    pub full_name: String,
    /// Name of the defining assembly.
    pub assembly: String,
    /// Full name of the base type, if any.
    pub base_type: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    pub properties: Vec<PropertyDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub constructors: Vec<MethodDescriptor>,
    pub events: Vec<EventDescriptor>,
    /// True for enumeration types; members are carried as fields.
    pub is_enum: bool,
}

impl TypeDescriptor {
    /// The `(assembly, full_name)` identity of this descriptor.
    pub fn identity(&self) -> (&str, &str) {
        (&self.assembly, &self.full_name)
    }

    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find all method overloads sharing a name.
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodDescriptor> {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Find an event by name.
    pub fn event(&self, name: &str) -> Option<&EventDescriptor> {
        self.events.iter().find(|e| e.name == name)
    }
}

/// A field of a target type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Full name of the field's type.
    pub type_name: String,
    pub is_static: bool,
}

/// A property of a target type.
///
/// Accessors are cross-references into the declaring type's method list,
/// resolved after all methods of that type are known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub type_name: String,
    /// Name of the `get` accessor method, when readable.
    pub getter: Option<String>,
    /// Name of the `set` accessor method, when writable.
    pub setter: Option<String>,
}

/// A method or constructor of a target type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    /// Full name of the return type; `System.Void` for void methods.
    pub return_type: String,
    pub parameters: Vec<ParameterDescriptor>,
    /// Number of generic type parameters; zero for non-generic methods.
    pub generic_arity: u32,
    pub is_static: bool,
}

impl MethodDescriptor {
    /// Render the signature for diagnostics, e.g. `Add(System.Int32, System.Int32)`.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.parameters.iter().map(|p| p.type_name.as_str()).collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// A single method parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub type_name: String,
}

/// An event of a target type, with its accessor cross-references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    /// Full name of the event's delegate type.
    pub delegate_type: String,
    pub add_method: Option<String>,
    pub remove_method: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_type() -> TypeDescriptor {
        TypeDescriptor {
            full_name: "Demo.Counter".to_string(),
            assembly: "Demo".to_string(),
            base_type: Some("System.Object".to_string()),
            fields: vec![FieldDescriptor {
                name: "count".to_string(),
                type_name: "System.Int32".to_string(),
                is_static: false,
            }],
            properties: vec![PropertyDescriptor {
                name: "Count".to_string(),
                type_name: "System.Int32".to_string(),
                getter: Some("get_Count".to_string()),
                setter: None,
            }],
            methods: vec![
                MethodDescriptor {
                    name: "Add".to_string(),
                    return_type: "System.Int32".to_string(),
                    parameters: vec![ParameterDescriptor {
                        name: "delta".to_string(),
                        type_name: "System.Int32".to_string(),
                    }],
                    generic_arity: 0,
                    is_static: false,
                },
                MethodDescriptor {
                    name: "Add".to_string(),
                    return_type: "System.Int32".to_string(),
                    parameters: vec![
                        ParameterDescriptor {
                            name: "a".to_string(),
                            type_name: "System.Int32".to_string(),
                        },
                        ParameterDescriptor {
                            name: "b".to_string(),
                            type_name: "System.Int32".to_string(),
                        },
                    ],
                    generic_arity: 0,
                    is_static: false,
                },
            ],
            constructors: vec![],
            events: vec![],
            is_enum: false,
        }
    }

    #[test]
    fn test_identity() {
        let ty = sample_type();
        assert_eq!(ty.identity(), ("Demo", "Demo.Counter"));
    }

    #[test]
    fn test_member_lookup() {
        let ty = sample_type();
        assert!(ty.field("count").is_some());
        assert!(ty.field("missing").is_none());
        assert!(ty.property("Count").is_some());
        assert_eq!(ty.methods_named("Add").count(), 2);
    }

    #[test]
    fn test_method_signature() {
        let ty = sample_type();
        let sigs: Vec<String> = ty.methods_named("Add").map(|m| m.signature()).collect();
        assert!(sigs.contains(&"Add(System.Int32)".to_string()));
        assert!(sigs.contains(&"Add(System.Int32, System.Int32)".to_string()));
    }
}
