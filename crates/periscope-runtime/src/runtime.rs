//! The runtime core: loaded assemblies, type resolution, dispatch.
//!
//! [`RuntimeCore`] owns the heap, the class registry, the event
//! registry, and the interceptor registry. Type resolution searches
//! assemblies in load order and is backed by a two-level cache keyed by
//! `(assembly, full name)`. Method tables and method slots are assigned
//! at load time and stay stable for the runtime's lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use periscope_types::descriptor::{
    EventDescriptor, FieldDescriptor, MethodDescriptor, ParameterDescriptor, PropertyDescriptor,
    TypeDescriptor,
};
use periscope_types::{HookPosition, MethodTable};

use crate::class::{AssemblyDef, CallContext, ClassDef, MethodDef, MethodSlot};
use crate::events::{EventHandler, EventRegistry, HandlerId};
use crate::heap::{Heap, HeapSnapshot};
use crate::intercept::{
    InterceptEvent, InterceptRegistry, InterceptorFn, InterceptorId, MAX_HOOK_ARITY,
};
use crate::value::{ObjectId, Value};
use crate::{Result, RuntimeError};

/// Universal implicit base type.
pub const OBJECT_TYPE: &str = "System.Object";

/// First method table handed out.
const METHOD_TABLE_BASE: MethodTable = 0x0600_0000;

/// Whether a slot refers to a regular method or a constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MethodKind {
    Method,
    Ctor,
}

/// A class after loading: definition plus assigned identities.
pub struct LoadedClass {
    pub assembly: String,
    pub def: ClassDef,
    pub method_table: MethodTable,
    /// Slots parallel to `def.methods`.
    pub method_slots: Vec<MethodSlot>,
    /// Slots parallel to `def.constructors`.
    pub ctor_slots: Vec<MethodSlot>,
    /// Static field storage.
    pub statics: HashMap<String, Value>,
}

impl LoadedClass {
    pub fn full_name(&self) -> &str {
        &self.def.full_name
    }
}

/// The runtime: the world an agent attaches to.
pub struct RuntimeCore {
    domain_name: String,
    /// Assembly names in load order.
    assemblies: Vec<String>,
    classes: Vec<LoadedClass>,
    /// Two-level resolution cache: assembly name, then full name.
    by_assembly: HashMap<String, HashMap<String, usize>>,
    /// Full name to candidate classes in assembly load order.
    by_name: HashMap<String, Vec<usize>>,
    by_method_table: HashMap<MethodTable, usize>,
    methods: HashMap<MethodSlot, (usize, MethodKind, usize)>,
    next_slot: u64,
    next_method_table: MethodTable,
    pub heap: Heap,
    interceptors: InterceptRegistry,
    events: EventRegistry,
}

impl RuntimeCore {
    pub fn new(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            assemblies: Vec::new(),
            classes: Vec::new(),
            by_assembly: HashMap::new(),
            by_name: HashMap::new(),
            by_method_table: HashMap::new(),
            methods: HashMap::new(),
            next_slot: 0,
            next_method_table: METHOD_TABLE_BASE,
            heap: Heap::new(),
            interceptors: InterceptRegistry::new(),
            events: EventRegistry::new(),
        }
    }

    // -----------------------------------------------------------------
    // Loading and resolution
    // -----------------------------------------------------------------

    /// Load an assembly, assigning method tables and method slots.
    pub fn load_assembly(&mut self, assembly: AssemblyDef) -> Result<()> {
        if self.by_assembly.contains_key(&assembly.name) {
            return Err(RuntimeError::Internal(format!(
                "assembly '{}' is already loaded",
                assembly.name
            )));
        }

        let mut names = HashMap::new();
        for class in assembly.classes {
            let class_idx = self.classes.len();
            if names.contains_key(&class.full_name) {
                return Err(RuntimeError::Internal(format!(
                    "type '{}' defined twice in assembly '{}'",
                    class.full_name, assembly.name
                )));
            }

            let method_table = self.next_method_table;
            self.next_method_table += 0x58;

            let method_slots: Vec<MethodSlot> = class
                .methods
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    self.next_slot += 1;
                    let slot = MethodSlot(self.next_slot);
                    self.methods.insert(slot, (class_idx, MethodKind::Method, i));
                    slot
                })
                .collect();
            let ctor_slots: Vec<MethodSlot> = class
                .constructors
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    self.next_slot += 1;
                    let slot = MethodSlot(self.next_slot);
                    self.methods.insert(slot, (class_idx, MethodKind::Ctor, i));
                    slot
                })
                .collect();

            let statics = class
                .fields
                .iter()
                .filter(|f| f.is_static)
                .map(|f| (f.name.clone(), f.initial.clone()))
                .collect();

            names.insert(class.full_name.clone(), class_idx);
            self.by_name
                .entry(class.full_name.clone())
                .or_default()
                .push(class_idx);
            self.by_method_table.insert(method_table, class_idx);
            self.classes.push(LoadedClass {
                assembly: assembly.name.clone(),
                def: class,
                method_table,
                method_slots,
                ctor_slots,
                statics,
            });
        }

        tracing::debug!(
            assembly = %assembly.name,
            types = names.len(),
            "assembly loaded"
        );
        self.by_assembly.insert(assembly.name.clone(), names);
        self.assemblies.push(assembly.name);
        Ok(())
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Loaded assembly names, in load order.
    pub fn assemblies(&self) -> &[String] {
        &self.assemblies
    }

    /// Full names of every type in one assembly.
    pub fn types_in(&self, assembly: &str) -> Result<Vec<String>> {
        let names = self
            .by_assembly
            .get(assembly)
            .ok_or_else(|| RuntimeError::TypeNotFound("*".to_string(), format!("assembly '{assembly}'")))?;
        let mut types: Vec<String> = names.keys().cloned().collect();
        types.sort();
        Ok(types)
    }

    /// Resolve a type by full name, optionally scoped to one assembly.
    ///
    /// Unscoped resolution searches assemblies in load order; the first
    /// exact match wins.
    pub fn resolve(&self, full_name: &str, assembly: Option<&str>) -> Result<&LoadedClass> {
        self.resolve_idx(full_name, assembly)
            .map(|idx| &self.classes[idx])
    }

    fn resolve_idx(&self, full_name: &str, assembly: Option<&str>) -> Result<usize> {
        match assembly {
            Some(asm) => self
                .by_assembly
                .get(asm)
                .and_then(|names| names.get(full_name))
                .copied()
                .ok_or_else(|| {
                    RuntimeError::TypeNotFound(full_name.to_string(), format!("assembly '{asm}'"))
                }),
            None => self
                .by_name
                .get(full_name)
                .and_then(|candidates| candidates.first())
                .copied()
                .ok_or_else(|| {
                    RuntimeError::TypeNotFound(full_name.to_string(), "any loaded assembly".to_string())
                }),
        }
    }

    pub fn class_by_method_table(&self, method_table: MethodTable) -> Option<&LoadedClass> {
        self.by_method_table
            .get(&method_table)
            .map(|idx| &self.classes[*idx])
    }

    /// The base class of `class`, when it has one and it is loaded.
    pub fn base_of(&self, class: &LoadedClass) -> Option<&LoadedClass> {
        let base_name = class.def.base.as_deref()?;
        self.resolve(base_name, None).ok()
    }

    /// True when a value of type `from` is acceptable where `to` is
    /// expected: identical names, a base-chain walk, or anything into
    /// `System.Object`.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if from == to || to == OBJECT_TYPE {
            return true;
        }
        let mut current = match self.resolve(from, None) {
            Ok(class) => Some(class),
            Err(_) => return false,
        };
        while let Some(class) = current {
            match class.def.base.as_deref() {
                Some(base) if base == to => return true,
                Some(_) => current = self.base_of(class),
                None => return false,
            }
        }
        false
    }

    // -----------------------------------------------------------------
    // Descriptors
    // -----------------------------------------------------------------

    /// Build the published descriptor for a type.
    ///
    /// Descriptors carry the type's own members only; consumers walk
    /// `base_type` for inherited ones. Generic method parameters appear
    /// as stub type names until bound at a call site.
    pub fn describe(&self, full_name: &str, assembly: Option<&str>) -> Result<TypeDescriptor> {
        let class = self.resolve(full_name, assembly)?;
        let def = &class.def;

        let describe_method = |m: &MethodDef| MethodDescriptor {
            name: m.name.clone(),
            return_type: m.return_type.clone(),
            parameters: m
                .parameters
                .iter()
                .map(|(name, ty)| ParameterDescriptor {
                    name: name.clone(),
                    type_name: ty.clone(),
                })
                .collect(),
            generic_arity: m.generic_params.len() as u32,
            is_static: m.is_static,
        };

        Ok(TypeDescriptor {
            full_name: def.full_name.clone(),
            assembly: class.assembly.clone(),
            base_type: def.base.clone(),
            fields: def
                .fields
                .iter()
                .map(|f| FieldDescriptor {
                    name: f.name.clone(),
                    type_name: f.type_name.clone(),
                    is_static: f.is_static,
                })
                .chain(def.enum_members.iter().map(|(name, _)| FieldDescriptor {
                    name: name.clone(),
                    type_name: def.full_name.clone(),
                    is_static: true,
                }))
                .collect(),
            properties: def
                .properties
                .iter()
                .map(|p| PropertyDescriptor {
                    name: p.name.clone(),
                    type_name: p.type_name.clone(),
                    getter: p.getter.clone(),
                    setter: p.setter.clone(),
                })
                .collect(),
            methods: def.methods.iter().map(describe_method).collect(),
            constructors: def.constructors.iter().map(describe_method).collect(),
            events: def
                .events
                .iter()
                .map(|e| EventDescriptor {
                    name: e.name.clone(),
                    delegate_type: e.delegate_type.clone(),
                    add_method: Some(format!("add_{}", e.name)),
                    remove_method: Some(format!("remove_{}", e.name)),
                })
                .collect(),
            is_enum: def.is_enum,
        })
    }

    // -----------------------------------------------------------------
    // Enums
    // -----------------------------------------------------------------

    pub fn is_enum(&self, full_name: &str) -> bool {
        self.resolve(full_name, None)
            .map(|class| class.def.is_enum)
            .unwrap_or(false)
    }

    /// Resolve an enum member to its numeric value.
    pub fn enum_member_value(&self, enum_type: &str, member: &str) -> Result<i64> {
        let class = self.resolve(enum_type, None)?;
        class
            .def
            .enum_members
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, value)| *value)
            .ok_or_else(|| RuntimeError::MemberNotFound {
                kind: "enum member",
                name: member.to_string(),
                type_name: enum_type.to_string(),
            })
    }

    // -----------------------------------------------------------------
    // Objects and fields
    // -----------------------------------------------------------------

    /// Allocate an instance with default field values (base chain included).
    pub fn new_instance(&mut self, full_name: &str, assembly: Option<&str>) -> Result<ObjectId> {
        let idx = self.resolve_idx(full_name, assembly)?;
        let mut fields = HashMap::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            let class = &self.classes[i];
            for field in class.def.fields.iter().filter(|f| !f.is_static) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| field.initial.clone());
            }
            current = class
                .def
                .base
                .as_deref()
                .and_then(|base| self.resolve_idx(base, None).ok());
        }
        let class = &self.classes[idx];
        let type_name = class.def.full_name.clone();
        let method_table = class.method_table;
        Ok(self.heap.alloc(type_name, method_table, fields))
    }

    /// The concrete type name of a live object.
    pub fn type_of(&self, id: ObjectId) -> Result<&str> {
        self.heap.get(id).map(|slot| slot.type_name.as_str())
    }

    pub fn get_instance_field(&self, id: ObjectId, field: &str) -> Result<Value> {
        let slot = self.heap.get(id)?;
        slot.fields
            .get(field)
            .cloned()
            .ok_or_else(|| RuntimeError::MemberNotFound {
                kind: "field",
                name: field.to_string(),
                type_name: slot.type_name.clone(),
            })
    }

    pub fn set_instance_field(&mut self, id: ObjectId, field: &str, value: Value) -> Result<()> {
        let slot = self.heap.get_mut(id)?;
        match slot.fields.get_mut(field) {
            Some(existing) => {
                *existing = value;
                Ok(())
            }
            None => Err(RuntimeError::MemberNotFound {
                kind: "field",
                name: field.to_string(),
                type_name: slot.type_name.clone(),
            }),
        }
    }

    pub fn get_static_field(&self, full_name: &str, field: &str) -> Result<Value> {
        let class = self.resolve(full_name, None)?;
        class
            .statics
            .get(field)
            .cloned()
            .ok_or_else(|| RuntimeError::MemberNotFound {
                kind: "static field",
                name: field.to_string(),
                type_name: full_name.to_string(),
            })
    }

    pub fn set_static_field(&mut self, full_name: &str, field: &str, value: Value) -> Result<()> {
        let idx = self.resolve_idx(full_name, None)?;
        let class = &mut self.classes[idx];
        match class.statics.get_mut(field) {
            Some(existing) => {
                *existing = value;
                Ok(())
            }
            None => Err(RuntimeError::MemberNotFound {
                kind: "static field",
                name: field.to_string(),
                type_name: full_name.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------

    /// The definition behind a slot.
    pub fn method_def(&self, slot: MethodSlot) -> Result<&MethodDef> {
        let (class_idx, kind, index) = *self
            .methods
            .get(&slot)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown method slot {slot:?}")))?;
        let class = &self.classes[class_idx];
        Ok(match kind {
            MethodKind::Method => &class.def.methods[index],
            MethodKind::Ctor => &class.def.constructors[index],
        })
    }

    /// The class a slot is declared on.
    pub fn declaring_class(&self, slot: MethodSlot) -> Result<&LoadedClass> {
        let (class_idx, _, _) = *self
            .methods
            .get(&slot)
            .ok_or_else(|| RuntimeError::Internal(format!("unknown method slot {slot:?}")))?;
        Ok(&self.classes[class_idx])
    }

    /// Invoke a method slot: prefix interceptors, the body, then postfix
    /// on success and finalizer on every exit.
    pub fn invoke_slot(
        &mut self,
        slot: MethodSlot,
        instance: Option<ObjectId>,
        args: Vec<Value>,
        generic_args: Vec<String>,
    ) -> Result<Value> {
        let def = self.method_def(slot)?.clone();
        if args.len() != def.parameters.len() {
            return Err(RuntimeError::InvalidArguments(format!(
                "{} expects {} argument(s), got {}",
                def.name,
                def.parameters.len(),
                args.len()
            )));
        }
        if generic_args.len() != def.generic_params.len() {
            return Err(RuntimeError::InvalidArguments(format!(
                "{} expects {} generic argument(s), got {}",
                def.name,
                def.generic_params.len(),
                generic_args.len()
            )));
        }

        let observed_args = observable_args(&def, &args);
        self.fire_interceptors(slot, HookPosition::Prefix, instance, &observed_args);

        let body = Arc::clone(&def.body);
        let outcome = body.as_ref()(
            self,
            CallContext {
                instance,
                args,
                generic_args,
            },
        );

        if outcome.is_ok() {
            self.fire_interceptors(slot, HookPosition::Postfix, instance, &observed_args);
        }
        self.fire_interceptors(slot, HookPosition::Finalizer, instance, &observed_args);
        outcome
    }

    fn fire_interceptors(
        &mut self,
        slot: MethodSlot,
        position: HookPosition,
        instance: Option<ObjectId>,
        args: &[Value],
    ) {
        let callbacks = self.interceptors.callbacks(slot, position);
        for callback in callbacks {
            callback.as_ref()(InterceptEvent {
                method: slot,
                position,
                instance,
                args: args.to_vec(),
            });
        }
    }

    // -----------------------------------------------------------------
    // Interceptors and events
    // -----------------------------------------------------------------

    /// Attach an interceptor to a method slot.
    pub fn hook(
        &mut self,
        slot: MethodSlot,
        position: HookPosition,
        callback: InterceptorFn,
    ) -> Result<InterceptorId> {
        let def = self.method_def(slot)?;
        if def.arity() > MAX_HOOK_ARITY {
            return Err(RuntimeError::InvalidArguments(format!(
                "cannot hook '{}': arity {} exceeds the interceptor ceiling of {MAX_HOOK_ARITY}",
                def.name,
                def.arity()
            )));
        }
        Ok(self.interceptors.register(slot, position, callback))
    }

    /// Detach one interceptor registration.
    pub fn unhook(&mut self, id: InterceptorId) -> bool {
        self.interceptors.remove(id)
    }

    pub fn is_hooked(&self, slot: MethodSlot) -> bool {
        self.interceptors.is_hooked(slot)
    }

    /// Attach an event handler, validating the event exists on the
    /// object's class chain.
    pub fn add_event_handler(
        &mut self,
        object: ObjectId,
        event: &str,
        handler: EventHandler,
    ) -> Result<HandlerId> {
        let type_name = self.type_of(object)?.to_string();
        let mut current = self.resolve(&type_name, None).ok();
        let mut found = false;
        while let Some(class) = current {
            if class.def.events.iter().any(|e| e.name == event) {
                found = true;
                break;
            }
            current = self.base_of(class);
        }
        if !found {
            return Err(RuntimeError::MemberNotFound {
                kind: "event",
                name: event.to_string(),
                type_name,
            });
        }
        Ok(self.events.add(object, event, handler))
    }

    pub fn remove_event_handler(&mut self, id: HandlerId) -> bool {
        self.events.remove(id)
    }

    /// Raise an event from a method body: call every attached handler
    /// with `(sender, args)`.
    pub fn raise_event(&mut self, sender: ObjectId, event: &str, args: Value) {
        let handlers = self.events.handlers_for(sender, event);
        for handler in handlers {
            handler.as_ref()(sender, args.clone());
        }
    }

    // -----------------------------------------------------------------
    // Heap operations
    // -----------------------------------------------------------------

    pub fn snapshot(&self) -> HeapSnapshot {
        self.heap.snapshot()
    }

    /// Run a collection using static object fields as extra roots.
    pub fn collect(&mut self) -> usize {
        let mut extra = Vec::new();
        for class in &self.classes {
            for value in class.statics.values() {
                if let Value::Object(id) = value {
                    extra.push(*id);
                }
            }
        }
        let reclaimed = self.heap.collect(&extra);
        self.events_gc();
        tracing::debug!(reclaimed, generation = self.heap.generation(), "collection finished");
        reclaimed
    }

    /// Drop event handlers whose subject died.
    fn events_gc(&mut self) {
        let dead: Vec<ObjectId> = self
            .events
            .subjects()
            .filter(|id| !self.heap.contains(*id))
            .collect();
        for id in dead {
            self.events.remove_for_object(id);
        }
    }
}

/// Replace by-ref arguments (declared with a `&` suffix) with the poison
/// sentinel before exposing them to interceptors.
fn observable_args(def: &MethodDef, args: &[Value]) -> Vec<Value> {
    def.parameters
        .iter()
        .zip(args.iter())
        .map(|((_, type_name), value)| {
            if type_name.ends_with('&') {
                Value::Sentinel
            } else {
                value.clone()
            }
        })
        .collect()
}
