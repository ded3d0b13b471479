//! The reflective dispatcher: member resolution and invocation.
//!
//! Resolution is recursive: a member missing on the requested type is
//! looked up on its base types to the root. Method overloads are
//! filtered by arity first, then matched with two comparators in order:
//! strict (argument type assignable to the parameter type) and
//! wildcard-aware (a null argument has no type and matches any
//! parameter). An exact unique match wins; ambiguity is an error rather
//! than a choice.

use periscope_runtime::class::{MethodDef, MethodSlot};
use periscope_runtime::runtime::{LoadedClass, RuntimeCore};
use periscope_runtime::value::Value;
use periscope_types::envelope::Fault;

use crate::snapshot::fault_from_runtime;

/// Where to look for overloads on a class.
#[derive(Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Method,
    Ctor,
}

/// Resolve a method by name, generic coordinate, and argument shapes.
pub fn resolve_method(
    rt: &RuntimeCore,
    type_full_name: &str,
    method: &str,
    generic_args: &[String],
    args: &[Value],
) -> Result<MethodSlot, Fault> {
    resolve_overload(rt, type_full_name, method, MemberKind::Method, generic_args, args)
}

/// Resolve a constructor by argument shapes.
pub fn resolve_ctor(
    rt: &RuntimeCore,
    type_full_name: &str,
    args: &[Value],
) -> Result<MethodSlot, Fault> {
    resolve_overload(rt, type_full_name, ".ctor", MemberKind::Ctor, &[], args)
}

/// Resolve a method overload by its exact parameter type list; used by
/// the hook engine, which selects by signature rather than arguments.
pub fn resolve_by_param_types(
    rt: &RuntimeCore,
    type_full_name: &str,
    method: &str,
    param_types: &[String],
) -> Result<MethodSlot, Fault> {
    let candidates = collect_candidates(rt, type_full_name, method, MemberKind::Method)?;
    let matched: Vec<&(MethodSlot, MethodDef)> = candidates
        .iter()
        .filter(|(_, def)| {
            def.parameters.len() == param_types.len()
                && def
                    .parameters
                    .iter()
                    .zip(param_types.iter())
                    .all(|((_, have), want)| have == want)
        })
        .collect();
    match matched.as_slice() {
        [(slot, _)] => Ok(*slot),
        [] => Err(not_found(type_full_name, method, param_types.len(), &candidates)),
        _ => Err(ambiguous(type_full_name, method, &matched)),
    }
}

/// Invoke a resolved slot, mapping runtime failures onto wire faults.
pub fn call(
    rt: &mut RuntimeCore,
    slot: MethodSlot,
    instance: Option<periscope_runtime::value::ObjectId>,
    args: Vec<Value>,
    generic_args: Vec<String>,
) -> Result<Value, Fault> {
    rt.invoke_slot(slot, instance, args, generic_args)
        .map_err(fault_from_runtime)
}

/// Find the class (walking bases) declaring a field, and whether it is
/// static.
pub fn resolve_field(
    rt: &RuntimeCore,
    type_full_name: &str,
    field: &str,
) -> Result<(String, bool), Fault> {
    let mut current = Some(resolve_class(rt, type_full_name)?);
    while let Some(class) = current {
        if let Some(def) = class.def.fields.iter().find(|f| f.name == field) {
            return Ok((class.full_name().to_string(), def.is_static));
        }
        if class.def.is_enum && class.def.enum_members.iter().any(|(name, _)| name == field) {
            // Enum members read as static fields of the enum type.
            return Ok((class.full_name().to_string(), true));
        }
        current = rt.base_of(class);
    }
    Err(Fault::Resolution(format!(
        "field '{field}' not found on type '{type_full_name}' or its bases"
    )))
}

fn resolve_class<'rt>(rt: &'rt RuntimeCore, full_name: &str) -> Result<&'rt LoadedClass, Fault> {
    rt.resolve(full_name, None).map_err(fault_from_runtime)
}

fn collect_candidates(
    rt: &RuntimeCore,
    type_full_name: &str,
    method: &str,
    kind: MemberKind,
) -> Result<Vec<(MethodSlot, MethodDef)>, Fault> {
    let mut candidates = Vec::new();
    let mut current = Some(resolve_class(rt, type_full_name)?);
    while let Some(class) = current {
        match kind {
            MemberKind::Method => {
                for (slot, def) in class.method_slots.iter().zip(class.def.methods.iter()) {
                    if def.name == method {
                        candidates.push((*slot, def.clone()));
                    }
                }
            }
            MemberKind::Ctor => {
                // Constructors do not inherit; only the declared type's.
                for (slot, def) in class.ctor_slots.iter().zip(class.def.constructors.iter()) {
                    candidates.push((*slot, def.clone()));
                }
                break;
            }
        }
        current = rt.base_of(class);
    }
    Ok(candidates)
}

fn resolve_overload(
    rt: &RuntimeCore,
    type_full_name: &str,
    method: &str,
    kind: MemberKind,
    generic_args: &[String],
    args: &[Value],
) -> Result<MethodSlot, Fault> {
    let candidates = collect_candidates(rt, type_full_name, method, kind)?;
    if candidates.is_empty() {
        let what = if kind == MemberKind::Ctor {
            "constructor"
        } else {
            "method"
        };
        return Err(Fault::Resolution(format!(
            "{what} '{method}' not found on type '{type_full_name}' or its bases"
        )));
    }

    // Arity filters: positional first, then the generic coordinate.
    let arity_matched: Vec<&(MethodSlot, MethodDef)> = candidates
        .iter()
        .filter(|(_, def)| {
            def.parameters.len() == args.len()
                && def.generic_params.len() == generic_args.len()
        })
        .collect();
    if arity_matched.is_empty() {
        return Err(not_found(type_full_name, method, args.len(), &candidates));
    }

    for wildcard in [false, true] {
        let matched: Vec<&&(MethodSlot, MethodDef)> = arity_matched
            .iter()
            .filter(|(_, def)| signature_matches(rt, def, generic_args, args, wildcard))
            .collect();
        match matched.as_slice() {
            [(slot, _)] => return Ok(*slot),
            [] => continue,
            many => {
                let inner: Vec<&(MethodSlot, MethodDef)> =
                    many.iter().map(|entry| **entry).collect();
                return Err(ambiguous(type_full_name, method, &inner));
            }
        }
    }

    Err(not_found(type_full_name, method, args.len(), &candidates))
}

/// One comparator pass over a candidate's parameter list.
fn signature_matches(
    rt: &RuntimeCore,
    def: &MethodDef,
    generic_args: &[String],
    args: &[Value],
    wildcard: bool,
) -> bool {
    def.parameters.iter().zip(args.iter()).all(|((_, param_type), arg)| {
        let param_type = substitute_generics(param_type, &def.generic_params, generic_args);
        let param_type = param_type.trim_end_matches('&');
        match arg_type(rt, arg) {
            Some(arg_type) => rt.is_assignable(&arg_type, param_type),
            // A null argument carries no type: only the wildcard
            // comparator lets it match.
            None => wildcard,
        }
    })
}

/// The dispatch-relevant type of an argument, `None` for null.
fn arg_type(rt: &RuntimeCore, arg: &Value) -> Option<String> {
    match arg {
        Value::Null | Value::Sentinel => None,
        Value::Object(id) => rt.type_of(*id).ok().map(str::to_string),
        Value::Type { .. } => Some("System.Type".to_string()),
        other => other.type_name(),
    }
}

/// Bind stub generic parameter names to the call's type coordinate.
fn substitute_generics(param_type: &str, params: &[String], args: &[String]) -> String {
    for (param, arg) in params.iter().zip(args.iter()) {
        if param_type == param {
            return arg.clone();
        }
        if let Some(rest) = param_type.strip_prefix(param.as_str()) {
            if rest == "[]" || rest == "&" {
                return format!("{arg}{rest}");
            }
        }
    }
    param_type.to_string()
}

fn not_found(
    type_full_name: &str,
    method: &str,
    arity: usize,
    candidates: &[(MethodSlot, MethodDef)],
) -> Fault {
    let signatures: Vec<String> = candidates
        .iter()
        .map(|(_, def)| {
            let params: Vec<&str> = def.parameters.iter().map(|(_, t)| t.as_str()).collect();
            format!("{}({})", def.name, params.join(", "))
        })
        .collect();
    Fault::Resolution(format!(
        "no overload of '{method}' on '{type_full_name}' takes {arity} argument(s); candidates: [{}]",
        signatures.join("; ")
    ))
}

fn ambiguous(type_full_name: &str, method: &str, matched: &[&(MethodSlot, MethodDef)]) -> Fault {
    let signatures: Vec<String> = matched
        .iter()
        .map(|(_, def)| {
            let params: Vec<&str> = def.parameters.iter().map(|(_, t)| t.as_str()).collect();
            format!("{}({})", def.name, params.join(", "))
        })
        .collect();
    Fault::Resolution(format!(
        "call to '{method}' on '{type_full_name}' is ambiguous between: [{}]",
        signatures.join("; ")
    ))
}
