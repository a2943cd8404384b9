use std::any::TypeId;
use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::{Message, Payload, TestCommand, TestedEvent};
use crate::runtime::RuntimeError;

const PRIMITIVES: &[&str] = &[
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

/// Binds a qualified type name to a native Rust type and the schema
/// describing it on the wire.
#[derive(Debug, Clone)]
pub struct TypeBinding {
    pub type_name: String,
    pub schema: String,
    pub rust_type: &'static str,
    type_id: TypeId,
}

impl TypeBinding {
    pub fn of<T: Message>() -> Self {
        Self {
            type_name: T::TYPE_NAME.to_string(),
            schema: T::SCHEMA.to_string(),
            rust_type: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    pub fn is<T: Message>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Whether `payload` carries the native type this binding names.
    pub fn binds(&self, payload: &Payload) -> bool {
        match payload {
            Payload::TestCommand(_) => self.is::<TestCommand>(),
            Payload::TestedEvent(_) => self.is::<TestedEvent>(),
        }
    }

    #[cfg(test)]
    pub(crate) fn renamed(mut self, type_name: &str) -> Self {
        self.type_name = type_name.to_string();
        self
    }
}

/// Record schemas (Avro JSON documents) and the type bindings that use them.
///
/// A schema may only reference records registered before it, and a type
/// binding may only name a registered schema.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Value>,
    types: HashMap<String, TypeBinding>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record schema. Returns its full name.
    pub fn register_schema(&mut self, raw: &str) -> Result<String, RuntimeError> {
        let doc: Value =
            serde_json::from_str(raw).map_err(|e| RuntimeError::SchemaParse(e.to_string()))?;
        let full_name = record_full_name(&doc)?;
        let namespace = full_name.rsplit_once('.').map(|(ns, _)| ns);

        let fields = doc
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RuntimeError::SchemaParse(format!("{full_name}: missing fields array"))
            })?;
        for field in fields {
            let name = field.get("name").and_then(Value::as_str).ok_or_else(|| {
                RuntimeError::SchemaParse(format!("{full_name}: field without a name"))
            })?;
            let ty = field.get("type").ok_or_else(|| {
                RuntimeError::SchemaParse(format!("{full_name}.{name}: field without a type"))
            })?;
            self.check_type(ty, namespace, &full_name)?;
        }

        match self.schemas.get(&full_name) {
            Some(existing) if *existing == doc => return Ok(full_name),
            Some(_) => {
                return Err(RuntimeError::Conflict(format!(
                    "schema {full_name} already registered with a different definition"
                )));
            }
            None => {}
        }
        self.schemas.insert(full_name.clone(), doc);
        Ok(full_name)
    }

    pub fn register_type(&mut self, binding: TypeBinding) -> Result<(), RuntimeError> {
        if let Some(existing) = self.types.get(&binding.type_name) {
            return Err(RuntimeError::Conflict(format!(
                "type {} already bound to {}",
                binding.type_name, existing.rust_type
            )));
        }
        if !self.schemas.contains_key(&binding.schema) {
            return Err(RuntimeError::UnknownSchema(binding.schema));
        }
        self.types.insert(binding.type_name.clone(), binding);
        Ok(())
    }

    pub fn binding(&self, type_name: &str) -> Option<&TypeBinding> {
        self.types.get(type_name)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    fn check_type(
        &self,
        ty: &Value,
        namespace: Option<&str>,
        owner: &str,
    ) -> Result<(), RuntimeError> {
        match ty {
            Value::String(name) if PRIMITIVES.contains(&name.as_str()) => Ok(()),
            Value::String(name) => {
                let resolved = match namespace {
                    Some(ns) if !name.contains('.') => format!("{ns}.{name}"),
                    _ => name.clone(),
                };
                if resolved == owner || self.schemas.contains_key(&resolved) {
                    Ok(())
                } else {
                    Err(RuntimeError::UnknownSchema(resolved))
                }
            }
            Value::Array(branches) if !branches.is_empty() => branches
                .iter()
                .try_for_each(|b| self.check_type(b, namespace, owner)),
            Value::Object(map) => match map.get("type").and_then(Value::as_str) {
                Some("array") => {
                    let items = map.get("items").ok_or_else(|| {
                        RuntimeError::SchemaParse(format!("{owner}: array without items"))
                    })?;
                    self.check_type(items, namespace, owner)
                }
                Some("map") => {
                    let values = map.get("values").ok_or_else(|| {
                        RuntimeError::SchemaParse(format!("{owner}: map without values"))
                    })?;
                    self.check_type(values, namespace, owner)
                }
                Some(p) if PRIMITIVES.contains(&p) => Ok(()),
                other => Err(RuntimeError::SchemaParse(format!(
                    "{owner}: unsupported inline type {other:?}"
                ))),
            },
            other => Err(RuntimeError::SchemaParse(format!(
                "{owner}: invalid field type {other}"
            ))),
        }
    }
}

fn record_full_name(doc: &Value) -> Result<String, RuntimeError> {
    if doc.get("type").and_then(Value::as_str) != Some("record") {
        return Err(RuntimeError::SchemaParse(
            "top-level schema must be a record".to_string(),
        ));
    }
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| RuntimeError::SchemaParse("record without a name".to_string()))?;
    if name.contains('.') {
        return Ok(name.to_string());
    }
    Ok(match doc.get("namespace").and_then(Value::as_str) {
        Some(ns) if !ns.is_empty() => format!("{ns}.{name}"),
        _ => name.to_string(),
    })
}
