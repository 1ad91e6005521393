//! Resolved schemas and the two-key schema cache.
//!
//! A [`ResolvedSchema`] pairs a schema document with its compiled validator
//! and knows how to apply `default` values. The [`SchemaCache`] memoizes
//! resolution twice over: by the Rust type a schema was generated from, and
//! by the pointer identity of caller-supplied schema documents, never by
//! value equality (schemas are mutable graphs, comparing them is a trap).

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use ferromcp_protocol::{Error, Result};

/// A reference-expanded, compile-checked schema ready for enforcement.
pub struct ResolvedSchema {
    document: Arc<Value>,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for ResolvedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSchema").finish_non_exhaustive()
    }
}

impl ResolvedSchema {
    /// Compile `document` into a validator.
    pub fn resolve(document: Arc<Value>) -> Result<Arc<Self>> {
        let validator = jsonschema::validator_for(&document)
            .map_err(|e| Error::internal(format!("schema failed to compile: {e}")))?;
        Ok(Arc::new(Self {
            document,
            validator,
        }))
    }

    /// The schema document this was resolved from.
    pub fn document(&self) -> &Arc<Value> {
        &self.document
    }

    /// Fill in missing object properties that declare a `default`.
    pub fn apply_defaults(&self, value: &mut Value) {
        apply_defaults_from(&self.document, value);
    }

    /// Validate `value`, mapping failures to `InvalidParams`.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.validator
            .validate(value)
            .map_err(|e| Error::invalid_params(format!("schema validation failed: {e}")))
    }
}

fn apply_defaults_from(schema: &Value, value: &mut Value) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Some(object) = value.as_object_mut() else {
        return;
    };
    for (name, subschema) in properties {
        match object.get_mut(name) {
            None => {
                if let Some(default) = subschema.get("default") {
                    object.insert(name.clone(), default.clone());
                }
            }
            // Recurse so nested objects pick up their own defaults.
            Some(nested) if nested.is_object() => apply_defaults_from(subschema, nested),
            Some(_) => {}
        }
    }
}

/// Whether a schema document describes a JSON object.
pub fn is_object_schema(document: &Value) -> bool {
    match document.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => document.get("properties").is_some(),
    }
}

/// Concurrent two-key cache of resolved schemas.
///
/// Reads are lock-free through the sharded maps; both keys point at the same
/// resolved values.
#[derive(Default)]
pub struct SchemaCache {
    by_type: DashMap<TypeId, Arc<ResolvedSchema>>,
    by_pointer: DashMap<usize, Arc<ResolvedSchema>>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("by_type", &self.by_type.len())
            .field("by_pointer", &self.by_pointer.len())
            .finish()
    }
}

impl SchemaCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the schema generated for Rust type `T`, caching by `TypeId`.
    ///
    /// `generate` runs only on a miss.
    pub fn resolve_for_type<T: 'static>(
        &self,
        generate: impl FnOnce() -> Value,
    ) -> Result<Arc<ResolvedSchema>> {
        let key = TypeId::of::<T>();
        if let Some(hit) = self.by_type.get(&key) {
            return Ok(hit.value().clone());
        }
        let resolved = ResolvedSchema::resolve(Arc::new(generate()))?;
        self.by_type.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Resolve a caller-supplied schema, caching by the document's pointer
    /// identity.
    pub fn resolve_pointer(&self, document: &Arc<Value>) -> Result<Arc<ResolvedSchema>> {
        let key = Arc::as_ptr(document) as usize;
        if let Some(hit) = self.by_pointer.get(&key) {
            return Ok(hit.value().clone());
        }
        let resolved = ResolvedSchema::resolve(document.clone())?;
        self.by_pointer.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Number of cached entries across both keys.
    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_pointer.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.by_pointer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "default": 30},
                "address": {
                    "type": "object",
                    "properties": {
                        "city": {"type": "string", "default": "nowhere"}
                    }
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    #[test]
    fn defaults_fill_missing_properties() {
        let schema = ResolvedSchema::resolve(Arc::new(person_schema())).unwrap();
        let mut value = json!({"name": "ada", "address": {}});
        schema.apply_defaults(&mut value);
        assert_eq!(value["age"], 30);
        assert_eq!(value["address"]["city"], "nowhere");
    }

    #[test]
    fn defaults_never_overwrite_present_values() {
        let schema = ResolvedSchema::resolve(Arc::new(person_schema())).unwrap();
        let mut value = json!({"name": "ada", "age": 36});
        schema.apply_defaults(&mut value);
        assert_eq!(value["age"], 36);
    }

    #[test]
    fn validation_rejects_unknown_fields() {
        let schema = ResolvedSchema::resolve(Arc::new(person_schema())).unwrap();
        let err = schema
            .validate(&json!({"name": "ada", "bogus": 1}))
            .unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
    }

    #[test]
    fn validation_rejects_missing_required() {
        let schema = ResolvedSchema::resolve(Arc::new(person_schema())).unwrap();
        assert!(schema.validate(&json!({"age": 3})).is_err());
        assert!(schema.validate(&json!({"name": "ok"})).is_ok());
    }

    #[test]
    fn object_schema_detection() {
        assert!(is_object_schema(&json!({"type": "object"})));
        assert!(is_object_schema(&json!({"properties": {}})));
        assert!(!is_object_schema(&json!({"type": "string"})));
    }

    #[test]
    fn type_key_caches_one_resolution_per_type() {
        struct A;
        struct B;
        let cache = SchemaCache::new();
        let mut generations = 0;
        for _ in 0..3 {
            cache
                .resolve_for_type::<A>(|| {
                    generations += 1;
                    person_schema()
                })
                .unwrap();
        }
        cache.resolve_for_type::<B>(|| person_schema()).unwrap();
        assert_eq!(generations, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn pointer_key_distinguishes_identical_documents() {
        let cache = SchemaCache::new();
        let first = Arc::new(person_schema());
        let second = Arc::new(person_schema());

        let a = cache.resolve_pointer(&first).unwrap();
        let b = cache.resolve_pointer(&first).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        cache.resolve_pointer(&second).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
