//! Schema validation for manifest bodies.
//!
//! The full schema graph is embedded in the binary and loaded once into an
//! in-memory document set; cross-document `$ref`s (all of them pointing at
//! `types.json`) resolve through a retriever instead of the network.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Retrieve, Uri, Validator};
use serde_json::Value;

use crate::object::ObjectType;

use super::ManifestError;

const TYPES_JSON: &str = include_str!("../../schemas/types.json");
const USER_SCHEMA: &str = include_str!("../../schemas/user.schema.json");
const CONTAINER_SCHEMA: &str = include_str!("../../schemas/container.schema.json");
const STORAGE_SCHEMA: &str = include_str!("../../schemas/storage.schema.json");
const BRIDGE_SCHEMA: &str = include_str!("../../schemas/bridge.schema.json");
const LINK_SCHEMA: &str = include_str!("../../schemas/link.schema.json");

const SCHEMA_BASE: &str = "https://schemas.wildland.io/";

/// Serves embedded schema documents to the `jsonschema` resolver.
#[derive(Clone)]
struct EmbeddedRetriever {
    docs: Arc<HashMap<String, Value>>,
}

impl Retrieve for EmbeddedRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        self.docs
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| format!("unknown schema document: {uri}").into())
    }
}

/// A single compiled schema.
pub struct Schema {
    validator: Validator,
}

impl Schema {
    pub fn validate(&self, instance: &Value) -> Result<(), ManifestError> {
        match self.validator.validate(instance) {
            Ok(()) => Ok(()),
            Err(error) => Err(ManifestError::Schema {
                path: error.instance_path.to_string(),
                reason: error.to_string(),
            }),
        }
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }
}

/// The preloaded schema graph: one validator per manifest object type,
/// plus a compiler for backend-specific parameter schemas.
pub struct SchemaSet {
    validators: HashMap<ObjectType, Schema>,
    retriever: EmbeddedRetriever,
}

impl SchemaSet {
    /// Load and compile every embedded schema. Called once per runtime.
    pub fn load() -> Result<Self, ManifestError> {
        let mut docs = HashMap::new();
        for (name, text) in [
            ("types.json", TYPES_JSON),
            ("user.schema.json", USER_SCHEMA),
            ("container.schema.json", CONTAINER_SCHEMA),
            ("storage.schema.json", STORAGE_SCHEMA),
            ("bridge.schema.json", BRIDGE_SCHEMA),
            ("link.schema.json", LINK_SCHEMA),
        ] {
            let value: Value = serde_json::from_str(text)
                .map_err(|e| ManifestError::Malformed(format!("embedded schema {name}: {e}")))?;
            docs.insert(format!("{SCHEMA_BASE}{name}"), value);
        }
        let retriever = EmbeddedRetriever {
            docs: Arc::new(docs),
        };

        let mut validators = HashMap::new();
        for object_type in [
            ObjectType::User,
            ObjectType::Container,
            ObjectType::Storage,
            ObjectType::Bridge,
            ObjectType::Link,
        ] {
            let uri = format!("{SCHEMA_BASE}{}.schema.json", object_type.tag());
            let doc = retriever.docs.get(&uri).expect("doc inserted above").clone();
            let schema = Self::compile_with(&retriever, &doc)?;
            validators.insert(object_type, schema);
        }

        Ok(SchemaSet {
            validators,
            retriever,
        })
    }

    /// Compile an ad-hoc schema (backend parameter schemas) against the
    /// shared document set, so it may `$ref` into `types.json`.
    pub fn compile(&self, schema: &Value) -> Result<Schema, ManifestError> {
        Self::compile_with(&self.retriever, schema)
    }

    fn compile_with(retriever: &EmbeddedRetriever, schema: &Value) -> Result<Schema, ManifestError> {
        let validator = jsonschema::options()
            .with_retriever(retriever.clone())
            .build(schema)
            .map_err(|e| ManifestError::Malformed(format!("schema compile error: {e}")))?;
        Ok(Schema { validator })
    }

    /// Validate a manifest body against the schema for its object type.
    pub fn validate(
        &self,
        object_type: ObjectType,
        instance: &Value,
    ) -> Result<(), ManifestError> {
        self.validators
            .get(&object_type)
            .expect("all object types preloaded")
            .validate(instance)
    }
}

/// Convert a parsed YAML body to the JSON value the validators expect.
pub fn yaml_to_json(value: &serde_yaml::Value) -> Result<Value, ManifestError> {
    serde_json::to_value(value)
        .map_err(|e| ManifestError::Malformed(format!("body is not schema-representable: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_schema_set_loads() {
        SchemaSet::load().unwrap();
    }

    #[test]
    fn test_container_schema_accepts_minimal() {
        let schemas = SchemaSet::load().unwrap();
        let body = json!({
            "object": "container",
            "owner": "0xaaa",
            "version": "1",
            "paths": ["/.uuid/11111111-2222-3333-4444-555555555555"],
            "backends": {"storage": []},
        });
        schemas.validate(ObjectType::Container, &body).unwrap();
    }

    #[test]
    fn test_container_schema_rejects_relative_path() {
        let schemas = SchemaSet::load().unwrap();
        let body = json!({
            "object": "container",
            "owner": "0xaaa",
            "version": "1",
            "paths": ["not-absolute"],
            "backends": {"storage": []},
        });
        let err = schemas.validate(ObjectType::Container, &body).unwrap_err();
        assert!(matches!(err, ManifestError::Schema { .. }));
    }

    #[test]
    fn test_storage_schema_manifest_pattern() {
        let schemas = SchemaSet::load().unwrap();
        let glob = json!({
            "object": "storage",
            "owner": "0xaaa",
            "version": "1",
            "type": "local",
            "backend-id": "11111111-2222-3333-4444-555555555555",
            "container-path": "/.uuid/11111111-2222-3333-4444-555555555555",
            "manifest-pattern": {"type": "glob", "path": "/manifests/{path}/*.yaml"},
        });
        schemas.validate(ObjectType::Storage, &glob).unwrap();

        let bad = json!({
            "object": "storage",
            "owner": "0xaaa",
            "version": "1",
            "type": "local",
            "backend-id": "b1",
            "container-path": "/.uuid/u1",
            "manifest-pattern": {"type": "glob"},
        });
        assert!(schemas.validate(ObjectType::Storage, &bad).is_err());
    }

    #[test]
    fn test_compile_ad_hoc_schema_with_types_ref() {
        let schemas = SchemaSet::load().unwrap();
        let schema = schemas
            .compile(&json!({
                "type": "object",
                "required": ["location"],
                "properties": {
                    "location": {"$ref": "https://schemas.wildland.io/types.json#/$defs/abs-path"}
                }
            }))
            .unwrap();
        assert!(schema.is_valid(&json!({"location": "/tmp/x"})));
        assert!(!schema.is_valid(&json!({"location": "tmp/x"})));
    }
}
