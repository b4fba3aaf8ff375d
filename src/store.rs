use log::debug;
use std::collections::{BTreeMap, HashSet};

use crate::models::{Components, Info, OpenAPI, PathItem, Schema, Server, OPENAPI_VERSION};

/// Reusable schemas keyed by ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Stores `schema` under `id` unless the ID is taken, and aliases it under
    /// `short_name` when that key is still free. Returns whether `id` was new.
    pub fn register(&mut self, id: &str, short_name: &str, schema: Schema) -> bool {
        if self.schemas.contains_key(id) {
            return false;
        }
        if short_name != id && !self.schemas.contains_key(short_name) {
            debug!("Aliasing schema {} as {}", id, short_name);
            self.schemas.insert(short_name.to_string(), schema.clone());
        }
        self.schemas.insert(id.to_string(), schema);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Schema> {
        self.schemas.remove(id)
    }

    pub fn into_inner(self) -> BTreeMap<String, Schema> {
        self.schemas
    }
}

/// All mutable state of one generation run.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub info: Info,
    pub servers: Vec<Server>,
    pub paths: BTreeMap<String, PathItem>,
    pub registry: SchemaRegistry,
    operation_ids: HashSet<String>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_info(info: Info, servers: Vec<Server>) -> Self {
        Self {
            info,
            servers,
            ..Default::default()
        }
    }

    /// Claims `id`. Returns false when another operation already owns it.
    pub fn claim_operation_id(&mut self, id: &str) -> bool {
        self.operation_ids.insert(id.to_string())
    }

    pub fn into_document(self) -> OpenAPI {
        OpenAPI {
            openapi: OPENAPI_VERSION.to_string(),
            info: self.info,
            servers: self.servers,
            paths: self.paths,
            components: Components {
                schemas: self.registry.into_inner(),
            },
        }
    }
}
