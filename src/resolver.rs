use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ParserError;
use crate::models::{Schema, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
use crate::source::{FieldDecl, Package, SourceTree, TypeDecl, TypeKind};
use crate::store::Store;
use crate::types::{is_basic_go_type, is_interface_type, primitive_schema, GoType};

static CONTAINER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\{([^}]*)\}$").unwrap());

static ARRAY_SIZE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\w*\]").unwrap());

/// Turns Go type references into schemas, registering named types in the
/// store's registry as it goes.
pub struct SchemaResolver<S: SourceTree> {
    tree: S,
    schema_without_pkg: bool,
    in_flight: HashSet<String>,
}

impl<S: SourceTree> SchemaResolver<S> {
    pub fn new(tree: S, schema_without_pkg: bool) -> Self {
        Self {
            tree,
            schema_without_pkg,
            in_flight: HashSet::new(),
        }
    }

    pub fn tree_mut(&mut self) -> &mut S {
        &mut self.tree
    }

    /// Registry ID for `type_name` declared in package `pkg_name`.
    pub fn schema_id(&self, pkg_name: &str, type_name: &str) -> String {
        if self.schema_without_pkg || pkg_name.is_empty() {
            type_name.to_string()
        } else {
            format!("{}.{}", pkg_name, type_name)
        }
    }

    /// Content type and schema for the type reference of a response or body.
    pub fn resolve_content(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        type_ref: &str,
    ) -> Result<(String, Schema), ParserError> {
        let mut type_ref = type_ref.trim().to_string();

        let braced = CONTAINER_REGEX
            .captures(&type_ref)
            .map(|caps| (caps[1].trim().to_string(), caps[2].to_string()));
        if let Some((container, fields)) = braced {
            let is_literal = container.ends_with("interface") || container.ends_with("struct");
            if !is_literal {
                let overrides: Vec<(String, String)> = fields
                    .split(',')
                    .filter_map(|spec| spec.split_once('='))
                    .map(|(field, ty)| (field.trim().to_string(), ty.trim().to_string()))
                    .collect();
                if !overrides.is_empty() {
                    let schema = self.container_schema(store, pkg, &container, &overrides)?;
                    return Ok((CONTENT_TYPE_JSON.to_string(), schema));
                }
                type_ref = container;
            }
        }

        if is_interface_type(&type_ref) {
            return Ok((CONTENT_TYPE_JSON.to_string(), Schema::object()));
        }

        let normalized = ARRAY_SIZE_REGEX.replace_all(&type_ref, "[]").into_owned();

        if let Some(value_ref) = normalized.strip_prefix("map[]") {
            let schema = match self.map_schema(store, pkg, value_ref) {
                Ok(schema) => schema,
                Err(e) => {
                    warn!("Can not resolve map type {}: {}", normalized, e);
                    Schema::object()
                }
            };
            return Ok((CONTENT_TYPE_JSON.to_string(), schema));
        }

        if normalized.starts_with("[]") {
            let element = GoType::parse(&normalized.replace("[]", ""))?;
            let element = element.deref();
            let items = match element.qualified_name() {
                // Arrays of any primitive are documented as arrays of strings.
                Some(name) if is_basic_go_type(&name) => Schema::typed("string"),
                _ => self.schema_for(store, pkg, element)?,
            };
            return Ok((CONTENT_TYPE_JSON.to_string(), Schema::array_of(items)));
        }

        let parsed = GoType::parse(&normalized)?;
        let parsed = parsed.deref();
        if let Some(name) = parsed.qualified_name() {
            if let Some(schema) = primitive_schema(&name) {
                return Ok((CONTENT_TYPE_TEXT.to_string(), schema));
            }
        }
        let schema = self.schema_for(store, pkg, parsed)?;
        Ok((CONTENT_TYPE_JSON.to_string(), schema))
    }

    /// Copy of `container`'s registered schema with the listed fields replaced.
    fn container_schema(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        container: &str,
        overrides: &[(String, String)],
    ) -> Result<Schema, ParserError> {
        let mut schema = self.object_schema(store, pkg, container)?;
        for (field, field_type) in overrides {
            let parsed = GoType::parse(field_type)?;
            let field_schema = self.schema_for(store, pkg, &parsed)?;
            debug!("Overriding {}.{} with {}", container, field, field_type);
            schema.properties.set(field.as_str(), field_schema);
        }
        Ok(schema)
    }

    fn map_schema(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        value_ref: &str,
    ) -> Result<Schema, ParserError> {
        let value = GoType::parse(value_ref)?;
        Ok(Schema {
            type_: Some("object".to_string()),
            additionalProperties: Some(Box::new(self.schema_for(store, pkg, &value)?)),
            ..Default::default()
        })
    }

    /// Full schema of a type, following a registry reference.
    pub fn object_schema(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        type_ref: &str,
    ) -> Result<Schema, ParserError> {
        let parsed = GoType::parse(type_ref)?;
        let schema = self.schema_for(store, pkg, &parsed)?;
        match schema.ref_id() {
            Some(id) => Ok(store.registry.get(id).cloned().unwrap_or_else(Schema::object)),
            None => Ok(schema),
        }
    }

    /// Schema used where a field or parameter of type `ty` appears.
    pub fn schema_for(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        ty: &GoType,
    ) -> Result<Schema, ParserError> {
        match ty {
            GoType::Pointer(inner) => self.schema_for(store, pkg, inner),
            GoType::Array(inner) => Ok(Schema::array_of(self.schema_for(store, pkg, inner)?)),
            GoType::Map { value, .. } => Ok(Schema {
                type_: Some("object".to_string()),
                additionalProperties: Some(Box::new(self.schema_for(store, pkg, value)?)),
                ..Default::default()
            }),
            GoType::Interface | GoType::Struct => Ok(Schema::object()),
            GoType::Named { package, name } => {
                self.resolve_named(store, pkg, package.as_deref(), name)
            }
        }
    }

    /// Parses `type_name` and registers it, returning its registry ID. Types
    /// that never get an entry (primitives, interfaces) yield `None`.
    pub fn register_type(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        type_name: &str,
    ) -> Result<Option<String>, ParserError> {
        let parsed = GoType::parse(type_name)?;
        let schema = self.schema_for(store, pkg, parsed.deref())?;
        Ok(schema.ref_id().map(str::to_string))
    }

    fn resolve_named(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        package: Option<&str>,
        name: &str,
    ) -> Result<Schema, ParserError> {
        let qualified = match package {
            Some(package) => format!("{}.{}", package, name),
            None => name.to_string(),
        };
        if let Some(schema) = primitive_schema(&qualified) {
            return Ok(schema);
        }
        if is_interface_type(&qualified) {
            return Ok(Schema::object());
        }

        let target = self.package_for(pkg, package)?;
        let decl = target
            .type_decl(name)
            .ok_or_else(|| ParserError::TypeNotFound {
                type_name: name.to_string(),
                package: target.path.clone(),
            })?;

        let id = self.schema_id(&target.name, name);
        if store.registry.contains(&id) || self.in_flight.contains(&id) {
            return Ok(Schema::reference(&id));
        }

        match &decl.kind {
            TypeKind::Interface => return Ok(Schema::object()),
            TypeKind::Alias(underlying) => {
                let parsed = GoType::parse(underlying)?;
                if let Some(schema) = parsed
                    .deref()
                    .qualified_name()
                    .and_then(|n| primitive_schema(&n))
                {
                    return Ok(schema);
                }
            }
            TypeKind::Struct(_) => {}
        }

        debug!("Registering schema {}", id);
        self.in_flight.insert(id.clone());
        let built = self.build_decl(store, &target, decl);
        self.in_flight.remove(&id);

        let schema = built?;
        debug!("Resolved {} with {} properties", id, schema.properties.len());
        store.registry.register(&id, name, schema);
        Ok(Schema::reference(&id))
    }

    fn package_for(
        &mut self,
        pkg: &Package,
        alias: Option<&str>,
    ) -> Result<Arc<Package>, ParserError> {
        let Some(alias) = alias else {
            return self.tree.package(&pkg.path);
        };
        let unknown = || ParserError::UnknownPackage {
            alias: alias.to_string(),
            from: pkg.path.clone(),
        };
        let import_path = pkg.imports.get(alias).ok_or_else(unknown)?;
        let dir = self.tree.import_dir(import_path).ok_or_else(unknown)?;
        self.tree.package(&dir)
    }

    fn build_decl(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        decl: &TypeDecl,
    ) -> Result<Schema, ParserError> {
        match &decl.kind {
            TypeKind::Struct(fields) => self.walk_struct(store, pkg, &decl.name, fields),
            TypeKind::Alias(underlying) => {
                let parsed = GoType::parse(underlying)?;
                self.schema_for(store, pkg, &parsed)
            }
            TypeKind::Interface => Ok(Schema::object()),
        }
    }

    fn walk_struct(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        type_name: &str,
        fields: &[FieldDecl],
    ) -> Result<Schema, ParserError> {
        let mut schema = Schema::object();

        for field in fields {
            let json_name = field
                .tag_value("json")
                .and_then(|tag| tag.split(',').next())
                .unwrap_or("");
            if json_name == "-" {
                continue;
            }
            let wrap = |source: ParserError| ParserError::FieldResolution {
                type_name: type_name.to_string(),
                field: field.name.clone(),
                source: Box::new(source),
            };

            if field.embedded && json_name.is_empty() {
                let embedded = self
                    .object_schema(store, pkg, &field.type_expr)
                    .map_err(wrap)?;
                for (name, property) in embedded.properties.iter() {
                    schema.properties.set(name, property.clone());
                }
                for name in embedded.required {
                    if !schema.required.contains(&name) {
                        schema.required.push(name);
                    }
                }
                continue;
            }
            if !field.embedded && !field.is_exported() {
                continue;
            }

            let name = if json_name.is_empty() {
                field.name.clone()
            } else {
                json_name.to_string()
            };
            let parsed = GoType::parse(&field.type_expr).map_err(wrap)?;
            let mut property = self.schema_for(store, pkg, &parsed).map_err(wrap)?;

            if let Some(example) = field.tag_value("example") {
                property.example = Some(
                    serde_json::from_str(example)
                        .unwrap_or_else(|_| serde_json::Value::String(example.to_string())),
                );
            }
            let required = ["validate", "binding"]
                .iter()
                .filter_map(|key| field.tag_value(key))
                .any(|rules| rules.split(',').any(|rule| rule.trim() == "required"));
            if required && !schema.required.contains(&name) {
                schema.required.push(name.clone());
            }

            schema.properties.set(name, property);
        }

        Ok(schema)
    }
}
