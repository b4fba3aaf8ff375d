use log::debug;
use std::collections::BTreeMap;

use crate::assembler;
use crate::config::Config;
use crate::directive::{
    parse_header, parse_param, parse_response, parse_route, parse_tags, Directive, DirectiveKind,
    HeaderTarget, ParamLocation, ParamSpec, ResponseKind, RouteSpec,
};
use crate::error::ParserError;
use crate::models::{
    Header, MediaType, Operation, Parameter, RequestBody, Response, Schema, CONTENT_TYPE_FORM,
    CONTENT_TYPE_TEXT,
};
use crate::resolver::SchemaResolver;
use crate::source::{Package, SourceTree};
use crate::store::Store;
use crate::types::GoType;

/// Interprets the comment block of one declaration.
pub struct OperationParser<S: SourceTree> {
    config: Config,
    resolver: SchemaResolver<S>,
}

impl<S: SourceTree> OperationParser<S> {
    pub fn new(config: Config, tree: S) -> Self {
        let resolver = SchemaResolver::new(tree, config.schema_without_pkg);
        Self { config, resolver }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver_mut(&mut self) -> &mut SchemaResolver<S> {
        &mut self.resolver
    }

    /// Returns `Ok(true)` when an operation was registered.
    pub fn parse(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        comments: &[String],
    ) -> Result<bool, ParserError> {
        if !self.config.covers(&pkg.path) {
            return Ok(false);
        }

        let directives: Vec<Directive> = comments.iter().filter_map(|c| Directive::parse(c)).collect();
        let mut operation = Operation::default();
        let mut route: Option<RouteSpec> = None;

        // Only the route and tags are read before the filter decides.
        for directive in &directives {
            match directive.kind {
                DirectiveKind::Route => route = Some(parse_route(directive.rest)?),
                DirectiveKind::Tag => add_tags(&mut operation, directive.rest),
                _ => {}
            }
        }

        let Some(route) = route else {
            return Ok(false);
        };
        if let Some(filter) = self.config.filter_tag() {
            if !operation.has_tag(filter) {
                debug!(
                    "Skipping operation due to tag filter: tags={:?}, filterTag={}",
                    operation.tags, filter
                );
                return Ok(false);
            }
        }

        for directive in &directives {
            self.apply(store, pkg, &mut operation, directive)?;
        }

        Ok(assembler::add_operation(store, &route, operation))
    }

    fn apply(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        operation: &mut Operation,
        directive: &Directive,
    ) -> Result<(), ParserError> {
        match directive.kind {
            DirectiveKind::Title => operation.summary = directive.rest.to_string(),
            DirectiveKind::Description if directive.rest.trim().is_empty() => {}
            DirectiveKind::Description => {
                if !operation.description.is_empty() {
                    operation.description.push(' ');
                }
                operation.description.push_str(directive.rest.trim());
            }
            DirectiveKind::Param => {
                let spec = parse_param(directive.rest)?;
                self.apply_param(store, pkg, operation, spec)?;
            }
            DirectiveKind::Header => self.apply_header(operation, directive.rest)?,
            DirectiveKind::Success | DirectiveKind::Failure => {
                self.apply_response(store, pkg, operation, directive.rest)?
            }
            DirectiveKind::Tag => add_tags(operation, directive.rest),
            // Bound once in the first pass.
            DirectiveKind::Route => {}
            DirectiveKind::OperationId => {
                let id = directive.rest;
                if !id.is_empty() {
                    if !store.claim_operation_id(id) {
                        return Err(ParserError::DuplicateOperationId(id.to_string()));
                    }
                    operation.operationId = id.to_string();
                }
            }
            DirectiveKind::Other => {}
        }
        Ok(())
    }

    fn apply_param(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        operation: &mut Operation,
        spec: ParamSpec,
    ) -> Result<(), ParserError> {
        match spec.location {
            ParamLocation::Path
            | ParamLocation::Query
            | ParamLocation::Header
            | ParamLocation::Cookie => {
                let parsed = GoType::parse(&spec.type_ref)?;
                let schema = self.resolver.schema_for(store, pkg, &parsed)?;
                operation.parameters.push(Parameter {
                    name: spec.name,
                    in_type: spec.location.as_str().to_string(),
                    description: spec.description,
                    required: spec.required,
                    schema: Some(schema),
                });
            }
            ParamLocation::Body => {
                let (content_type, schema) =
                    self.resolver.resolve_content(store, pkg, &spec.type_ref)?;
                let mut content = BTreeMap::new();
                content.insert(content_type, MediaType { schema });
                operation.requestBody = Some(RequestBody {
                    description: spec.description,
                    content,
                    required: spec.required,
                });
            }
            ParamLocation::Form | ParamLocation::File => {
                let mut property = if spec.location == ParamLocation::File {
                    Schema {
                        type_: Some("string".to_string()),
                        format: Some("binary".to_string()),
                        ..Default::default()
                    }
                } else {
                    let parsed = GoType::parse(&spec.type_ref)?;
                    self.resolver.schema_for(store, pkg, &parsed)?
                };
                if !spec.description.is_empty() {
                    property.description = Some(spec.description);
                }

                let body = operation.requestBody.get_or_insert_with(RequestBody::default);
                let form = &mut body
                    .content
                    .entry(CONTENT_TYPE_FORM.to_string())
                    .or_insert_with(|| MediaType {
                        schema: Schema::object(),
                    })
                    .schema;
                if spec.required && !form.required.contains(&spec.name) {
                    form.required.push(spec.name.clone());
                }
                form.properties.set(spec.name, property);
            }
        }
        Ok(())
    }

    fn apply_header(&mut self, operation: &mut Operation, text: &str) -> Result<(), ParserError> {
        let spec = parse_header(text)?;
        let header = Header {
            description: spec.description,
            schema: Schema::typed(spec.json_type),
        };

        match spec.target {
            HeaderTarget::All => {
                for response in operation.responses.values_mut() {
                    response.headers.insert(spec.name.clone(), header.clone());
                }
            }
            HeaderTarget::Statuses(statuses) => {
                for status in statuses {
                    operation
                        .responses
                        .entry(status)
                        .or_default()
                        .headers
                        .insert(spec.name.clone(), header.clone());
                }
            }
        }
        Ok(())
    }

    fn apply_response(
        &mut self,
        store: &mut Store,
        pkg: &Package,
        operation: &mut Operation,
        text: &str,
    ) -> Result<(), ParserError> {
        let spec = parse_response(text)?;
        let mut response = Response {
            description: spec.description,
            ..Default::default()
        };

        match spec.kind {
            ResponseKind::Complex => {
                let type_ref = spec
                    .type_ref
                    .ok_or_else(|| ParserError::ResponseParseError(text.to_string()))?;
                let (content_type, schema) = self.resolver.resolve_content(store, pkg, &type_ref)?;
                response.content.insert(content_type, MediaType { schema });
            }
            ResponseKind::Simple(json_type) => {
                response.content.insert(
                    CONTENT_TYPE_TEXT.to_string(),
                    MediaType {
                        schema: Schema::typed(json_type),
                    },
                );
            }
            ResponseKind::Empty => {}
        }

        operation.responses.insert(spec.status, response);
        Ok(())
    }
}

fn add_tags(operation: &mut Operation, text: &str) {
    for tag in parse_tags(text) {
        if !operation.has_tag(tag) {
            operation.tags.push(tag.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use crate::source::GoSourceTree;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    const MODELS: &str = r#"package models

type Pet struct {
    ID int64 `json:"id"`
    Name string `json:"name"`
}

type Item struct {
    SKU string `json:"sku"`
}

type Wrapper struct {
    Code int `json:"code"`
    Data interface{} `json:"data"`
    Total int64 `json:"total"`
}
"#;

    const HANDLERS: &str = r#"package handlers

import "example.com/app/models"
"#;

    fn module() -> TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("models")).unwrap();
        fs::create_dir_all(root.join("handlers")).unwrap();
        fs::write(root.join("go.mod"), "module example.com/app\n").unwrap();
        fs::write(root.join("models/models.go"), MODELS).unwrap();
        fs::write(root.join("handlers/handlers.go"), HANDLERS).unwrap();
        dir
    }

    fn parser(root: &Path, config: Config) -> (OperationParser<GoSourceTree>, Arc<Package>) {
        let mut parser = OperationParser::new(config, GoSourceTree::new(root).unwrap());
        let pkg = parser
            .resolver_mut()
            .tree_mut()
            .package(&root.join("handlers"))
            .unwrap();
        (parser, pkg)
    }

    fn lines(block: &str) -> Vec<String> {
        block.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_full_operation() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// GetPet godoc
// @Title Get a pet
// @Description Returns one pet
// @Description by its id.
// @Param id path int64 false "Pet ID"
// @Param verbose query bool false "More fields"
// @Success 200 {object} models.Pet "the pet"
// @Failure 404 {string} string "not found"
// @Header 200 {string} X-Request-Id "trace id"
// @Resource pets
// @Tag pets, store
// @OperationId getPet
// @Router /pets/{id} [get]"#,
        );

        assert!(parser.parse(&mut store, &pkg, &comments).unwrap());

        let operation = store.paths["/pets/{id}"].get.clone().unwrap();
        assert_eq!(operation.summary, "Get a pet");
        assert_eq!(operation.description, "Returns one pet by its id.");
        assert_eq!(operation.tags, vec!["pets".to_string(), "store".to_string()]);
        assert_eq!(operation.operationId, "getPet");

        assert_eq!(operation.parameters.len(), 2);
        assert!(operation.parameters[0].required);
        assert_eq!(operation.parameters[0].in_type, "path");
        assert_eq!(
            operation.parameters[1].schema,
            Some(Schema::typed("boolean"))
        );

        let ok = &operation.responses["200"];
        assert_eq!(ok.description, "the pet");
        assert_eq!(
            ok.content["application/json"].schema,
            Schema::reference("models.Pet")
        );
        assert_eq!(ok.headers["X-Request-Id"].schema, Schema::typed("string"));

        let missing = &operation.responses["404"];
        assert_eq!(missing.content["text/plain"].schema, Schema::typed("string"));
        assert!(store.registry.contains("models.Pet"));
    }

    #[test]
    fn test_simple_string_response() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// @Success 200 {string} string "ok"
// @Router /health [get]"#,
        );
        parser.parse(&mut store, &pkg, &comments).unwrap();

        let response = &store.paths["/health"].get.as_ref().unwrap().responses["200"];
        assert_eq!(response.description, "ok");
        assert_eq!(response.content["text/plain"].schema, Schema::typed("string"));
    }

    #[test]
    fn test_invalid_status_fails_declaration() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// @Success 999 object models.Pet "bad"
// @Router /pets [get]"#,
        );
        let err = parser.parse(&mut store, &pkg, &comments).unwrap_err();
        assert!(matches!(err, ParserError::InvalidStatusCode(ref code) if code == "999"));
        assert!(store.paths.is_empty());
    }

    #[test]
    fn test_declaration_without_route_is_ignored() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(r#"// @Success 200 {object} models.Pet "pet""#);
        assert!(!parser.parse(&mut store, &pkg, &comments).unwrap());
        assert!(store.registry.is_empty());
    }

    #[test]
    fn test_tag_filter_runs_before_resolution() {
        let dir = module();
        let config = Config::new(dir.path()).with_filter_tag("admin");
        let (mut parser, pkg) = parser(dir.path(), config);
        let mut store = Store::new();

        let comments = lines(
            r#"// @Success 200 {object} models.Pet "pet"
// @Param broken nowhere int true "never parsed"
// @Tag pets
// @Router /pets [get]"#,
        );
        assert!(!parser.parse(&mut store, &pkg, &comments).unwrap());
        assert!(store.paths.is_empty());
        assert!(store.registry.is_empty());
    }

    #[test]
    fn test_duplicate_operation_id() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let first = lines("// @OperationId listPets\n// @Router /pets [get]");
        let second = lines("// @OperationId listPets\n// @Router /pets [post]");

        assert!(parser.parse(&mut store, &pkg, &first).unwrap());
        let err = parser.parse(&mut store, &pkg, &second).unwrap_err();
        assert_eq!(err.to_string(), "operation ID 'listPets' is not unique");

        let item = &store.paths["/pets"];
        assert_eq!(item.get.as_ref().unwrap().operationId, "listPets");
        assert!(item.post.is_none());
    }

    #[test]
    fn test_route_binding_round_trip() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        parser
            .parse(&mut store, &pkg, &lines("// @Title remove\n// @Router /pets/{id} [delete]"))
            .unwrap();
        parser
            .parse(&mut store, &pkg, &lines("// @Title fetch\n// @Router /pets/{id} [get]"))
            .unwrap();

        let item = &store.paths["/pets/{id}"];
        assert_eq!(item.slot(HttpMethod::Delete).unwrap().summary, "remove");
        assert_eq!(item.slot(HttpMethod::Get).unwrap().summary, "fetch");
        assert!(item.slot(HttpMethod::Put).is_none());
    }

    #[test]
    fn test_unknown_method_is_dropped() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let registered = parser
            .parse(&mut store, &pkg, &lines("// @Router /pets [connect]"))
            .unwrap();
        assert!(!registered);
        assert!(store.paths.is_empty());
    }

    #[test]
    fn test_container_override_response() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// @Success 200 {object} models.Wrapper{data=models.Item,total=int} "list"
// @Router /items [get]"#,
        );
        parser.parse(&mut store, &pkg, &comments).unwrap();

        let response = &store.paths["/items"].get.as_ref().unwrap().responses["200"];
        let schema = &response.content["application/json"].schema;
        assert_eq!(schema.properties.get("data"), Some(&Schema::reference("models.Item")));
        assert_eq!(schema.properties.get("total"), Some(&Schema::typed("integer")));
        assert_eq!(schema.properties.get("code"), Some(&Schema::typed("integer")));
        assert_eq!(
            store.registry.get("models.Wrapper").unwrap().properties.get("data"),
            Some(&Schema::object())
        );
    }

    #[test]
    fn test_container_override_with_spaces() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// @Success 200 {object} models.Wrapper{data=models.Item, total=int} "list"
// @Router /items [get]"#,
        );
        assert!(parser.parse(&mut store, &pkg, &comments).unwrap());

        let response = &store.paths["/items"].get.as_ref().unwrap().responses["200"];
        assert_eq!(response.description, "list");
        let schema = &response.content["application/json"].schema;
        assert_eq!(schema.properties.get("data"), Some(&Schema::reference("models.Item")));
        assert_eq!(schema.properties.get("total"), Some(&Schema::typed("integer")));
    }

    #[test]
    fn test_title_last_wins_and_blank_description_is_skipped() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// @Title First title
// @Description Lists pets.
// @Description
// @Title Final title
// @Router /pets [get]"#,
        );
        assert!(parser.parse(&mut store, &pkg, &comments).unwrap());

        let operation = store.paths["/pets"].get.as_ref().unwrap();
        assert_eq!(operation.summary, "Final title");
        assert_eq!(operation.description, "Lists pets.");
    }

    #[test]
    fn test_body_form_and_file_params() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        parser
            .parse(
                &mut store,
                &pkg,
                &lines(r#"// @Param pet body models.Pet true "new pet"
// @Router /pets [post]"#),
            )
            .unwrap();
        let body = store.paths["/pets"].post.as_ref().unwrap().requestBody.clone().unwrap();
        assert!(body.required);
        assert_eq!(body.content["application/json"].schema, Schema::reference("models.Pet"));

        parser
            .parse(
                &mut store,
                &pkg,
                &lines(r#"// @Param name form string true "pet name"
// @Param photo file file false "picture"
// @Router /pets/upload [post]"#),
            )
            .unwrap();
        let body = store.paths["/pets/upload"].post.as_ref().unwrap().requestBody.clone().unwrap();
        let form = &body.content["multipart/form-data"].schema;
        assert_eq!(form.properties.keys().collect::<Vec<_>>(), vec!["name", "photo"]);
        assert_eq!(form.required, vec!["name".to_string()]);
        assert_eq!(form.properties.get("photo").unwrap().format.as_deref(), Some("binary"));
    }

    #[test]
    fn test_headers_attach_to_named_or_all_responses() {
        let dir = module();
        let (mut parser, pkg) = parser(dir.path(), Config::new(dir.path()));
        let mut store = Store::new();

        let comments = lines(
            r#"// @Success 200 {string} string "ok"
// @Failure 500 {string} string "boom"
// @Header all {integer} X-Version "api version"
// @Header 429 {string} Retry-After "seconds"
// @Router /status [get]"#,
        );
        parser.parse(&mut store, &pkg, &comments).unwrap();

        let responses = &store.paths["/status"].get.as_ref().unwrap().responses;
        assert!(responses["200"].headers.contains_key("X-Version"));
        assert!(responses["500"].headers.contains_key("X-Version"));
        assert!(!responses["429"].headers.contains_key("X-Version"));
        assert_eq!(responses["429"].description, "");
        assert!(responses["429"].headers.contains_key("Retry-After"));
    }

    #[test]
    fn test_out_of_scope_package_is_skipped() {
        let dir = module();
        let config = Config::new(dir.path()).with_handler_path("api");
        let (mut parser, pkg) = parser(dir.path(), config);
        let mut store = Store::new();

        assert!(!parser.parse(&mut store, &pkg, &lines("// @Router /pets [get]")).unwrap());
        assert!(store.paths.is_empty());
    }
}
