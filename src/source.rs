use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::ParserError;

static PACKAGE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^package\s+(\w+)").unwrap());

static MODULE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^module\s+(\S+)").unwrap());

static REQUIRE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:require\s+)?([^\s()/]+\.[^\s()]+)\s+(v\d\S*)").unwrap());

static IMPORT_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(?:([\w.]+)\s+)?"([^"]+)""#).unwrap());

static TYPE_SPEC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)(?:\[[^\]]*\])?\s*(=)?\s*(.*)$").unwrap());

static FUNC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s*(?:\([^)]*\)\s*)?(\w+)").unwrap());

static FIELD_NAMES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+(?:\s*,\s*\w+)*)\s+(\S.*)$").unwrap());

static STRUCT_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+):"([^"]*)""#).unwrap());

/// Provides parsed Go packages by directory.
pub trait SourceTree {
    fn package(&mut self, dir: &Path) -> Result<Arc<Package>, ParserError>;

    /// Directory an import path points to, if it lives in this tree.
    fn import_dir(&self, import_path: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Default)]
pub struct Package {
    pub path: PathBuf,
    pub name: String,
    /// alias -> import path
    pub imports: HashMap<String, String>,
    pub types: HashMap<String, TypeDecl>,
    pub functions: Vec<FuncDecl>,
}

impl Package {
    pub fn type_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Struct(Vec<FieldDecl>),
    Interface,
    /// `type X Y` and `type X = Y`
    Alias(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_expr: String,
    pub tag: Option<String>,
    pub embedded: bool,
}

impl FieldDecl {
    pub fn is_exported(&self) -> bool {
        self.name.chars().next().map_or(false, char::is_uppercase)
    }

    /// Value of `key` in the struct tag, like `reflect.StructTag.Get`.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        let tag = self.tag.as_deref()?;
        STRUCT_TAG_REGEX
            .captures_iter(tag)
            .find(|caps| &caps[1] == key)
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub file: PathBuf,
    pub comments: Vec<String>,
}

/// Source tree backed by a Go module on disk.
///
/// Imports resolve against the module itself, then `vendor/`, then the
/// standard library under `$GOROOT/src`, then the module cache for
/// dependencies pinned in `go.mod`.
pub struct GoSourceTree {
    root: PathBuf,
    module_name: Option<String>,
    requires: HashMap<String, String>,
    goroot: Option<PathBuf>,
    mod_cache: Option<PathBuf>,
    cache: HashMap<PathBuf, Arc<Package>>,
}

impl GoSourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ParserError> {
        let root = root.into();
        let go_mod = root.join("go.mod");
        let (module_name, requires) = if go_mod.is_file() {
            let content = fs::read_to_string(&go_mod)?;
            let module_name = MODULE_REGEX.captures(&content).map(|caps| caps[1].to_string());
            let requires = REQUIRE_REGEX
                .captures_iter(&content)
                .map(|caps| (caps[1].to_string(), caps[2].to_string()))
                .collect();
            (module_name, requires)
        } else {
            (None, HashMap::new())
        };
        debug!(
            "Module {:?} rooted at {:?} with {} requirements",
            module_name,
            root,
            requires.len()
        );

        Ok(Self {
            root,
            module_name,
            requires,
            goroot: env::var_os("GOROOT").map(PathBuf::from),
            mod_cache: default_mod_cache(),
            cache: HashMap::new(),
        })
    }

    /// Overrides the Go installation used for standard library imports.
    pub fn with_goroot(mut self, goroot: impl Into<PathBuf>) -> Self {
        self.goroot = Some(goroot.into());
        self
    }

    /// Overrides the module download cache (`$GOMODCACHE`).
    pub fn with_mod_cache(mut self, mod_cache: impl Into<PathBuf>) -> Self {
        self.mod_cache = Some(mod_cache.into());
        self
    }

    fn std_dir(&self, import_path: &str) -> Option<PathBuf> {
        let first = import_path.split('/').next()?;
        if first.contains('.') {
            return None;
        }
        let dir = self.goroot.as_ref()?.join("src").join(import_path);
        dir.is_dir().then_some(dir)
    }

    fn cached_module_dir(&self, import_path: &str) -> Option<PathBuf> {
        let mod_cache = self.mod_cache.as_ref()?;
        let (module, version) = self
            .requires
            .iter()
            .filter(|(module, _)| {
                import_path == module.as_str()
                    || import_path.starts_with(&format!("{}/", module))
            })
            .max_by_key(|(module, _)| module.len())?;
        let rest = import_path[module.len()..].trim_start_matches('/');
        let dir = mod_cache
            .join(format!("{}@{}", escape_module_path(module), version))
            .join(rest);
        dir.is_dir().then_some(dir)
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    fn load(&self, dir: &Path) -> Result<Package, ParserError> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_go_source(p))
            .collect();
        files.sort();

        let mut package = Package {
            path: dir.to_path_buf(),
            ..Default::default()
        };
        for file in files {
            let content = fs::read_to_string(&file)?;
            parse_go_file(&file, &content, &mut package);
        }
        if package.name.is_empty() {
            package.name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        debug!(
            "Loaded package {} from {:?}: {} types, {} funcs",
            package.name,
            dir,
            package.types.len(),
            package.functions.len()
        );
        Ok(package)
    }
}

impl SourceTree for GoSourceTree {
    fn package(&mut self, dir: &Path) -> Result<Arc<Package>, ParserError> {
        if let Some(package) = self.cache.get(dir) {
            return Ok(Arc::clone(package));
        }
        let package = Arc::new(self.load(dir)?);
        self.cache.insert(dir.to_path_buf(), Arc::clone(&package));
        Ok(package)
    }

    fn import_dir(&self, import_path: &str) -> Option<PathBuf> {
        if let Some(module) = &self.module_name {
            if import_path == module {
                return Some(self.root.clone());
            }
            if let Some(rest) = import_path.strip_prefix(&format!("{}/", module)) {
                return Some(self.root.join(rest));
            }
        }
        let vendored = self.root.join("vendor").join(import_path);
        if vendored.is_dir() {
            return Some(vendored);
        }
        self.std_dir(import_path)
            .or_else(|| self.cached_module_dir(import_path))
    }
}

fn default_mod_cache() -> Option<PathBuf> {
    if let Some(dir) = env::var_os("GOMODCACHE").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    let gopath = env::var_os("GOPATH")
        .and_then(|paths| env::split_paths(&paths).next())
        .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join("go")))?;
    Some(gopath.join("pkg").join("mod"))
}

/// Module cache paths spell upper-case letters as `!` plus the lower-case letter.
fn escape_module_path(module: &str) -> String {
    let mut escaped = String::with_capacity(module.len());
    for c in module.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Non-hidden `.go` files that are not tests.
pub fn is_go_source(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".go") && !name.ends_with("_test.go") && !name.starts_with('.')
}

/// Parses one Go file into `package`.
pub fn parse_go_file(file: &Path, content: &str, package: &mut Package) {
    let lines: Vec<&str> = content.lines().collect();
    let mut comments: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        if line.starts_with("//") {
            comments.push(line.to_string());
            i += 1;
            continue;
        }

        if let Some(caps) = PACKAGE_REGEX.captures(line) {
            package.name = caps[1].to_string();
        } else if let Some(rest) = line
            .strip_prefix("import")
            .filter(|rest| rest.starts_with(&[' ', '\t', '('][..]))
        {
            let rest = rest.trim();
            if rest.starts_with('(') {
                i += 1;
                while i < lines.len() && !lines[i].trim().starts_with(')') {
                    add_import(lines[i], package);
                    i += 1;
                }
            } else {
                add_import(rest, package);
            }
        } else if let Some(rest) = line.strip_prefix("type ").or_else(|| line.strip_prefix("type(")) {
            let rest = if line.starts_with("type(") {
                "("
            } else {
                rest.trim()
            };
            if rest.starts_with('(') {
                i += 1;
                while i < lines.len() && !lines[i].trim().starts_with(')') {
                    let spec = lines[i].trim();
                    if spec.is_empty() || spec.starts_with("//") {
                        i += 1;
                        continue;
                    }
                    i = parse_type_spec(&lines, i, spec, package);
                    i += 1;
                }
            } else {
                i = parse_type_spec(&lines, i, rest, package);
            }
        } else if let Some(caps) = FUNC_REGEX.captures(line) {
            package.functions.push(FuncDecl {
                name: caps[1].to_string(),
                file: file.to_path_buf(),
                comments: std::mem::take(&mut comments),
            });
        }

        comments.clear();
        i += 1;
    }
}

fn add_import(line: &str, package: &mut Package) {
    let Some(caps) = IMPORT_LINE_REGEX.captures(line) else {
        return;
    };
    let path = caps[2].to_string();
    let alias = match caps.get(1).map(|m| m.as_str()) {
        Some("_") | Some(".") => return,
        Some(alias) => alias.to_string(),
        None => path.rsplit('/').next().unwrap_or(&path).to_string(),
    };
    package.imports.insert(alias, path);
}

/// Parses the type spec starting at `lines[start]`, whose text after `type`
/// is `spec`. Returns the index of the last line consumed.
fn parse_type_spec(lines: &[&str], start: usize, spec: &str, package: &mut Package) -> usize {
    let Some(caps) = TYPE_SPEC_REGEX.captures(spec) else {
        return start;
    };
    let name = caps[1].to_string();
    let underlying = caps.get(3).map_or("", |m| m.as_str()).trim();

    let (kind, end) = if underlying.starts_with("struct") {
        let (body, end) = collect_block(lines, start);
        (TypeKind::Struct(parse_fields(&body)), end)
    } else if underlying.starts_with("interface") {
        let (_, end) = collect_block(lines, start);
        (TypeKind::Interface, end)
    } else {
        (TypeKind::Alias(strip_line_comment(underlying).trim().to_string()), start)
    };

    package.types.insert(name.clone(), TypeDecl { name, kind });
    end
}

/// Collects the text between the first `{` on `lines[start]` and its
/// matching `}`. Returns the body and the index of the closing line. Line
/// comments are dropped so braces inside them are not counted.
fn collect_block(lines: &[&str], start: usize) -> (String, usize) {
    let mut body = String::new();
    let mut depth = 0usize;
    let mut opened = false;
    let mut in_tag = false;
    let mut in_string = false;

    for (idx, line) in lines.iter().enumerate().skip(start) {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if in_tag {
                in_tag = c != '`';
                body.push(c);
                continue;
            }
            if in_string {
                body.push(c);
                match c {
                    '\\' => body.extend(chars.next()),
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '/' if chars.peek() == Some(&'/') => break,
                '`' if opened => {
                    in_tag = true;
                    body.push(c);
                }
                '"' if opened => {
                    in_string = true;
                    body.push(c);
                }
                '{' => {
                    if opened {
                        body.push(c);
                    }
                    opened = true;
                    depth += 1;
                }
                '}' if opened => {
                    depth -= 1;
                    if depth == 0 {
                        return (body, idx);
                    }
                    body.push(c);
                }
                _ if opened => body.push(c),
                _ => {}
            }
        }
        // Interpreted strings never span lines.
        in_string = false;
        if opened {
            body.push('\n');
        }
    }
    (body, lines.len().saturating_sub(1))
}

/// Splits a struct body into field declarations at newlines and `;` outside
/// nested braces, dropping `//` comments.
fn split_field_decls(body: &str) -> Vec<String> {
    let mut decls = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_tag = false;
    let mut in_string = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if in_tag {
            in_tag = c != '`';
            current.push(c);
            continue;
        }
        if in_string {
            in_string = c != '"';
            current.push(c);
            continue;
        }
        match c {
            '`' => {
                in_tag = true;
                current.push(c);
            }
            '"' => {
                in_string = true;
                current.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                if depth == 0 {
                    decls.push(std::mem::take(&mut current));
                } else {
                    current.push(' ');
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '\n' | ';' if depth == 0 => decls.push(std::mem::take(&mut current)),
            '\n' => current.push(' '),
            _ => current.push(c),
        }
    }
    decls.push(current);

    decls
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

fn parse_fields(body: &str) -> Vec<FieldDecl> {
    let mut fields = Vec::new();

    for decl in split_field_decls(body) {
        // The field's own tag is the last backtick pair; nested structs carry their own.
        let tagged = decl
            .strip_suffix('`')
            .and_then(|head| head.rfind('`').map(|open| (head, open)));
        let (decl, tag) = match tagged {
            Some((head, open)) => (
                head[..open].trim().to_string(),
                Some(head[open + 1..].to_string()),
            ),
            None => (decl.clone(), None),
        };

        if let Some(caps) = FIELD_NAMES_REGEX.captures(&decl) {
            let type_expr = caps[2].trim().to_string();
            if type_expr.starts_with("func") || type_expr.contains("chan ") {
                continue;
            }
            for name in caps[1].split(',') {
                fields.push(FieldDecl {
                    name: name.trim().to_string(),
                    type_expr: type_expr.clone(),
                    tag: tag.clone(),
                    embedded: false,
                });
            }
        } else {
            let name = decl
                .trim_start_matches('*')
                .rsplit('.')
                .next()
                .unwrap_or(&decl)
                .to_string();
            fields.push(FieldDecl {
                name,
                type_expr: decl.clone(),
                tag,
                embedded: true,
            });
        }
    }

    fields
}

fn strip_line_comment(text: &str) -> &str {
    text.find("//").map_or(text, |idx| &text[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const HANDLER_SOURCE: &str = r#"package handlers

import (
    "net/http"
    m "example.com/app/models"
    _ "embed"
)

import "example.com/app/util"

// Handler groups the endpoints.
type Handler struct {
    svc   *m.Service
    Name, Alias string `json:"name"`
    m.Base
    Meta struct {
        Created int64 `json:"created"`
    } `json:"meta"`
    OnDone func() error
    Link string `json:"link" example:"http://example.com"` // trailing
}

type (
    ID int64
    Named = m.User
    Reader interface {
        Read() error
    }
)

// GetUser godoc
// @Summary fetch a user
//
// @Router /users/{id} [get]
func (h *Handler) GetUser(w http.ResponseWriter, r *http.Request) {}

func helper() {}
"#;

    fn parsed() -> Package {
        let mut package = Package::default();
        parse_go_file(Path::new("handler.go"), HANDLER_SOURCE, &mut package);
        package
    }

    #[test]
    fn test_parse_package_and_imports() {
        let package = parsed();
        assert_eq!(package.name, "handlers");
        assert_eq!(package.imports.get("m").map(String::as_str), Some("example.com/app/models"));
        assert_eq!(package.imports.get("http").map(String::as_str), Some("net/http"));
        assert_eq!(package.imports.get("util").map(String::as_str), Some("example.com/app/util"));
        assert!(!package.imports.contains_key("_"));
    }

    #[test]
    fn test_parse_struct_fields() {
        let package = parsed();
        let TypeKind::Struct(fields) = &package.type_decl("Handler").unwrap().kind else {
            panic!("Handler should be a struct");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["svc", "Name", "Alias", "Base", "Meta", "Link"]);

        let alias = &fields[2];
        assert_eq!(alias.type_expr, "string");
        assert_eq!(alias.tag_value("json"), Some("name"));

        let base = &fields[3];
        assert!(base.embedded);
        assert_eq!(base.type_expr, "m.Base");

        assert!(fields[4].type_expr.starts_with("struct"));
        assert_eq!(fields[4].tag_value("json"), Some("meta"));
        assert_eq!(fields[5].tag_value("example"), Some("http://example.com"));
        assert!(!fields[0].is_exported());
    }

    #[test]
    fn test_parse_grouped_type_decls() {
        let package = parsed();
        assert_eq!(
            package.type_decl("ID").unwrap().kind,
            TypeKind::Alias("int64".to_string())
        );
        assert_eq!(
            package.type_decl("Named").unwrap().kind,
            TypeKind::Alias("m.User".to_string())
        );
        assert_eq!(package.type_decl("Reader").unwrap().kind, TypeKind::Interface);
    }

    #[test]
    fn test_func_comment_blocks() {
        let package = parsed();
        assert_eq!(package.functions.len(), 2);

        let get_user = &package.functions[0];
        assert_eq!(get_user.name, "GetUser");
        assert_eq!(
            get_user.comments,
            vec![
                "// GetUser godoc",
                "// @Summary fetch a user",
                "//",
                "// @Router /users/{id} [get]",
            ]
        );
        assert!(package.functions[1].comments.is_empty());
    }

    #[test]
    fn test_single_line_struct() {
        let mut package = Package::default();
        parse_go_file(
            Path::new("p.go"),
            "package p\ntype Point struct { X int; Y int `json:\"y\"` }\n",
            &mut package,
        );
        let TypeKind::Struct(fields) = &package.type_decl("Point").unwrap().kind else {
            panic!("Point should be a struct");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].tag_value("json"), Some("y"));
    }

    #[test]
    fn test_braces_in_field_comments_do_not_close_struct() {
        let mut package = Package::default();
        parse_go_file(
            Path::new("pet.go"),
            r#"package models

type Pet struct { // fields { ordered }
    // Name uses the format } seen in legacy data
    Name string `json:"name"` // trailing } comment
    Age  int    `json:"age"`
}

type Owner struct {
    Pet Pet `json:"pet"`
}
"#,
            &mut package,
        );

        let TypeKind::Struct(fields) = &package.type_decl("Pet").unwrap().kind else {
            panic!("Pet should be a struct");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "Age"]);
        assert_eq!(fields[1].tag_value("json"), Some("age"));
        assert!(package.type_decl("Owner").is_some());
    }

    #[test]
    fn test_source_tree_resolves_module_imports() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("models")).unwrap();
        fs::create_dir_all(root.join("vendor/github.com/acme/types")).unwrap();
        let mut go_mod = File::create(root.join("go.mod")).unwrap();
        writeln!(go_mod, "module example.com/app\n\ngo 1.21").unwrap();
        let mut model = File::create(root.join("models/user.go")).unwrap();
        writeln!(model, "package models\n\ntype User struct {{\n    ID int `json:\"id\"`\n}}").unwrap();
        File::create(root.join("models/user_test.go")).unwrap();

        let mut tree = GoSourceTree::new(root).unwrap();
        assert_eq!(tree.module_name(), Some("example.com/app"));
        assert_eq!(tree.import_dir("example.com/app/models"), Some(root.join("models")));
        assert_eq!(
            tree.import_dir("github.com/acme/types"),
            Some(root.join("vendor/github.com/acme/types"))
        );
        assert_eq!(tree.import_dir("github.com/acme/other"), None);

        let first = tree.package(&root.join("models")).unwrap();
        let second = tree.package(&root.join("models")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name, "models");
        assert!(first.type_decl("User").is_some());
    }

    #[test]
    fn test_source_tree_resolves_std_and_cached_modules() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("app");
        let goroot = dir.path().join("goroot");
        let mod_cache = dir.path().join("mod");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(goroot.join("src/encoding/json")).unwrap();
        fs::create_dir_all(mod_cache.join("github.com/!google/uuid@v1.6.0")).unwrap();
        fs::create_dir_all(mod_cache.join("gorm.io/gorm@v1.25.5/schema")).unwrap();
        fs::write(
            root.join("go.mod"),
            "module example.com/app\n\ngo 1.21\n\nrequire github.com/Google/uuid v1.6.0\n\nrequire (\n\tgorm.io/gorm v1.25.5 // indirect\n)\n",
        )
        .unwrap();

        let tree = GoSourceTree::new(&root)
            .unwrap()
            .with_goroot(&goroot)
            .with_mod_cache(&mod_cache);

        assert_eq!(
            tree.import_dir("encoding/json"),
            Some(goroot.join("src/encoding/json"))
        );
        assert_eq!(
            tree.import_dir("github.com/Google/uuid"),
            Some(mod_cache.join("github.com/!google/uuid@v1.6.0"))
        );
        assert_eq!(
            tree.import_dir("gorm.io/gorm/schema"),
            Some(mod_cache.join("gorm.io/gorm@v1.25.5/schema"))
        );
        assert_eq!(tree.import_dir("net/http"), None);
        assert_eq!(tree.import_dir("github.com/acme/unpinned"), None);
    }
}
