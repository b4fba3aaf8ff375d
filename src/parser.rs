use anyhow::{Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::assembler;
use crate::config::Config;
use crate::error::ParserError;
use crate::models::{Contact, License, OpenAPI, ParsedApiInfo, Server};
use crate::operations::OperationParser;
use crate::source::{is_go_source, GoSourceTree, SourceTree};
use crate::store::Store;

static ANNOTATION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^//\s*@(\w+)(?:\.(\w+))?\s*(.*)$").unwrap());

static FUNC_START_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^func\b").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationType {
    Title,
    Version,
    Description,
    TermsOfService,
    Contact,
    License,
    Server,
    Unknown(String),
}

impl From<&str> for AnnotationType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "title" => Self::Title,
            "version" => Self::Version,
            "description" => Self::Description,
            "termsofservice" => Self::TermsOfService,
            "contact" => Self::Contact,
            "license" => Self::License,
            "server" => Self::Server,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

/// Scans a Go module and builds the OpenAPI document from its handlers.
pub struct GoParser<S: SourceTree = GoSourceTree> {
    operations: OperationParser<S>,
}

impl GoParser<GoSourceTree> {
    pub fn new(config: Config) -> Result<Self> {
        let tree = GoSourceTree::new(&config.module_path)
            .with_context(|| format!("Failed to read module at {:?}", config.module_path))?;
        Ok(Self::with_tree(config, tree))
    }
}

impl<S: SourceTree> GoParser<S> {
    pub fn with_tree(config: Config, tree: S) -> Self {
        Self {
            operations: OperationParser::new(config, tree),
        }
    }

    pub fn config(&self) -> &Config {
        self.operations.config()
    }

    /// Reads document-level metadata from the comments above the first
    /// function of `file_path`.
    pub fn parse_general_api_info(&self, file_path: impl AsRef<Path>) -> Result<ParsedApiInfo> {
        let file_path = file_path.as_ref();
        debug!("Parsing general API info from file: {:?}", file_path);

        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {:?}", file_path))?;
        let reader = BufReader::new(file);

        let mut api_info = ParsedApiInfo::default();
        let mut contact = Contact::default();
        let mut license = License::default();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if FUNC_START_REGEX.is_match(line) {
                break;
            }
            let Some(captures) = ANNOTATION_REGEX.captures(line) else {
                continue;
            };
            let attribute = captures.get(2).map(|m| m.as_str());
            let value = captures[3].trim().to_string();

            match AnnotationType::from(&captures[1]) {
                AnnotationType::Title => api_info.info.title = value,
                AnnotationType::Version => api_info.info.version = value,
                AnnotationType::Description => {
                    api_info.info.description = Some(match api_info.info.description.take() {
                        Some(existing) => format!("{} {}", existing, value),
                        None => value,
                    });
                }
                AnnotationType::TermsOfService => api_info.info.termsOfService = Some(value),
                AnnotationType::Contact => match attribute {
                    Some("name") => contact.name = Some(value),
                    Some("url") => contact.url = Some(value),
                    Some("email") => contact.email = Some(value),
                    other => warn!("Unknown contact attribute: {:?}", other),
                },
                AnnotationType::License => match attribute {
                    Some("name") => license.name = value,
                    Some("url") => license.url = Some(value),
                    other => warn!("Unknown license attribute: {:?}", other),
                },
                AnnotationType::Server => {
                    if let Some(server) = parse_server(&value) {
                        api_info.servers.push(server);
                    }
                }
                AnnotationType::Unknown(name) => debug!("Ignoring general annotation @{}", name),
            }
        }

        if contact.name.is_some() || contact.url.is_some() || contact.email.is_some() {
            api_info.info.contact = Some(contact);
        }
        if !license.name.is_empty() {
            api_info.info.license = Some(license);
        }
        if api_info.info.title.is_empty() {
            warn!("No @title found in {:?}", file_path);
        }

        Ok(api_info)
    }

    /// Feeds every function of every in-scope package to the directive
    /// parser. Returns the number of operations registered.
    pub fn parse_operations(&mut self, store: &mut Store) -> Result<usize> {
        let config = self.config().clone();
        let mut registered = 0;

        for dir in collect_package_dirs(&config.module_path) {
            if !config.covers(&dir) {
                continue;
            }
            let package = self
                .operations
                .resolver_mut()
                .tree_mut()
                .package(&dir)
                .with_context(|| format!("Failed to load package at {:?}", dir))?;

            for func in &package.functions {
                match self.operations.parse(store, &package, &func.comments) {
                    Ok(true) => {
                        debug!("Registered operation from {}", func.name);
                        registered += 1;
                    }
                    Ok(false) => {}
                    Err(ParserError::IOError(e)) => {
                        return Err(e).with_context(|| {
                            format!("Failed to read sources for {} in {:?}", func.name, func.file)
                        });
                    }
                    Err(e) if config.strict => {
                        return Err(e).with_context(|| {
                            format!("Failed to parse {} in {:?}", func.name, func.file)
                        });
                    }
                    Err(e) => warn!("Skipping {} in {:?}: {}", func.name, func.file, e),
                }
            }
        }

        info!("Parsed {} operations", registered);
        Ok(registered)
    }

    /// Runs the whole pipeline and returns the finished document.
    pub fn build(mut self, api_info: ParsedApiInfo) -> Result<OpenAPI> {
        let mut store = Store::with_info(api_info.info, api_info.servers);
        self.parse_operations(&mut store)?;
        assembler::finalize(&mut store, self.config());
        debug!("Registered {} schemas", store.registry.len());
        Ok(store.into_document())
    }
}

/// `<url> [description]`; invalid URLs are skipped.
fn parse_server(value: &str) -> Option<Server> {
    let (url, description) = match value.split_once(char::is_whitespace) {
        Some((url, description)) => (url, Some(description.trim().to_string())),
        None => (value, None),
    };
    if let Err(e) = url::Url::parse(url) {
        warn!("Skipping server with invalid url {}: {}", url, e);
        return None;
    }
    Some(Server {
        url: url.to_string(),
        description: description.filter(|d| !d.is_empty()),
    })
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "vendor"
}

/// Directories under `root` holding at least one Go source file.
fn collect_package_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_go_source(e.path()))
        .filter_map(|e| e.path().parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}
