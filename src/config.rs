use std::path::{Path, PathBuf};

/// Options consumed by the directive parser, the resolver and the final
/// document passes.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Root of the Go module. Only packages below it are scanned.
    pub module_path: PathBuf,
    /// Optional sub-directory of the module holding the handlers.
    pub handler_path: Option<PathBuf>,
    /// Keep only operations carrying this tag.
    pub filter_tag: Option<String>,
    /// Register schemas under their bare type name instead of `pkg.Type`.
    pub schema_without_pkg: bool,
    /// Abort the whole run on the first declaration error.
    pub strict: bool,
}

impl Config {
    pub fn new(module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: module_path.into(),
            ..Default::default()
        }
    }

    pub fn with_handler_path(mut self, handler_path: impl Into<PathBuf>) -> Self {
        self.handler_path = Some(handler_path.into());
        self
    }

    pub fn with_filter_tag(mut self, tag: impl Into<String>) -> Self {
        self.filter_tag = Some(tag.into());
        self
    }

    pub fn with_schema_without_pkg(mut self, enabled: bool) -> Self {
        self.schema_without_pkg = enabled;
        self
    }

    pub fn with_strict(mut self, enabled: bool) -> Self {
        self.strict = enabled;
        self
    }

    /// Whether declarations from `pkg_path` are in scope.
    pub fn covers(&self, pkg_path: &Path) -> bool {
        if !pkg_path.starts_with(&self.module_path) {
            return false;
        }
        match &self.handler_path {
            Some(handler_path) if handler_path.starts_with(&self.module_path) => {
                pkg_path.starts_with(handler_path)
            }
            Some(handler_path) => pkg_path.starts_with(self.module_path.join(handler_path)),
            None => true,
        }
    }

    pub fn filter_tag(&self) -> Option<&str> {
        self.filter_tag.as_deref().filter(|tag| !tag.is_empty())
    }
}
