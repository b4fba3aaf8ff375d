use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use crate::models::OpenAPI;

/// Serializes a finished document.
pub struct Generator;

impl Generator {
    /// Writes `openapi` to `output` as pretty JSON, or YAML when `yaml` is set.
    pub fn write(openapi: &OpenAPI, output: impl AsRef<Path>, yaml: bool) -> Result<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }

        let content = if yaml {
            serde_yaml::to_string(openapi).context("Failed to serialize OpenAPI document to YAML")?
        } else {
            serde_json::to_string_pretty(openapi)
                .context("Failed to serialize OpenAPI document to JSON")?
        };

        fs::write(output, content)
            .with_context(|| format!("Failed to write to file: {:?}", output))?;

        info!(
            "Wrote OpenAPI {} to {:?}",
            if yaml { "YAML" } else { "JSON" },
            output
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Info, Schema};
    use tempfile::tempdir;

    fn document() -> OpenAPI {
        let mut openapi = OpenAPI {
            openapi: "3.0.3".to_string(),
            info: Info {
                title: "Pets".to_string(),
                version: "1.0".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        openapi
            .components
            .schemas
            .insert("models.Pet".to_string(), Schema::object());
        openapi
    }

    #[test]
    fn test_write_json_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("docs/nested/oas.json");

        Generator::write(&document(), &output, false).unwrap();

        let written: OpenAPI = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written, document());
    }

    #[test]
    fn test_write_yaml() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("oas.yaml");

        Generator::write(&document(), &output, true).unwrap();

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.contains("openapi:"));
        assert!(content.contains("3.0.3"));
        assert!(content.contains("models.Pet:"));
    }
}
