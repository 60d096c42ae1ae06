//! KubeOne manifest rendering
//!
//! Manifests are minijinja templates. The only helper is
//! `required(message, value)`, which aborts the render with `message` when
//! `value` is missing or empty:
//!
//! ```text
//! versions:
//!   kubernetes: "{{ required("VERSION is required", VERSION) }}"
//! ```

use minijinja::value::Value;
use minijinja::{Environment, Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::E2eError;
use crate::Result;

/// Values injected into manifest templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    /// Target Kubernetes version
    #[serde(rename = "VERSION")]
    pub version: String,
}

impl ManifestData {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

/// Template helper: fail with `message` unless `value` is set and non-empty.
fn required(message: String, value: Value) -> std::result::Result<Value, Error> {
    if value.is_undefined() || value.is_none() || value.as_str() == Some("") {
        return Err(Error::new(ErrorKind::InvalidOperation, message));
    }
    Ok(value)
}

/// Renders manifest templates into files under one directory.
#[derive(Debug, Clone)]
pub struct ManifestRenderer {
    dir: PathBuf,
}

impl ManifestRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn environment() -> Environment<'static> {
        let mut env = Environment::new();
        env.add_function("required", required);
        env
    }

    /// Expand `template_source` against `data`.
    pub fn render_to_string(template_source: &str, data: &ManifestData) -> Result<String> {
        Self::environment()
            .render_str(template_source, data)
            .map_err(|e| E2eError::Template(describe(&e)))
    }

    /// Expand `template_source` and write it to a fresh `kubeone-*.yaml` file.
    pub fn render(&self, template_source: &str, data: &ManifestData) -> Result<PathBuf> {
        let rendered = Self::render_to_string(template_source, data)?;
        let path = write_manifest(&self.dir, rendered.as_bytes())?;
        debug!(path = %path.display(), "Rendered manifest");
        Ok(path)
    }
}

/// Error text including the `required` message, which minijinja keeps in
/// the error detail.
fn describe(err: &Error) -> String {
    match err.detail() {
        Some(detail) => format!("{} ({})", detail, err.kind()),
        None => err.to_string(),
    }
}

fn write_manifest(dir: &Path, contents: &[u8]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("kubeone-")
        .suffix(".yaml")
        .tempfile_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    let (_, path) = file.keep().map_err(|e| E2eError::Io(e.error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEMPLATE: &str = r#"apiVersion: kubeone.k8c.io/v1beta2
kind: KubeOneCluster
versions:
  kubernetes: "{{ required("VERSION is required", VERSION) }}"
"#;

    #[test]
    fn test_render_substitutes_version() {
        let out = ManifestRenderer::render_to_string(TEMPLATE, &ManifestData::new("1.27.3")).unwrap();
        assert!(out.contains(r#"kubernetes: "1.27.3""#));
    }

    #[test]
    fn test_required_rejects_empty() {
        let err = ManifestRenderer::render_to_string(TEMPLATE, &ManifestData::default()).unwrap_err();
        assert!(matches!(err, E2eError::Template(_)));
        assert!(err.to_string().contains("VERSION is required"), "{}", err);
    }

    #[test]
    fn test_required_rejects_undefined() {
        let tpl = r#"{{ required("CLUSTER_NAME must be set", CLUSTER_NAME) }}"#;
        let err = ManifestRenderer::render_to_string(tpl, &ManifestData::new("1.27.3")).unwrap_err();
        assert!(err.to_string().contains("CLUSTER_NAME must be set"), "{}", err);
    }

    #[test]
    fn test_syntax_error_is_template_error() {
        let err = ManifestRenderer::render_to_string("{{ VERSION", &ManifestData::new("1.27.3")).unwrap_err();
        assert!(matches!(err, E2eError::Template(_)));
    }

    #[test]
    fn test_render_writes_file() {
        let dir = tempdir().unwrap();
        let renderer = ManifestRenderer::new(dir.path());

        let path = renderer.render(TEMPLATE, &ManifestData::new("1.28.0")).unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("kubeone-") && name.ends_with(".yaml"), "{}", name);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("1.28.0"));
    }

    #[test]
    fn test_render_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        let renderer = ManifestRenderer::new(dir.path());

        assert!(renderer.render(TEMPLATE, &ManifestData::default()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
