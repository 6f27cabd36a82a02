//! Task manifests
//!
//! A manifest describes what a worker should run. It is loaded from YAML or
//! JSON, validated field by field (every issue is reported with its JSON
//! pointer), and only then turned into a typed [`Manifest`].
//!
//! ```yaml
//! apiVersion: wpok/v1
//! kind: Task
//! metadata:
//!   name: resize-images
//!   workId: nightly-resize      # optional, generated when absent
//! spec:
//!   image: ghcr.io/acme/resize
//!   command: [resize, --width, "800"]
//!   input: s3://images/raw/
//!   output: s3://images/resized/
//!   batch:
//!     inputs: [s3://images/raw/a.png, s3://images/raw/b.png]
//! ```

use crate::task::WorkId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use wpok_foundation::{Error, Result};

pub const API_VERSION: &str = "wpok/v1";
pub const KIND_TASK: &str = "Task";

/// Largest `spec.batch.count` accepted
pub const MAX_BATCH_COUNT: u64 = 10_000;

// ============================================================================
// Errors
// ============================================================================

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// JSON pointer of the offending value (`""` is the document root)
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() {
            "(root)"
        } else {
            &self.path
        };
        write!(f, "{} {}", path, self.message)
    }
}

/// Manifest failed schema validation
#[derive(Debug, Clone, Error)]
#[error("manifest is invalid ({} issue(s))", .issues.len())]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

/// Failure to obtain a valid manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl ManifestError {
    /// Per-field issues, empty unless validation failed
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            ManifestError::Invalid(err) => &err.issues,
            _ => &[],
        }
    }
}

// ============================================================================
// Typed manifest
// ============================================================================

/// A validated task manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: TaskSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSpec>,
}

/// How a batch fans out: one task per input URL, or `count` identical tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// One planned task of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub index: usize,
    pub input: Option<String>,
}

impl Manifest {
    /// The work id named by the manifest, or a freshly generated one
    pub fn resolve_work_id(&self) -> Result<WorkId> {
        match &self.metadata.work_id {
            Some(id) => WorkId::parse(id.clone()),
            None => Ok(WorkId::generate()),
        }
    }

    /// Manifest of a single batch member: its own input, no batch section
    pub fn for_batch_item(&self, item: &BatchItem) -> Manifest {
        let mut manifest = self.clone();
        manifest.spec.batch = None;
        if item.input.is_some() {
            manifest.spec.input = item.input.clone();
        }
        manifest
    }
}

/// Expand the batch section into one item per task
pub fn plan_batch(manifest: &Manifest) -> Result<Vec<BatchItem>> {
    let batch = manifest.spec.batch.as_ref().ok_or_else(|| {
        Error::InvalidInput(format!(
            "manifest '{}' has no spec.batch section",
            manifest.metadata.name
        ))
    })?;

    match (&batch.inputs, batch.count) {
        (Some(inputs), None) if !inputs.is_empty() => Ok(inputs
            .iter()
            .enumerate()
            .map(|(index, input)| BatchItem {
                index,
                input: Some(input.clone()),
            })
            .collect()),
        (None, Some(count)) if count > 0 => {
            let count = usize::try_from(count)
                .ok()
                .filter(|_| count <= MAX_BATCH_COUNT)
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "spec.batch.count {} exceeds the limit of {}",
                        count, MAX_BATCH_COUNT
                    ))
                })?;
            Ok((0..count)
                .map(|index| BatchItem {
                    index,
                    input: manifest.spec.input.clone(),
                })
                .collect())
        }
        _ => Err(Error::InvalidInput(
            "spec.batch needs either a non-empty inputs list or a positive count".to_string(),
        )),
    }
}

// ============================================================================
// S3 URLs
// ============================================================================

/// `s3://bucket/key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Url {
    pub bucket: String,
    pub key: String,
}

/// Parse an `s3://bucket[/key]` URL
pub fn parse_s3_url(url: &str) -> Result<S3Url> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| Error::Validation(format!("'{}' is not an s3:// URL", url)))?;

    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(Error::Validation(format!("'{}' has no bucket", url)));
    }

    Ok(S3Url {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

// ============================================================================
// Loading
// ============================================================================

/// Read a manifest document: `.json` files as JSON, everything else as YAML
pub fn load_manifest(path: &Path) -> std::result::Result<Value, ManifestError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<Value>(&raw).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| ManifestError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Read and validate a manifest
pub fn load_and_validate_manifest(path: &Path) -> std::result::Result<Manifest, ManifestError> {
    let document = load_manifest(path)?;
    Ok(validate_manifest(&document)?)
}

// ============================================================================
// Validation
// ============================================================================

struct Checker {
    issues: Vec<ValidationIssue>,
}

impl Checker {
    fn issue(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn object<'a>(&mut self, parent: &'a Map<String, Value>, path: &str, key: &str) -> Option<&'a Map<String, Value>> {
        match parent.get(key) {
            None => {
                self.issue(path, format!("must have required property '{}'", key));
                None
            }
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                self.issue(&format!("{}/{}", path, key), "must be object");
                None
            }
        }
    }

    fn required_string(&mut self, parent: &Map<String, Value>, path: &str, key: &str) -> Option<String> {
        match parent.get(key) {
            None => {
                self.issue(path, format!("must have required property '{}'", key));
                None
            }
            Some(value) => self.string(value, &format!("{}/{}", path, key)),
        }
    }

    fn string(&mut self, value: &Value, path: &str) -> Option<String> {
        match value.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s.to_string()),
            Some(_) => {
                self.issue(path, "must not be empty");
                None
            }
            None => {
                self.issue(path, "must be string");
                None
            }
        }
    }

    fn s3_url(&mut self, value: &Value, path: &str) {
        if let Some(url) = self.string(value, path) {
            if let Err(err) = parse_s3_url(&url) {
                self.issue(path, format!("must be an s3 URL ({})", err));
            }
        }
    }

    fn exact(&mut self, parent: &Map<String, Value>, path: &str, key: &str, expected: &str) {
        if let Some(value) = self.required_string(parent, path, key) {
            if value != expected {
                self.issue(
                    &format!("{}/{}", path, key),
                    format!("must be equal to '{}'", expected),
                );
            }
        }
    }
}

/// Validate a manifest document, collecting every issue
pub fn validate_manifest(document: &Value) -> std::result::Result<Manifest, ValidationError> {
    let mut checker = Checker { issues: Vec::new() };

    let Some(root) = document.as_object() else {
        checker.issue("", "must be object");
        return Err(ValidationError {
            issues: checker.issues,
        });
    };

    checker.exact(root, "", "apiVersion", API_VERSION);
    checker.exact(root, "", "kind", KIND_TASK);

    if let Some(metadata) = checker.object(root, "", "metadata") {
        checker.required_string(metadata, "/metadata", "name");
        if let Some(value) = metadata.get("workId") {
            if let Some(work_id) = checker.string(value, "/metadata/workId") {
                if let Err(err) = WorkId::parse(work_id) {
                    checker.issue("/metadata/workId", err.to_string());
                }
            }
        }
    }

    if let Some(spec) = checker.object(root, "", "spec") {
        validate_spec(&mut checker, spec);
    }

    if !checker.issues.is_empty() {
        return Err(ValidationError {
            issues: checker.issues,
        });
    }

    serde_json::from_value(document.clone()).map_err(|e| ValidationError {
        issues: vec![ValidationIssue {
            path: String::new(),
            message: e.to_string(),
        }],
    })
}

fn validate_spec(checker: &mut Checker, spec: &Map<String, Value>) {
    checker.required_string(spec, "/spec", "image");

    if let Some(command) = spec.get("command") {
        match command.as_array() {
            Some(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if !part.is_string() {
                        checker.issue(&format!("/spec/command/{}", i), "must be string");
                    }
                }
            }
            None => checker.issue("/spec/command", "must be array"),
        }
    }

    if let Some(env) = spec.get("env") {
        match env.as_object() {
            Some(vars) => {
                for (key, value) in vars {
                    if !value.is_string() {
                        checker.issue(&format!("/spec/env/{}", key), "must be string");
                    }
                }
            }
            None => checker.issue("/spec/env", "must be object"),
        }
    }

    for key in ["input", "output"] {
        if let Some(value) = spec.get(key) {
            checker.s3_url(value, &format!("/spec/{}", key));
        }
    }

    if let Some(timeout) = spec.get("timeoutSec") {
        if timeout.as_u64().is_none() {
            checker.issue("/spec/timeoutSec", "must be a non-negative integer");
        }
    }

    if let Some(batch) = spec.get("batch") {
        let Some(batch) = batch.as_object() else {
            checker.issue("/spec/batch", "must be object");
            return;
        };

        match (batch.get("inputs"), batch.get("count")) {
            (Some(_), Some(_)) => checker.issue("/spec/batch", "must not have both 'inputs' and 'count'"),
            (None, None) => checker.issue("/spec/batch", "must have either 'inputs' or 'count'"),
            (Some(inputs), None) => match inputs.as_array() {
                Some(list) if list.is_empty() => {
                    checker.issue("/spec/batch/inputs", "must not be empty")
                }
                Some(list) => {
                    for (i, input) in list.iter().enumerate() {
                        checker.s3_url(input, &format!("/spec/batch/inputs/{}", i));
                    }
                }
                None => checker.issue("/spec/batch/inputs", "must be array"),
            },
            (None, Some(count)) => match count.as_u64() {
                Some(n) if n > MAX_BATCH_COUNT => checker.issue(
                    "/spec/batch/count",
                    format!("must be <= {}", MAX_BATCH_COUNT),
                ),
                Some(n) if n > 0 => {}
                _ => checker.issue("/spec/batch/count", "must be a positive integer"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_document() -> Value {
        json!({
            "apiVersion": "wpok/v1",
            "kind": "Task",
            "metadata": {"name": "resize", "workId": "nightly"},
            "spec": {
                "image": "ghcr.io/acme/resize",
                "command": ["resize", "--width", "800"],
                "env": {"MODE": "fast"},
                "input": "s3://images/raw/",
                "batch": {"inputs": ["s3://images/raw/a.png", "s3://images/raw/b.png"]}
            }
        })
    }

    #[test]
    fn test_valid_manifest() {
        let manifest = validate_manifest(&valid_document()).expect("manifest should be valid");
        assert_eq!(manifest.metadata.name, "resize");
        assert_eq!(manifest.spec.command.len(), 3);
        assert_eq!(manifest.resolve_work_id().unwrap().as_str(), "nightly");
    }

    #[test]
    fn test_reports_every_issue_with_path() {
        let document = json!({
            "apiVersion": "wpok/v2",
            "metadata": {"name": ""},
            "spec": {
                "command": "resize",
                "input": "http://example.com/x",
                "timeoutSec": -5,
                "batch": {"inputs": [], "count": 2}
            }
        });

        let err = validate_manifest(&document).unwrap_err();
        let rendered: Vec<String> = err.issues.iter().map(|i| i.to_string()).collect();

        assert!(rendered.contains(&"/apiVersion must be equal to 'wpok/v1'".to_string()));
        assert!(rendered.contains(&"(root) must have required property 'kind'".to_string()));
        assert!(rendered.contains(&"/metadata/name must not be empty".to_string()));
        assert!(rendered.contains(&"/spec must have required property 'image'".to_string()));
        assert!(rendered.contains(&"/spec/command must be array".to_string()));
        assert!(rendered
            .iter()
            .any(|r| r.starts_with("/spec/input must be an s3 URL")));
        assert!(rendered.contains(&"/spec/timeoutSec must be a non-negative integer".to_string()));
        assert!(rendered.contains(&"/spec/batch must not have both 'inputs' and 'count'".to_string()));
    }

    #[test]
    fn test_root_must_be_object() {
        let err = validate_manifest(&json!(["not", "a", "manifest"])).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].to_string(), "(root) must be object");
    }

    #[test]
    fn test_plan_batch_from_inputs() {
        let manifest = validate_manifest(&valid_document()).unwrap();
        let items = plan_batch(&manifest).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].input.as_deref(), Some("s3://images/raw/b.png"));

        let member = manifest.for_batch_item(&items[1]);
        assert!(member.spec.batch.is_none());
        assert_eq!(member.spec.input.as_deref(), Some("s3://images/raw/b.png"));
    }

    #[test]
    fn test_plan_batch_from_count() {
        let mut document = valid_document();
        document["spec"]["batch"] = json!({"count": 3});
        let manifest = validate_manifest(&document).unwrap();

        let items = plan_batch(&manifest).unwrap();
        assert_eq!(items.len(), 3);
        assert!(items
            .iter()
            .all(|item| item.input.as_deref() == Some("s3://images/raw/")));
    }

    #[test]
    fn test_plan_batch_requires_batch_section() {
        let mut document = valid_document();
        document["spec"].as_object_mut().unwrap().remove("batch");
        let manifest = validate_manifest(&document).unwrap();
        assert!(matches!(plan_batch(&manifest), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_batch_count_is_bounded() {
        let mut document = valid_document();
        document["spec"]["batch"] = json!({"count": u64::MAX});
        let err = validate_manifest(&document).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].path, "/spec/batch/count");
        assert_eq!(
            err.issues[0].message,
            format!("must be <= {}", MAX_BATCH_COUNT)
        );

        document["spec"]["batch"] = json!({"count": MAX_BATCH_COUNT});
        let manifest = validate_manifest(&document).unwrap();
        assert_eq!(plan_batch(&manifest).unwrap().len(), MAX_BATCH_COUNT as usize);

        // Constructed directly, skipping validation
        let mut manifest = manifest;
        manifest.spec.batch = Some(BatchSpec {
            inputs: None,
            count: Some(u64::MAX),
        });
        assert!(matches!(plan_batch(&manifest), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_parse_s3_url() {
        let url = parse_s3_url("s3://bucket/path/to/key").unwrap();
        assert_eq!(url.bucket, "bucket");
        assert_eq!(url.key, "path/to/key");
        assert_eq!(parse_s3_url("s3://bucket").unwrap().key, "");
        assert!(parse_s3_url("s3:///key").is_err());
        assert!(parse_s3_url("gs://bucket/key").is_err());
    }

    #[test]
    fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("task.yaml");
        std::fs::write(
            &yaml_path,
            "apiVersion: wpok/v1\nkind: Task\nmetadata:\n  name: hello\nspec:\n  image: alpine\n",
        )
        .unwrap();
        let manifest = load_and_validate_manifest(&yaml_path).unwrap();
        assert_eq!(manifest.spec.image, "alpine");

        let json_path = dir.path().join("task.JSON");
        std::fs::write(&json_path, valid_document().to_string()).unwrap();
        assert!(load_and_validate_manifest(&json_path).is_ok());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(matches!(
            load_and_validate_manifest(&broken),
            Err(ManifestError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load_manifest(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
        assert!(err.issues().is_empty());
    }
}
