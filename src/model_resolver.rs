//! Resolution of model artifact names to model bytes.
//!
//! A name is looked up first in the packaged resource bundle under [`MODEL_NAMESPACE`],
//! then in the model directory on disk. The directory lookup never leaves the
//! directory: names that would resolve outside of it are rejected before any
//! byte is read.

use crate::error::{FlfmError, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Virtual directory of the packaged bundle that holds the model artifacts.
pub const MODEL_NAMESPACE: &str = "models/";

/// Read-only set of named resources shipped with the application.
pub trait ResourceBundle: Send + Sync {
    /// Bytes of the resource at `path`, if it exists.
    fn open(&self, path: &str) -> Option<Vec<u8>>;

    /// Paths of all resources in the bundle.
    fn entries(&self) -> Vec<String>;
}

/// Resource bundle held in memory, typically built from `include_bytes!`.
#[derive(Clone, Debug, Default)]
pub struct EmbeddedBundle {
    resources: BTreeMap<String, Cow<'static, [u8]>>,
}

impl EmbeddedBundle {
    pub fn new() -> Self {
        EmbeddedBundle::default()
    }

    pub fn from_static(resources: &[(&str, &'static [u8])]) -> Self {
        let mut bundle = EmbeddedBundle::new();
        for (path, bytes) in resources {
            bundle
                .resources
                .insert(path.to_string(), Cow::Borrowed(*bytes));
        }
        bundle
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.resources.insert(path.into(), Cow::Owned(bytes));
    }
}

impl ResourceBundle for EmbeddedBundle {
    fn open(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path).map(|bytes| bytes.to_vec())
    }

    fn entries(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }
}

/// Where the bytes of a model artifact came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    Packaged(String),
    File(PathBuf),
}

/// A serialized model, loaded for a single inference call.
#[derive(Clone, Debug)]
pub struct ModelArtifact {
    pub name: String,
    pub source: ModelSource,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ModelResolver {
    bundle: Option<Arc<dyn ResourceBundle>>,
    base_dir: PathBuf,
}

impl ModelResolver {
    pub fn new(bundle: Option<Arc<dyn ResourceBundle>>, base_dir: impl Into<PathBuf>) -> Self {
        ModelResolver {
            bundle,
            base_dir: base_dir.into(),
        }
    }

    pub fn bundle(&self) -> Option<&Arc<dyn ResourceBundle>> {
        self.bundle.as_ref()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves `name` and reads the model bytes.
    ///
    /// # Errors
    /// - `InvalidArgument` for an empty name.
    /// - `SecurityViolation` if the name resolves outside the model directory.
    /// - `NotFound` if neither the bundle nor the directory holds the model.
    pub fn resolve(&self, name: &str) -> Result<ModelArtifact> {
        if name.is_empty() {
            return Err(FlfmError::InvalidArgument("empty model name".to_string()));
        }

        if let Some(bundle) = &self.bundle {
            let path = format!("{MODEL_NAMESPACE}{name}");
            if let Some(bytes) = bundle.open(&path) {
                log::debug!("loading model {name} from packaged resources");
                return Ok(ModelArtifact {
                    name: name.to_string(),
                    source: ModelSource::Packaged(path),
                    bytes,
                });
            }
        }

        let path = self.sandboxed_path(name)?;
        log::debug!("loading model {name} from {}", path.display());
        let bytes = fs::read(&path).map_err(|e| not_found_or_io(e, &path))?;
        Ok(ModelArtifact {
            name: name.to_string(),
            source: ModelSource::File(path),
            bytes,
        })
    }

    /// Canonical path of `name` inside the model directory.
    fn sandboxed_path(&self, name: &str) -> Result<PathBuf> {
        // checked before touching the filesystem so that missing targets and a
        // missing model directory are rejected too
        let lexical_base = std::path::absolute(&self.base_dir)?;
        match lexical_join(&lexical_base, name) {
            Some(candidate) if candidate.starts_with(&lexical_base) => {}
            _ => return Err(traversal(name)),
        }

        let base = fs::canonicalize(&self.base_dir).map_err(|e| {
            not_found_or_io(e, &self.base_dir)
        })?;
        let candidate = match lexical_join(&base, name) {
            Some(candidate) if candidate.starts_with(&base) => candidate,
            _ => return Err(traversal(name)),
        };

        let canonical = fs::canonicalize(&candidate).map_err(|e| not_found_or_io(e, &candidate))?;
        // symlinks inside the directory may still point elsewhere
        if !canonical.starts_with(&base) {
            return Err(traversal(name));
        }
        if !canonical.is_file() {
            return Err(FlfmError::NotFound(format!(
                "model {} is not a file",
                canonical.display()
            )));
        }
        Ok(canonical)
    }
}

fn traversal(name: &str) -> FlfmError {
    log::error!("potential path traversal attempt detected: {name}");
    FlfmError::SecurityViolation(format!("model name '{name}' escapes the model directory"))
}

fn not_found_or_io(err: std::io::Error, path: &Path) -> FlfmError {
    if err.kind() == ErrorKind::NotFound {
        FlfmError::NotFound(path.display().to_string())
    } else {
        FlfmError::Io(err)
    }
}

/// Joins `name` onto `base`, resolving `.` and `..` without touching the filesystem.
/// Returns `None` for absolute names.
fn lexical_join(base: &Path, name: &str) -> Option<PathBuf> {
    let mut joined = base.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                joined.pop();
            }
            Component::Normal(part) => joined.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(joined)
}
