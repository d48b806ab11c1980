//! Discovery of the available model artifacts and of the iteration numbers the user picks from.
//!
//! Artifact names carry the training iteration of the model as the digits of the
//! name (`flfm_100.onnx` is iteration 100).

use crate::error::Result;
use crate::model_resolver::{ResourceBundle, MODEL_NAMESPACE};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Model artifacts sorted by iteration number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    artifacts: Vec<String>,
}

impl ModelCatalog {
    pub fn new(mut artifacts: Vec<String>) -> Self {
        artifacts.sort_by(|a, b| {
            sort_key(a)
                .cmp(&sort_key(b))
                .then_with(|| a.cmp(b))
        });
        ModelCatalog { artifacts }
    }

    /// Lists the model artifacts with the given extension.
    ///
    /// Exactly one source is used: the packaged bundle if there is one, otherwise
    /// the files directly inside `dir`. A missing directory yields an empty catalog.
    pub fn discover(
        bundle: Option<&dyn ResourceBundle>,
        dir: &Path,
        extension: &str,
    ) -> Result<Self> {
        let suffix = format!(".{extension}");
        let names: Vec<String> = match bundle {
            Some(bundle) => bundle
                .entries()
                .into_iter()
                .filter_map(|entry| {
                    entry
                        .strip_prefix(MODEL_NAMESPACE)
                        .filter(|name| name.ends_with(&suffix) && name.len() > suffix.len())
                        .map(str::to_string)
                })
                .collect(),
            None => match fs::read_dir(dir) {
                Ok(entries) => {
                    let mut names = vec![];
                    for entry in entries {
                        let path = entry?.path();
                        if !path.is_file()
                            || path.extension().and_then(|e| e.to_str()) != Some(extension)
                        {
                            continue;
                        }
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            names.push(name.to_string());
                        }
                    }
                    names
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    log::warn!("model directory {} does not exist", dir.display());
                    vec![]
                }
                Err(err) => return Err(err.into()),
            },
        };

        let catalog = ModelCatalog::new(names);
        log::debug!("found {} model locations", catalog.len());
        Ok(catalog)
    }

    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Distinct iteration numbers, ascending, as shown to the user.
    pub fn iterations(&self) -> Vec<String> {
        let mut iterations: Vec<u64> = self
            .artifacts
            .iter()
            .filter_map(|name| iteration_number(name))
            .collect();
        iterations.dedup();
        iterations.iter().map(u64::to_string).collect()
    }

    /// First artifact of the given iteration.
    pub fn artifact_for_iteration(&self, iteration: u64) -> Option<&str> {
        self.artifacts
            .iter()
            .find(|name| iteration_number(name) == Some(iteration))
            .map(String::as_str)
    }

    /// Artifact behind entry `index` of [`ModelCatalog::iterations`].
    pub fn artifact_for_iteration_index(&self, index: usize) -> Option<&str> {
        let iteration = self.iterations().get(index)?.parse().ok()?;
        self.artifact_for_iteration(iteration)
    }
}

/// The number formed by all digits of `name`, if it has any.
pub fn iteration_number(name: &str) -> Option<u64> {
    let digits: String = name.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

// names without an iteration go last
fn sort_key(name: &str) -> (bool, u64) {
    match iteration_number(name) {
        Some(iteration) => (false, iteration),
        None => (true, 0),
    }
}
