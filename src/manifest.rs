//! Manifest files
//!
//! A manifest is a JSON document holding the `units` mapping:
//!
//! ```text
//! {
//!   "units": {
//!     "example_unit": { "description": "...", "execStart": "/bin/true" }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::deploy::{plan_batch, BatchPlan, PlanError};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Kept as raw JSON so a non-mapping is reported by the planner
    #[serde(default = "empty_units")]
    pub units: Value,
}

fn empty_units() -> Value {
    Value::Object(Default::default())
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        log::debug!("Loaded manifest {}", path.display());
        Self::parse(&text)
    }

    pub fn plan(&self) -> Result<BatchPlan, ManifestError> {
        Ok(plan_batch(&self.units)?)
    }
}
