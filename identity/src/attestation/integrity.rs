//! # Artifact Integrity
//!
//! Measures a file (SHA-256) and checks the measurement against an
//! allow-list manifest:
//!
//! ```json
//! {"artifact": "bin/shell", "measurements": [{"sha256": "ab12...", "label": "v1.4"}]}
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::hash::sha256_hex;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub sha256: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub artifact: PathBuf,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl IntegrityManifest {
    /// An allow-list with nothing on it.
    pub fn empty(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            measurements: Vec::new(),
        }
    }

    pub fn from_json(json: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(json)?)
    }

    pub fn allow(mut self, sha256: impl Into<String>, label: impl Into<String>) -> Self {
        self.measurements.push(Measurement {
            sha256: sha256.into(),
            label: Some(label.into()),
        });
        self
    }
}

/// Result of one measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityStatus {
    pub path: PathBuf,
    pub measurement: String,
    pub allowed: bool,
    /// Labels of every manifest entry the measurement matched.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactIntegrityVerifier {
    artifact: PathBuf,
    manifest: IntegrityManifest,
}

impl ArtifactIntegrityVerifier {
    pub fn new(artifact: impl Into<PathBuf>, manifest: IntegrityManifest) -> Self {
        Self {
            artifact: artifact.into(),
            manifest,
        }
    }

    /// Build from a manifest file. The manifest's `artifact` is the file
    /// to measure, so the manifest has to exist.
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let manifest = IntegrityManifest::from_json(&std::fs::read(manifest_path)?)?;
        debug!(
            manifest = %manifest_path.display(),
            allowed = manifest.measurements.len(),
            "integrity manifest loaded"
        );
        Ok(Self::new(manifest.artifact.clone(), manifest))
    }

    /// Measure `artifact` against the allow-list at `manifest_path`. A
    /// missing manifest is an empty allow-list: every measurement reports
    /// not allowed.
    pub fn for_artifact(
        artifact: impl Into<PathBuf>,
        manifest_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let artifact = artifact.into();
        let manifest_path = manifest_path.as_ref();
        let mut manifest = match std::fs::read(manifest_path) {
            Ok(bytes) => IntegrityManifest::from_json(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    manifest = %manifest_path.display(),
                    "integrity manifest missing, nothing is allowed"
                );
                IntegrityManifest::empty(&artifact)
            }
            Err(e) => return Err(e.into()),
        };
        manifest.artifact = artifact.clone();
        Ok(Self::new(artifact, manifest))
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    /// SHA-256 of the artifact, hex.
    pub fn measure(&self) -> Result<String> {
        Ok(sha256_hex(&std::fs::read(&self.artifact)?))
    }

    pub fn status(&self) -> Result<IntegrityStatus> {
        let measurement = self.measure()?;
        let labels: Vec<String> = self
            .manifest
            .measurements
            .iter()
            .filter(|m| m.sha256.eq_ignore_ascii_case(&measurement))
            .filter_map(|m| m.label.clone())
            .collect();
        let allowed = self
            .manifest
            .measurements
            .iter()
            .any(|m| m.sha256.eq_ignore_ascii_case(&measurement));

        if !allowed {
            warn!(path = %self.artifact.display(), %measurement, "artifact not on allow-list");
        }
        Ok(IntegrityStatus {
            path: self.artifact.clone(),
            measurement,
            allowed,
            labels,
        })
    }
}
