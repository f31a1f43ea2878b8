use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ensemble::EnsembleConfig;
use crate::error::{EnsembleError, EnsembleResult};

/// Sessions assumed when a subject lists none: S2..=S19.
const DEFAULT_SESSIONS: std::ops::Range<usize> = 2..20;

/// Batch description: one entry per subject with its own significance mask.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchManifest {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    /// Shared settings; each subject overrides only the mask
    #[serde(default)]
    pub config: EnsembleConfig,
    pub subjects: Vec<SubjectEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjectEntry {
    pub name: String,
    pub mask: Vec<u8>,
    #[serde(default)]
    pub sessions: Vec<String>,
    /// Defaults to `<input_root>/KALMAN_<name>`
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
}

impl BatchManifest {
    pub fn from_path(path: &Path) -> EnsembleResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let manifest: BatchManifest = serde_json::from_str(&text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> EnsembleResult<()> {
        if self.subjects.is_empty() {
            return Err(EnsembleError::config("Manifest lists no subjects"));
        }
        for subject in &self.subjects {
            self.subject_config(subject)
                .validate()
                .map_err(|e| e.context(&format!("Subject '{}'", subject.name)))?;
        }
        Ok(())
    }

    pub fn subject_config(&self, subject: &SubjectEntry) -> EnsembleConfig {
        self.config.clone().with_mask(subject.mask.clone())
    }

    pub fn input_dir(&self, subject: &SubjectEntry) -> PathBuf {
        subject
            .input_dir
            .clone()
            .unwrap_or_else(|| self.input_root.join(format!("KALMAN_{}", subject.name)))
    }

    pub fn output_dir(&self, subject: &SubjectEntry) -> PathBuf {
        self.output_root
            .join(format!("PROCESSED_KALMAN_{}", subject.name.to_uppercase()))
    }

    pub fn timings_dir(&self) -> PathBuf {
        self.output_root.join("execution_times")
    }
}

impl SubjectEntry {
    pub fn session_names(&self) -> Vec<String> {
        if self.sessions.is_empty() {
            DEFAULT_SESSIONS.map(|s| format!("S{}", s)).collect()
        } else {
            self.sessions.clone()
        }
    }
}

/// `<dir>/<session>.csv`, falling back to `<session>.csv.gz` when only that exists.
pub fn session_path(dir: &Path, session: &str) -> PathBuf {
    let plain = dir.join(format!("{}.csv", session));
    if plain.exists() {
        return plain;
    }
    let gz = dir.join(format!("{}.csv.gz", session));
    if gz.exists() {
        gz
    } else {
        plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "input_root": "/data/in",
        "output_root": "/data/out",
        "config": { "workers": 2 },
        "subjects": [
            { "name": "karen", "mask": [0,0,0,0,0,0,0,0,0,0,0,1,1,1] },
            { "name": "ana", "mask": [0,0,1,1,0,0,0,0,0,0,0,0,1,1],
              "sessions": ["S4"], "input_dir": "/elsewhere" }
        ]
    }"#;

    #[test]
    fn test_parse_and_resolve_paths() {
        let manifest: BatchManifest = serde_json::from_str(MANIFEST).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.config.workers, 2);

        let karen = &manifest.subjects[0];
        assert_eq!(manifest.input_dir(karen), PathBuf::from("/data/in/KALMAN_karen"));
        assert_eq!(
            manifest.output_dir(karen),
            PathBuf::from("/data/out/PROCESSED_KALMAN_KAREN")
        );
        let sessions = karen.session_names();
        assert_eq!(sessions.len(), 18);
        assert_eq!(sessions[0], "S2");
        assert_eq!(sessions[17], "S19");

        let ana = &manifest.subjects[1];
        assert_eq!(manifest.input_dir(ana), PathBuf::from("/elsewhere"));
        assert_eq!(ana.session_names(), vec!["S4".to_string()]);
        assert_eq!(
            manifest.subject_config(ana).partition().unwrap().significant_channels(),
            vec![2, 3, 12, 13]
        );
    }

    #[test]
    fn test_bad_subject_mask_rejected() {
        let mut manifest: BatchManifest = serde_json::from_str(MANIFEST).unwrap();
        manifest.subjects[1].mask = vec![1; 14];
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, EnsembleError::Configuration(_)));
        assert!(err.to_string().contains("ana"));

        manifest.subjects[1].mask = vec![0, 1];
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, EnsembleError::InputValidation(_)));
        assert!(err.to_string().contains("ana"));
    }

    #[test]
    fn test_session_path_prefers_plain_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("S3.csv.gz"), b"").unwrap();
        assert_eq!(session_path(dir.path(), "S3"), dir.path().join("S3.csv.gz"));
        std::fs::write(dir.path().join("S3.csv"), b"").unwrap();
        assert_eq!(session_path(dir.path(), "S3"), dir.path().join("S3.csv"));
        assert_eq!(session_path(dir.path(), "S9"), dir.path().join("S9.csv"));
    }
}
