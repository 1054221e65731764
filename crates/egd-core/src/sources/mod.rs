//! Data-acquisition backends for the source pipeline.
//!
//! One module per configured method. Each backend returns the raw sample
//! bytes or a categorized error; truncation to `size` happens inside the
//! backend (the network and script backends enforce it while reading, so
//! an over-long response never accumulates in memory), while the
//! `min_size` floor is enforced here for every method.

pub mod command;
pub mod file;
pub mod http;
pub mod script;

use crate::config::{Acquisition, SourceSpec};
use crate::error::{codes, Component, EgdError};

/// Environment passed to command and script children: `PATH`, `HOME` and
/// the temp-dir variables, nothing else from the parent.
pub(crate) fn minimal_env() -> Vec<(String, String)> {
    ["PATH", "HOME", "TMPDIR", "TEMP"]
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect()
}

/// Run the configured acquisition method for one cycle.
pub async fn fetch(spec: &SourceSpec) -> Result<Vec<u8>, EgdError> {
    let raw = match spec.acquisition() {
        Acquisition::Url(url) => http::fetch(spec, &url).await?,
        Acquisition::File(path) => file::fetch(&path, spec.size).await?,
        Acquisition::Command(argv) => command::fetch(&argv, spec.size).await?,
        Acquisition::Script { interpreter, body } => {
            script::fetch(spec, &interpreter, &body).await?
        }
    };

    if let Some(min_size) = spec.min_size {
        if (raw.len() as u64) < min_size {
            return Err(EgdError::temporary(
                Component::Source,
                codes::FETCH_SHORT,
                format!(
                    "sample of {} bytes is below the configured minimum of {min_size}",
                    raw.len()
                ),
            ));
        }
    }
    Ok(raw)
}


#[cfg(test)]
mod tests {
    use super::testutil::file_spec;
    use super::*;

    #[tokio::test]
    async fn test_min_size_rejects_short_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, [0u8; 16]).unwrap();

        let mut spec = file_spec(&path);
        spec.min_size = Some(64);
        let err = fetch(&spec).await.unwrap_err();
        assert_eq!(err.code, codes::FETCH_SHORT);
    }

    #[tokio::test]
    async fn test_min_size_accepts_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, [7u8; 64]).unwrap();

        let mut spec = file_spec(&path);
        spec.min_size = Some(64);
        assert_eq!(fetch(&spec).await.unwrap().len(), 64);
    }

    #[test]
    fn test_minimal_env_contains_path() {
        let env = minimal_env();
        assert!(env.iter().any(|(k, _)| k == "PATH"));
        assert!(env.iter().all(|(k, _)| {
            matches!(k.as_str(), "PATH" | "HOME" | "TMPDIR" | "TEMP")
        }));
    }
}
