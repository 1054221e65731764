//! Local file acquisition.
//!
//! Reads up to `size` bytes (all bytes when unset) from a regular file or
//! a named pipe. Anything else, a device node or a directory, is rejected
//! so a misconfigured path cannot wedge a cycle.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::error::{codes, Component, EgdError};

pub async fn fetch(path: &Path, size: Option<u64>) -> Result<Vec<u8>, EgdError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        EgdError::permanent(
            Component::Source,
            codes::FETCH_FILE,
            format!("cannot stat {}", path.display()),
        )
        .with_cause(e)
    })?;

    if !is_readable_kind(&metadata) {
        return Err(EgdError::permanent(
            Component::Source,
            codes::FETCH_FILE,
            format!("{} is not a regular file or named pipe", path.display()),
        ));
    }

    let file = tokio::fs::File::open(path).await.map_err(|e| {
        EgdError::permanent(
            Component::Source,
            codes::FETCH_FILE,
            format!("cannot open {}", path.display()),
        )
        .with_cause(e)
    })?;

    let mut buf = Vec::new();
    let read_error = |e: std::io::Error| {
        EgdError::temporary(
            Component::Source,
            codes::FETCH_FILE,
            format!("read from {} failed", path.display()),
        )
        .with_cause(e)
    };
    match size {
        Some(limit) => {
            file.take(limit).read_to_end(&mut buf).await.map_err(read_error)?;
        }
        None => {
            let mut file = file;
            file.read_to_end(&mut buf).await.map_err(read_error)?;
        }
    }
    Ok(buf)
}

#[cfg(unix)]
fn is_readable_kind(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.is_file() || metadata.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_readable_kind(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_whole_file_without_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, [3u8; 300]).unwrap();
        assert_eq!(fetch(&path, None).await.unwrap().len(), 300);
    }

    #[tokio::test]
    async fn test_truncates_to_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, (0u8..=255).collect::<Vec<u8>>()).unwrap();
        let out = fetch(&path, Some(10)).await.unwrap();
        assert_eq!(out, (0u8..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_missing_file_is_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch(&dir.path().join("absent"), None).await.unwrap_err();
        assert_eq!(err.code, codes::FETCH_FILE);
        assert_eq!(err.category, crate::error::ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch(dir.path(), None).await.unwrap_err();
        assert_eq!(err.code, codes::FETCH_FILE);
    }
}
