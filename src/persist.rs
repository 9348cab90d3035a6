//! Atomic JSON documents on local disk.
//!
//! Writers go through a temp file in the target's directory, flushed and
//! fsynced, then renamed over the target, so a reader (or a crash) only ever
//! sees the previous complete file or the new complete file.

use crate::errors::{AppError, AppResult};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[cfg(test)]
thread_local! {
    static FAIL_NEXT_PERSIST: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(test)]
pub(crate) fn fail_next_persist() {
    FAIL_NEXT_PERSIST.with(|flag| flag.set(true));
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(AppError::Access(format!(
                "{}: {}",
                path.to_string_lossy(),
                error
            )))
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|error| AppError::Malformed(format!("{}: {}", path.to_string_lossy(), error)))
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|error| AppError::Internal(format!("encode {}: {}", path.to_string_lossy(), error)))?;
    write_bytes_atomic(path, &bytes)
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let failed = |error: std::io::Error| {
        AppError::WriteFailed(format!("{}: {}", path.to_string_lossy(), error))
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(failed)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(failed)?;

    temp.write_all(bytes).map_err(failed)?;
    temp.flush().map_err(failed)?;
    temp.as_file().sync_all().map_err(failed)?;

    #[cfg(test)]
    if FAIL_NEXT_PERSIST.with(|flag| flag.replace(false)) {
        return Err(AppError::WriteFailed(format!(
            "{}: injected persist failure",
            path.to_string_lossy()
        )));
    }

    temp.persist(path).map_err(|error| failed(error.error))?;
    Ok(())
}

pub fn quarantine(path: &Path) -> AppResult<PathBuf> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::InvalidInput(format!("no file name in {}", path.to_string_lossy())))?;
    let target = path.with_file_name(format!(
        "{}.corrupt-{}",
        file_name,
        Utc::now().format("%Y%m%d%H%M%S")
    ));
    fs::rename(path, &target).map_err(|error| {
        AppError::Access(format!("quarantine {}: {}", path.to_string_lossy(), error))
    })?;
    tracing::warn!(
        path = %path.to_string_lossy(),
        quarantined = %target.to_string_lossy(),
        "moved malformed file aside"
    );
    Ok(target)
}
