//! Markdown + YAML front-matter codec (C3).
//!
//! File format: `---\n<yaml>\n---\n<body>` with a trailing newline. Reads
//! and writes go through here so every write takes the same atomic path:
//! build the bytes, write to a temp file in the target's own directory,
//! `fsync`, then rename over the target.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use crate::errors::{ErrorCode, TrellisError};
use crate::model::ObjectHeader;

const FRONT_MATTER_DELIM: &str = "---";

/// A parsed object file: header plus the untouched body text.
#[derive(Debug, Clone)]
pub struct ObjectFile {
    pub header: ObjectHeader,
    pub body: String,
}

/// Reads and parses an object file at `path`.
pub fn read(path: &Path) -> Result<ObjectFile, TrellisError> {
    let text = fs::read_to_string(path).map_err(TrellisError::from)?;
    parse(&text)
}

/// Parses front-matter + body text without touching the filesystem.
pub fn parse(text: &str) -> Result<ObjectFile, TrellisError> {
    let rest = text.strip_prefix(FRONT_MATTER_DELIM).ok_or_else(malformed)?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---").ok_or_else(malformed)?;
    let yaml = &rest[..end];
    let after_delim = &rest[end + 4..];
    let body = after_delim.strip_prefix('\n').unwrap_or(after_delim);

    let header: ObjectHeader = serde_yaml_ng::from_str(yaml)
        .map_err(|e| TrellisError::new(ErrorCode::InvalidField, format!("malformed header: {e}")))?;

    Ok(ObjectFile {
        header,
        body: body.to_string(),
    })
}

fn malformed() -> TrellisError {
    TrellisError::new(ErrorCode::InvalidField, "malformed object file: missing front matter")
}

/// Serializes a header + body back to the on-disk text form.
pub fn dump(file: &ObjectFile) -> Result<String, TrellisError> {
    let yaml = serde_yaml_ng::to_string(&file.header)
        .map_err(|e| TrellisError::new(ErrorCode::InvalidField, format!("failed to serialize header: {e}")))?;
    let yaml = yaml.trim_end_matches('\n');
    Ok(format!("{FRONT_MATTER_DELIM}\n{yaml}\n{FRONT_MATTER_DELIM}\n{}", file.body))
}

/// Writes `file` to `path` atomically: temp file in the same directory,
/// `fsync`, rename over the target. Creates parent directories as
/// needed.
///
/// Same discipline as pack/idx writes: build the bytes off to the side
/// and never truncate the target in place, so a reader never observes a
/// half-written file.
pub fn write(path: &Path, file: &ObjectFile) -> Result<(), TrellisError> {
    let text = dump(file)?;
    write_atomic(path, text.as_bytes())
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TrellisError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(TrellisError::from)?;

    let original_perms = fs::metadata(path).ok().map(|m| m.permissions());

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(TrellisError::from)?;
    tmp.write_all(bytes).map_err(TrellisError::from)?;
    tmp.as_file().sync_all().map_err(TrellisError::from)?;
    tmp.persist(path).map_err(|e| TrellisError::from(e.error))?;

    if let Some(perms) = original_perms {
        let _ = fs::set_permissions(path, perms);
    }

    #[cfg(unix)]
    {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Removes a file, tolerating its absence (used on rollback paths where
/// the file may already be gone).
pub fn remove_if_exists(path: &Path) -> Result<(), TrellisError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TrellisError::from(e)),
    }
}
