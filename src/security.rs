//! Security validator (C2).
//!
//! Applied to every externally supplied ID and to every path the core
//! constructs. Violations are reported as [`TrellisError`] with
//! [`ErrorCode::InvalidField`] and emit a structured audit event
//! (`tracing::warn!(target: "trellis::audit", ...)`) carrying a sanitized
//! echo of the offending input.

use std::sync::LazyLock;

use path_absolutize::Absolutize;
use regex::Regex;

use crate::errors::{ErrorCode, TrellisError};

const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

const DISALLOWED_EXTENSIONS: &[&str] = &[".exe", ".bat", ".sh", ".py", ".js"];

const PRIVILEGED_FIELDS: &[&str] = &[
    "system_admin",
    "root_access",
    "privileged",
    "admin",
    "superuser",
    "elevated",
    "bypass_validation",
    "skip_checks",
    "ignore_constraints",
];

/// Values for the `parent` field that smell like a validation-bypass
/// attempt rather than a genuine parent id.
const SUSPICIOUS_PARENT_EXACT: &[&str] = &["null", "none", "undefined", "{}", "[]", "true", "false", "0", "1"];

static URL_ENCODED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%[0-9A-Fa-f]{2}").unwrap());

/// Rejects an ID that fails any of the checks in spec §4.2. Emits an
/// audit event on rejection.
pub fn validate_id(id: &str, field: &str) -> Result<(), TrellisError> {
    if let Err(reason) = check_id(id) {
        audit_reject(field, id, &reason);
        return Err(TrellisError::new(
            ErrorCode::InvalidField,
            format!("Invalid {field} '{id}': {reason}"),
        )
        .with_context("field", field));
    }
    Ok(())
}

fn check_id(id: &str) -> Result<(), &'static str> {
    if id.contains("..") {
        return Err("contains path traversal sequence");
    }
    if id.starts_with('/') || id.starts_with('\\') {
        return Err("begins with a path separator");
    }
    if id.contains('\\') {
        return Err("contains a backslash");
    }
    if id.starts_with('.') {
        return Err("begins with a dot");
    }
    if id.chars().any(|c| c == '\0' || (c.is_control() && !matches!(c, '\t' | '\r' | '\n'))) {
        return Err("contains control characters");
    }
    if URL_ENCODED_RE.is_match(id) {
        return Err("contains a URL-encoded sequence");
    }
    let lowered = id.to_ascii_lowercase();
    for ext in DISALLOWED_EXTENSIONS {
        if lowered.ends_with(ext) {
            return Err("has a disallowed file extension");
        }
    }
    let bare_stem = lowered.strip_suffix(".md").unwrap_or(&lowered);
    if RESERVED_WINDOWS_NAMES.contains(&bare_stem) {
        return Err("is a reserved system name");
    }
    Ok(())
}

/// Flags `parent` values that look like a bypass attempt rather than a
/// genuine parent id reference. Only meaningful for standalone tasks
/// (spec §4.2: this check runs only when `schema_version >= "1.1"`).
pub fn check_suspicious_parent(parent: &str) -> Result<(), TrellisError> {
    let trimmed = parent.trim();
    let lowered = trimmed.to_ascii_lowercase();

    if parent.contains("..") || parent.contains('\\') {
        return reject_parent(parent, "contains path traversal or backslash sequence");
    }
    if lowered.starts_with('/') {
        return reject_parent(parent, "is an absolute path");
    }
    if SUSPICIOUS_PARENT_EXACT.contains(&lowered.as_str()) {
        return reject_parent(parent, "is a suspicious sentinel value");
    }
    if trimmed.is_empty() && !parent.is_empty() {
        return reject_parent(parent, "is whitespace-only");
    }
    if parent.len() > 255 {
        return reject_parent(parent, "exceeds maximum length (255 characters)");
    }
    if parent.chars().any(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n')) {
        return reject_parent(parent, "contains control characters");
    }
    Ok(())
}

/// Rejects a resolved on-disk path that escapes `root`, either lexically
/// (a constructed path that walks back out via `..` components, checked
/// with `path-absolutize` since a not-yet-created file has nothing a
/// symlink check can resolve) or via a symlink: an absolute symlink
/// anywhere along the path, or a relative one whose final target resolves
/// outside `root` (spec §4.2).
pub fn check_symlink_escape(path: &std::path::Path, root: &std::path::Path) -> Result<(), TrellisError> {
    if let (Ok(absolute_root), Ok(absolute_path)) = (root.absolutize(), path.absolutize()) {
        if !absolute_path.starts_with(&absolute_root) {
            return reject_symlink(path, "path escapes the planning root");
        }
    }

    for ancestor in path.ancestors() {
        let Ok(meta) = std::fs::symlink_metadata(ancestor) else {
            continue;
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        if let Ok(target) = std::fs::read_link(ancestor) {
            if target.is_absolute() {
                return reject_symlink(ancestor, "is an absolute symlink");
            }
        }
    }

    let Ok(canonical) = std::fs::canonicalize(path) else {
        return Ok(());
    };
    let Ok(canonical_root) = std::fs::canonicalize(root) else {
        return Ok(());
    };
    if !canonical.starts_with(&canonical_root) {
        return reject_symlink(path, "symlink target escapes the planning root");
    }
    Ok(())
}

fn reject_symlink(path: &std::path::Path, reason: &'static str) -> Result<(), TrellisError> {
    let display = path.display().to_string();
    audit_reject("path", &display, reason);
    Err(TrellisError::new(
        ErrorCode::InvalidField,
        format!("Security validation failed: path {reason}"),
    )
    .with_context("field", "path"))
}

fn reject_parent(parent: &str, reason: &'static str) -> Result<(), TrellisError> {
    audit_reject("parent", parent, reason);
    Err(TrellisError::new(
        ErrorCode::InvalidField,
        format!("Security validation failed: parent field {reason}"),
    )
    .with_context("field", "parent"))
}

/// Rejects a header that sets any privileged key directly (spec §4.2).
/// `keys` is the set of field names present in a raw yaml patch/document.
pub fn reject_privileged_fields<'a>(keys: impl IntoIterator<Item = &'a str>) -> Result<(), TrellisError> {
    for key in keys {
        if PRIVILEGED_FIELDS.contains(&key) {
            audit_reject("header", key, "privileged field");
            return Err(TrellisError::new(
                ErrorCode::InvalidField,
                format!("Security validation failed: privileged field '{key}' is not allowed"),
            )
            .with_context("field", key));
        }
    }
    Ok(())
}

fn audit_reject(field: &str, value: &str, reason: &str) {
    let sanitized_value = sanitize_message(value);
    tracing::warn!(
        target: "trellis::audit",
        security_context.field = field,
        security_context.value = %sanitized_value,
        security_context.reason = reason,
        "security validation rejected input"
    );
}

static STACK_TRACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"File "[^"]+",\s*line \d+"#).unwrap());
static STACK_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"at [^(]+\([^)]+\)").unwrap());
static CONNECTION_STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(postgresql|mysql|sqlite|mongodb)://\S+").unwrap());
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)token[:\s]+[A-Za-z0-9_-]{15,}").unwrap());
static KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)key[:\s]+[A-Za-z0-9_-]{15,}").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});
static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Z_]+=\S+").unwrap());
static IP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static UNIX_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(/[^/\s]+)+/[^/\s]+\.\S+").unwrap());
static WINDOWS_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]:\\[^\\]+(?:\\[^\\]+)*").unwrap());

/// Strips stack traces, connection strings, tokens/keys, UUIDs, env-var
/// assignments, IPs, and file paths out of a message before it can leave
/// the core (spec §4.2, §7).
pub fn sanitize_message(message: &str) -> String {
    let mut sanitized = STACK_TRACE_RE
        .replace_all(message, "File \"[REDACTED]\", line [REDACTED]")
        .into_owned();
    sanitized = STACK_FRAME_RE.replace_all(&sanitized, "at [REDACTED]").into_owned();
    sanitized = CONNECTION_STRING_RE.replace_all(&sanitized, "[REDACTED_CONNECTION]").into_owned();
    sanitized = TOKEN_RE.replace_all(&sanitized, "Token: [REDACTED_TOKEN]").into_owned();
    sanitized = KEY_RE.replace_all(&sanitized, "Key: [REDACTED_KEY]").into_owned();
    sanitized = UUID_RE.replace_all(&sanitized, "[REDACTED_UUID]").into_owned();
    sanitized = ENV_VAR_RE.replace_all(&sanitized, "[REDACTED_ENV]").into_owned();
    sanitized = IP_RE.replace_all(&sanitized, "[REDACTED_IP]").into_owned();
    sanitized = UNIX_PATH_RE.replace_all(&sanitized, "[REDACTED_PATH]").into_owned();
    sanitized = WINDOWS_PATH_RE.replace_all(&sanitized, "[REDACTED_PATH]").into_owned();
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_id("../etc/passwd", "id").is_err());
    }

    #[test]
    fn rejects_reserved_windows_name() {
        assert!(validate_id("con", "id").is_err());
        assert!(validate_id("CON.md", "id").is_err());
    }

    #[test]
    fn rejects_disallowed_extension() {
        assert!(validate_id("script.sh", "id").is_err());
    }

    #[test]
    fn accepts_ordinary_id() {
        assert!(validate_id("implement-auth", "id").is_ok());
    }

    #[test]
    fn rejects_suspicious_parent_sentinels() {
        assert!(check_suspicious_parent("null").is_err());
        assert!(check_suspicious_parent("../P-foo").is_err());
        assert!(check_suspicious_parent("/abs/path").is_err());
        assert!(check_suspicious_parent("1").is_err());
    }

    #[test]
    fn accepts_genuine_parent_id() {
        assert!(check_suspicious_parent("F-login").is_ok());
    }

    #[test]
    fn rejects_privileged_field_keys() {
        assert!(reject_privileged_fields(["title", "admin"]).is_err());
        assert!(reject_privileged_fields(["title", "status"]).is_ok());
    }

    #[test]
    fn sanitizes_file_paths_and_tokens() {
        let msg = sanitize_message("failed reading /var/lib/trellis/data.md token: abcdefghijklmnopqrst");
        assert!(!msg.contains("/var/lib"));
        assert!(!msg.contains("abcdefghijklmnopqrst"));
    }

    #[test]
    fn rejects_lexical_traversal_for_a_not_yet_created_path() {
        let root = tempfile::tempdir().unwrap();
        let escaping = root.path().join("..").join("outside.md");
        assert!(check_symlink_escape(&escaping, root.path()).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn rejects_relative_symlink_escaping_root() {
        use std::os::unix::fs::symlink;

        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("real.md"), "x").unwrap();
        let link = root.path().join("escape.md");
        symlink(outside.path().join("real.md"), &link).unwrap();

        assert!(check_symlink_escape(&link, root.path()).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn accepts_symlink_staying_inside_root() {
        use std::os::unix::fs::symlink;

        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("real.md"), "x").unwrap();
        let link = root.path().join("alias.md");
        symlink(root.path().join("real.md"), &link).unwrap();

        assert!(check_symlink_escape(&link, root.path()).is_ok());
    }

    #[test]
    fn sanitizes_uuids_and_ips() {
        let msg = sanitize_message("conn from 10.0.0.5 id 123e4567-e89b-12d3-a456-426614174000");
        assert!(!msg.contains("10.0.0.5"));
        assert!(!msg.contains("123e4567"));
    }
}
