//! ID normalization and planning-root resolution (C1).
//!
//! IDs are stored on disk *with* their kind prefix (`P-`, `E-`, `F-`, `T-`)
//! but referenced everywhere else in clean form. Every lookup normalizes
//! first so callers can pass either form interchangeably.

use std::path::{Path, PathBuf};

use crate::model::Kind;

const MAX_PREFIX_STRIP_ITERATIONS: u32 = 10;

impl Kind {
    /// The single-letter prefix used in IDs and filenames.
    pub fn prefix(&self) -> &'static str {
        match self {
            Kind::Project => "P-",
            Kind::Epic => "E-",
            Kind::Feature => "F-",
            Kind::Task => "T-",
        }
    }
}

/// Strips a single leading kind prefix (`p-`, `e-`, `f-`, or `t-`,
/// case-insensitive) if present, otherwise returns the input unchanged.
fn strip_any_prefix(id: &str) -> &str {
    for prefix in ["p-", "e-", "f-", "t-"] {
        if let Some(rest) = id_starts_with_ci(id, prefix) {
            return rest;
        }
    }
    id
}

fn id_starts_with_ci<'a>(id: &'a str, prefix: &str) -> Option<&'a str> {
    if id.len() >= prefix.len() && id[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&id[prefix.len()..])
    } else {
        None
    }
}

/// Peels any of the four kind prefixes from `id`, once. Used for
/// prerequisite references, which may name any kind.
///
/// `clean_prereq("T-T-x")` is not fully collapsed by a single call; see
/// [`clean_prereq_fully`] for the idempotent form used during normalization.
pub fn clean_prereq(id: &str) -> String {
    strip_any_prefix(id.trim()).to_string()
}

/// Repeatedly peels kind prefixes until none remain or the iteration cap
/// is hit, so `clean_prereq_fully("T-T-x") == "x"`.
pub fn clean_prereq_fully(id: &str) -> String {
    let mut current = id.trim().to_string();
    for _ in 0..MAX_PREFIX_STRIP_ITERATIONS {
        let next = clean_prereq(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Normalizes a raw ID for kind `kind`: lowercases, collapses whitespace
/// to `-`, strips disallowed characters, strips one leading prefix
/// unconditionally, then keeps peeling only while the remainder still
/// starts with *this kind's own* prefix (capped), collapses repeated `-`,
/// and trims edge `-`.
///
/// This is kind-aware and therefore distinct from [`clean_prereq_fully`]:
/// `normalize("E-T-x", Kind::Feature)` yields `"t-x"` (the `T-` prefix
/// doesn't belong to `Feature`, so the loop stops after the first strip),
/// whereas `clean_prereq_fully("E-T-x")` peels both prefixes down to `"x"`.
///
/// Idempotent for well-formed ids (one leading prefix, or a prefix chain
/// that is entirely this kind's own), but not in general: a leftover
/// foreign-kind prefix like the `t-` above is only stripped by the
/// *unconditional* first strip, so feeding `normalize`'s own output back
/// in a second time can peel further than the first pass did.
pub fn normalize(id: &str, kind: Kind) -> String {
    if id.trim().is_empty() {
        return String::new();
    }

    let lowered = id.trim().to_lowercase();
    let whitespace_collapsed: String = collapse_whitespace(&lowered);
    let underscored = whitespace_collapsed.replace('_', "-");
    let filtered: String = underscored
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    let own_prefix = format!("{}-", kind.prefix().to_ascii_lowercase());
    let mut normalized = clean_prereq(&filtered);
    for _ in 1..MAX_PREFIX_STRIP_ITERATIONS {
        if !normalized.starts_with(&own_prefix) {
            break;
        }
        let next = clean_prereq(&normalized);
        if next == normalized {
            break;
        }
        normalized = next;
    }

    normalized = collapse_hyphens(&normalized);
    normalized.trim_matches('-').to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push('-');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

fn collapse_hyphens(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_hyphen = false;
    for c in s.chars() {
        if c == '-' {
            if !last_was_hyphen {
                out.push('-');
            }
            last_was_hyphen = true;
        } else {
            out.push(c);
            last_was_hyphen = false;
        }
    }
    out
}

/// The two planning-root shapes resolve to (spec §4.1): a caller may
/// point at the directory that *contains* `planning/`, or at `planning/`
/// itself.
pub struct PlanningRoots {
    /// Root that `get_all_objects`/scanners walk from.
    pub scanning_root: PathBuf,
    /// Root that path construction (`projects/`, `tasks-open/`, ...) is
    /// relative to.
    pub resolution_root: PathBuf,
}

pub fn resolve_planning_roots(root: &Path) -> PlanningRoots {
    let planning_subdir = root.join("planning");
    if planning_subdir.is_dir() {
        PlanningRoots {
            scanning_root: root.to_path_buf(),
            resolution_root: planning_subdir,
        }
    } else {
        PlanningRoots {
            scanning_root: root
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            resolution_root: root.to_path_buf(),
        }
    }
}
