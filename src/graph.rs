//! Dependency graph (C8).
//!
//! Adjacency is built over clean (unprefixed) ids, uniformly across
//! hierarchical and standalone tasks and container kinds — a chain
//! weaving between the two systems is detected the same way as a cycle
//! confined to one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use crate::codec::ObjectFile;
use crate::errors::{ErrorCode, TrellisError};
use crate::id;
use crate::model::ObjectHeader;

/// `node -> its prerequisite nodes`, all keys/values clean ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    adjacency: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from every stored object's header.
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = &'a ObjectHeader>) -> Self {
        let mut adjacency = BTreeMap::new();
        for header in headers {
            let prereqs = header.prerequisites.iter().map(|p| id::clean_prereq_fully(p)).collect();
            adjacency.insert(header.clean_id(), prereqs);
        }
        Self { adjacency }
    }

    /// Replaces (or inserts) one node's prerequisite edges — used to
    /// check a hypothetical create/update in-memory before it is
    /// written (spec §4.8).
    pub fn with_node(&self, clean_id: &str, prerequisites: &[String]) -> Self {
        let mut adjacency = self.adjacency.clone();
        let cleaned = prerequisites.iter().map(|p| id::clean_prereq_fully(p)).collect();
        adjacency.insert(clean_id.to_string(), cleaned);
        Self { adjacency }
    }

    /// DFS cycle detection with a recursion stack. Returns the cycle path
    /// (first node repeated at the end) if one exists.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for node in self.adjacency.keys() {
            if !visited.contains(node.as_str()) {
                if let Some(cycle) = self.dfs(node, &mut visited, &mut stack, &mut on_stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(prereqs) = self.adjacency.get(node) {
            for next in prereqs {
                let next = next.as_str();
                if on_stack.contains(next) {
                    let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                if !visited.contains(next) {
                    if let Some(cycle) = self.dfs(next, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
        None
    }

    /// Checks whether every prerequisite of `clean_id` currently has
    /// status `done`. Missing prerequisites (dangling references) count
    /// as incomplete, not as an error — the scheduler simply never
    /// selects a task blocked on one.
    pub fn prerequisites_done(&self, statuses: &HashMap<String, crate::model::Status>, clean_id: &str) -> bool {
        match self.adjacency.get(clean_id) {
            None => true,
            Some(prereqs) => prereqs
                .iter()
                .all(|p| matches!(statuses.get(p), Some(crate::model::Status::Done))),
        }
    }
}

/// Validates that adding/updating `clean_id` with `prerequisites` against
/// `existing` does not introduce a cycle. Used both as the in-memory
/// pre-write check and the post-write defense-in-depth re-check.
pub fn check_no_cycle(existing: &DependencyGraph, clean_id: &str, prerequisites: &[String]) -> Result<(), TrellisError> {
    let candidate = existing.with_node(clean_id, prerequisites);
    if let Some(cycle) = candidate.find_cycle() {
        return Err(TrellisError::new(
            ErrorCode::CircularDependency,
            format!("circular dependency detected: {}", cycle.join(" -> ")),
        )
        .with_id(clean_id));
    }
    Ok(())
}

/// A pre-write snapshot of one object file, kept so a post-write cycle
/// check can roll back a create or update (spec §4.8, §9).
#[derive(Debug, Clone)]
pub enum RollbackSnapshot {
    /// The file did not exist before the write; roll back by deleting it.
    Created { path: PathBuf },
    /// The file existed with this content; roll back by restoring it.
    Updated { path: PathBuf, previous: ObjectFile },
}

impl RollbackSnapshot {
    /// Undoes the write this snapshot was taken for. Logs (rather than
    /// propagates) a failure to restore, per spec §9's dual-failure
    /// ordering: the original cycle error always wins.
    pub fn rollback(&self) {
        match self {
            RollbackSnapshot::Created { path } => {
                if let Err(e) = crate::codec::remove_if_exists(path) {
                    tracing::error!(target: "trellis::graph", path = %path.display(), error = %e, "failed to remove file during cycle rollback");
                }
            }
            RollbackSnapshot::Updated { path, previous } => {
                if let Err(e) = crate::codec::write(path, previous) {
                    tracing::error!(target: "trellis::graph", path = %path.display(), error = %e, "failed to restore previous content during cycle rollback");
                }
            }
        }
    }
}
