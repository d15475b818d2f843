//! Lifecycle rules (C9).
//!
//! Legal status transitions per kind are the reachability relation of a
//! small fixed edge set; everything else (completion eligibility,
//! cascade-delete protection) is expressed in terms of the same
//! [`crate::model::Status`]/[`crate::model::Kind`] pair.

use crate::errors::{ErrorCode, TrellisError};
use crate::model::{Kind, Status};

/// The sentinel status value accepted only by `updateObject`, which
/// triggers cascade delete rather than being a real stored status.
pub const DELETE_SENTINEL: &str = "deleted";

/// Legal direct or bounce-back transitions (spec §4.9). Containers:
/// `draft -> in-progress -> done` (no `draft -> done` skip). Tasks:
/// `open -> in-progress -> review -> done`, plus `in-progress <-> review`
/// bounce-back.
fn is_legal_edge(kind: Kind, from: Status, to: Status) -> bool {
    if from == to {
        return true;
    }
    match kind {
        Kind::Project | Kind::Epic | Kind::Feature => matches!(
            (from, to),
            (Status::Draft, Status::InProgress) | (Status::InProgress, Status::Done)
        ),
        Kind::Task => matches!(
            (from, to),
            (Status::Open, Status::InProgress)
                | (Status::InProgress, Status::Review)
                | (Status::Review, Status::InProgress)
                | (Status::Review, Status::Done)
        ),
    }
}

/// Validates a transition `from -> to` for `kind`. `updateObject` must
/// additionally forbid a task transitioning to `done` directly (spec
/// §4.9) — that check lives in the update handler, not here, since it's
/// a caller-identity rule rather than a lifecycle-reachability one.
pub fn validate_transition(kind: Kind, from: Status, to: Status) -> Result<(), TrellisError> {
    if is_legal_edge(kind, from, to) {
        Ok(())
    } else {
        Err(TrellisError::new(
            ErrorCode::InvalidStatusTransition,
            format!("Illegal status transition for {kind}: '{from}' -> '{to}'"),
        )
        .with_kind(kind.as_str()))
    }
}

/// Whether `completeTask` may act on a task currently in `status` (spec
/// §4.9: only `in-progress` or `review`).
pub fn can_complete(status: Status) -> bool {
    matches!(status, Status::InProgress | Status::Review)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_cannot_skip_draft_to_done() {
        assert!(validate_transition(Kind::Epic, Status::Draft, Status::Done).is_err());
    }

    #[test]
    fn container_draft_to_in_progress_to_done_is_legal() {
        assert!(validate_transition(Kind::Epic, Status::Draft, Status::InProgress).is_ok());
        assert!(validate_transition(Kind::Epic, Status::InProgress, Status::Done).is_ok());
    }

    #[test]
    fn task_review_bounces_back_to_in_progress() {
        assert!(validate_transition(Kind::Task, Status::Review, Status::InProgress).is_ok());
    }

    #[test]
    fn task_open_cannot_jump_straight_to_review() {
        assert!(validate_transition(Kind::Task, Status::Open, Status::Review).is_err());
    }

    #[test]
    fn can_complete_only_from_in_progress_or_review() {
        assert!(can_complete(Status::InProgress));
        assert!(can_complete(Status::Review));
        assert!(!can_complete(Status::Open));
        assert!(!can_complete(Status::Done));
    }
}
