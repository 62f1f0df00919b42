//! Step completeness rules.
//!
//! A step is "complete" when it carries enough information to be safely sent
//! to the automation backend. The preview scheduler and the manual run path
//! both gate on these rules; the backend's own parameter validation (for
//! example whether a wait value is numeric) is deliberately not duplicated
//! here.
//!
//! Rules by action kind:
//!
//! - `input`, `select`: target element set AND non-blank value
//! - `click`, `hover`, `assert-*`: target element set
//! - `wait`: non-blank value
//! - `scroll`: always complete (no target means whole-window scroll)
//! - anything else: incomplete — unknown kinds fail closed, so a new catalog
//!   entry must be given an explicit rule here before it can execute

use crate::protocol::TestStep;

/// Decides whether a single step can be safely executed.
pub fn step_is_complete(step: &TestStep) -> bool {
    let has_target = step.target_element.is_some();
    let has_value = step
        .value
        .as_deref()
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);

    match step.action_kind.id.as_str() {
        "input" | "select" => has_target && has_value,
        "click" | "hover" => has_target,
        id if id.starts_with("assert-") => has_target,
        "wait" => has_value,
        "scroll" => true,
        _ => false,
    }
}

/// A sequence is fully complete when every step is complete. An empty
/// sequence is vacuously complete; callers that schedule previews treat
/// emptiness separately since there is nothing to execute.
pub fn sequence_is_complete(steps: &[TestStep]) -> bool {
    steps.iter().all(step_is_complete)
}

/// Indices of the incomplete steps, for user-facing notices.
pub fn incomplete_indices(steps: &[TestStep]) -> Vec<usize> {
    steps
        .iter()
        .enumerate()
        .filter(|(_, step)| !step_is_complete(step))
        .map(|(i, _)| i)
        .collect()
}
