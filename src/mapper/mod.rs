// Module: Mapper
// Turns backend-reported recorded actions into structured test steps.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::catalog;
use crate::protocol::{DetectedElement, RecordedAction, TestStep};

/// Maps one recorded action to a test step, or rejects it when its kind has
/// no catalog entry. Rejected actions are dropped, never retried.
///
/// A placeholder target element is synthesized only when the backend reported
/// a selector. Its `text` falls back from the reported target text to the
/// selector itself; its `tag` falls back to `"unknown"`. The placeholder has
/// no bounding box until a later execution re-detects the element.
pub fn map_action(action: &RecordedAction) -> Option<TestStep> {
    let Some(kind) = catalog::find_kind(&action.kind) else {
        debug!(kind = %action.kind, "dropping recorded action with unknown kind");
        return None;
    };

    let target_element = action.selector.as_ref().map(|selector| DetectedElement {
        id: Uuid::new_v4().to_string(),
        selector: selector.clone(),
        tag: action
            .target_tag
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        text: action
            .target_text
            .clone()
            .unwrap_or_else(|| selector.clone()),
        attributes: HashMap::new(),
        bounding_box: None,
    });

    Some(TestStep {
        id: Uuid::new_v4().to_string(),
        action_kind: kind.clone(),
        target_element,
        value: action.value.clone(),
    })
}

/// Maps a full backend batch, preserving backend order and dropping rejects.
pub fn map_sequence(actions: &[RecordedAction]) -> Vec<TestStep> {
    actions.iter().filter_map(map_action).collect()
}
