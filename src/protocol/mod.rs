// Module: Protocol
// Data model shared between the engine, the automation backend, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Raw interaction reported by the automation backend during a recording
/// session. Backend-authoritative and immutable once received; the mapper
/// turns these into [`TestStep`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAction {
    pub kind: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    /// Backend clock, epoch milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub target_tag: Option<String>,
    #[serde(default)]
    pub target_text: Option<String>,
}

/// One entry of the fixed action-kind catalog (see the `catalog` module).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionKind {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

/// Pixel-space rectangle in the *natural* (unscaled) coordinate space of the
/// screenshot the element was detected in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// DOM element reported by the automation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectedElement {
    pub id: String,
    pub selector: String,
    pub tag: String,
    pub text: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// One authored or recorded step of the current test sequence.
///
/// The live sequence is always replaced wholesale (never patched in place),
/// so steps stay trivially cloneable and comparison is structural.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub id: String,
    pub action_kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_element: Option<DetectedElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TestStep {
    /// Structural comparison that ignores generated ids.
    ///
    /// The mapper mints fresh ids on every reconciliation pass, so comparing
    /// ids would report every poll result as "changed". Only backend-derived
    /// fields participate: kind, value, and the target's selector/tag/text.
    pub fn same_shape(&self, other: &TestStep) -> bool {
        if self.action_kind.id != other.action_kind.id || self.value != other.value {
            return false;
        }
        match (&self.target_element, &other.target_element) {
            (None, None) => true,
            (Some(a), Some(b)) => a.selector == b.selector && a.tag == b.tag && a.text == b.text,
            _ => false,
        }
    }
}

/// Structural comparison of two sequences, id-insensitive (see
/// [`TestStep::same_shape`]).
pub fn same_sequence_shape(a: &[TestStep], b: &[TestStep]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Outcome of one executed step, as returned by the execute-test-direct
/// operation. Ordered and immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub action_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub status: StepStatus,
    /// Base64-encoded screenshot taken after the step, when the backend
    /// captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Value,
}

/// An active recording session, identified by the backend's session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub active: bool,
}

/// On-disk exchange format consumed by `studio execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTest {
    pub name: String,
    pub url: String,
    pub sequence: Vec<TestStep>,
    #[serde(default)]
    pub elements: Vec<DetectedElement>,
}

/// Report written by the CLI once a playback finishes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub name: String,
    pub status: String, // "passed" | "failed"
    pub start_time: String,
    pub end_time: String,
    pub steps: Vec<StepResult>,
}
