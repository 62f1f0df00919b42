// Module: Catalog
// The fixed set of action kinds the engine understands, loaded once.

use once_cell::sync::Lazy;

use crate::protocol::ActionKind;

fn entry(id: &str, display_name: &str, description: &str) -> ActionKind {
    ActionKind {
        id: id.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
    }
}

/// The catalog is immutable for the lifetime of the process. New kinds must
/// be added here *and* given an explicit completeness rule in the
/// `validation` module, which fails closed for anything it does not know.
pub static ACTION_KINDS: Lazy<Vec<ActionKind>> = Lazy::new(|| {
    vec![
        entry("click", "Click", "Click the target element"),
        entry("input", "Type Text", "Type a value into the target element"),
        entry("wait", "Wait", "Pause for the given number of milliseconds"),
        entry("scroll", "Scroll", "Scroll the window, or to the target element"),
        entry("hover", "Hover", "Move the pointer over the target element"),
        entry("select", "Select Option", "Pick a value in the target select element"),
        entry(
            "assert-text-contains",
            "Assert Text Contains",
            "Assert the target element's text contains the value",
        ),
        entry(
            "assert-element-count",
            "Assert Element Count",
            "Assert how many elements match the target selector",
        ),
    ]
});

/// Looks up a catalog entry by kind id. `None` means the kind is unknown and
/// the originating action must be dropped.
pub fn find_kind(id: &str) -> Option<&'static ActionKind> {
    ACTION_KINDS.iter().find(|k| k.id == id)
}
