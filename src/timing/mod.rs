//! Engine timing knobs.
//!
//! Every suspension point in the engine is a timer, and every timer duration
//! lives here so deployments can tune them without recompiling:
//!
//! | Knob                | Default | Env variable                 |
//! |---------------------|---------|------------------------------|
//! | poll_interval       | 3000ms  | STUDIO_POLL_INTERVAL_MS      |
//! | preview_debounce    | 750ms   | STUDIO_PREVIEW_DEBOUNCE_MS   |
//! | playback_step_delay | 1500ms  | STUDIO_PLAYBACK_DELAY_MS     |
//! | request_timeout     | 30s     | STUDIO_REQUEST_TIMEOUT_SECS  |

use serde::Serialize;
use std::time::Duration;

/// How often the recording poller asks the backend for new actions.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Quiet period after the last qualifying sequence edit before a preview
/// execution is issued.
pub const DEFAULT_PREVIEW_DEBOUNCE_MS: u64 = 750;

/// How long each step's screenshot stays on screen during playback.
pub const DEFAULT_PLAYBACK_DELAY_MS: u64 = 1500;

/// Upper bound for any single gateway request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineTiming {
    pub poll_interval: Duration,
    pub preview_debounce: Duration,
    pub playback_step_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            preview_debounce: Duration::from_millis(DEFAULT_PREVIEW_DEBOUNCE_MS),
            playback_step_delay: Duration::from_millis(DEFAULT_PLAYBACK_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl EngineTiming {
    /// Builds timing config from the environment, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut timing = Self::default();

        if let Some(ms) = read_env_u64("STUDIO_POLL_INTERVAL_MS") {
            timing.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env_u64("STUDIO_PREVIEW_DEBOUNCE_MS") {
            timing.preview_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env_u64("STUDIO_PLAYBACK_DELAY_MS") {
            timing.playback_step_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = read_env_u64("STUDIO_REQUEST_TIMEOUT_SECS") {
            timing.request_timeout = Duration::from_secs(secs);
        }

        timing
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}
