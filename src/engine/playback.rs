// Playback driver.
//
// Idle → Playing → Idle over an ordered list of already-computed step
// results. The per-step timer lives inside the `Playing` variant, and a
// generation stamp rejects ticks from a playback that was cancelled or
// superseded, so two timer chains can never advance the index at once.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use super::timer::TimerHandle;
use super::Msg;
use crate::protocol::{StepResult, StepStatus};

#[derive(Debug)]
enum Phase {
    Idle,
    Playing {
        index: usize,
        #[allow(dead_code)]
        timer: TimerHandle,
    },
}

/// What the engine should surface after a playback transition.
#[derive(Debug)]
pub(crate) enum PlaybackUpdate {
    /// Display this step's outcome (and screenshot, if it has one).
    Step {
        index: usize,
        total: usize,
        name: String,
        status: StepStatus,
        screenshot: Option<String>,
    },
    /// The list is exhausted; report the overall result.
    Finished { passed: bool },
    /// Stale tick or not playing; nothing to do.
    Ignored,
}

#[derive(Debug)]
pub(crate) struct PlaybackDriver {
    step_delay: Duration,
    phase: Phase,
    results: Vec<StepResult>,
    overall: Option<bool>,
    generation: u64,
}

impl PlaybackDriver {
    pub(crate) fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            phase: Phase::Idle,
            results: Vec::new(),
            overall: None,
            generation: 0,
        }
    }

    /// Installs a fresh result set and enters `Playing` at index 0. Any
    /// in-progress playback timer is invalidated before the new results are
    /// installed.
    pub(crate) fn begin(
        &mut self,
        results: Vec<StepResult>,
        overall: bool,
        tx: &UnboundedSender<Msg>,
    ) -> PlaybackUpdate {
        self.generation += 1;
        self.results = results;
        self.overall = Some(overall);

        if self.results.is_empty() {
            self.phase = Phase::Idle;
            return PlaybackUpdate::Finished { passed: overall };
        }

        self.phase = Phase::Playing {
            index: 0,
            timer: self.schedule_tick(tx),
        };
        self.step_update(0)
    }

    /// Advances on a tick. Ticks stamped by a superseded playback are
    /// ignored.
    pub(crate) fn tick(&mut self, generation: u64, tx: &UnboundedSender<Msg>) -> PlaybackUpdate {
        if generation != self.generation {
            return PlaybackUpdate::Ignored;
        }

        let Phase::Playing { index, .. } = self.phase else {
            return PlaybackUpdate::Ignored;
        };

        let next = index + 1;
        if next < self.results.len() {
            self.phase = Phase::Playing {
                index: next,
                timer: self.schedule_tick(tx),
            };
            self.step_update(next)
        } else {
            self.phase = Phase::Idle;
            PlaybackUpdate::Finished {
                passed: self.overall.unwrap_or(false),
            }
        }
    }

    /// Stops any in-progress playback; the result list stays around for
    /// inspection until the next execution overwrites it.
    pub(crate) fn cancel(&mut self) {
        self.generation += 1;
        self.phase = Phase::Idle;
    }

    /// Stops playback and forgets the result set (sequence cleared).
    pub(crate) fn clear(&mut self) {
        self.cancel();
        self.results.clear();
        self.overall = None;
    }

    /// Records a failed execution without entering playback.
    pub(crate) fn mark_failed(&mut self) {
        self.cancel();
        self.overall = Some(false);
    }

    pub(crate) fn is_playing(&self) -> bool {
        matches!(self.phase, Phase::Playing { .. })
    }

    pub(crate) fn current_index(&self) -> Option<usize> {
        match self.phase {
            Phase::Playing { index, .. } => Some(index),
            Phase::Idle => None,
        }
    }

    pub(crate) fn overall(&self) -> Option<bool> {
        self.overall
    }

    fn step_update(&self, index: usize) -> PlaybackUpdate {
        let step = &self.results[index];
        PlaybackUpdate::Step {
            index,
            total: self.results.len(),
            name: step.name.clone(),
            status: step.status.clone(),
            screenshot: step.screenshot.clone(),
        }
    }

    fn schedule_tick(&self, tx: &UnboundedSender<Msg>) -> TimerHandle {
        TimerHandle::delay(
            self.step_delay,
            tx.clone(),
            Msg::PlaybackTick {
                generation: self.generation,
            },
        )
    }
}
