// Preview debounce scheduler.
//
// At most one debounced call is pending at a time; scheduling replaces the
// previous timer (newest edit wins). Cancellation bumps the generation as
// well, so a firing that raced the abort and already landed in the mailbox
// is rejected when it is handled.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use super::timer::TimerHandle;
use super::Msg;

#[derive(Debug)]
pub(crate) struct PreviewScheduler {
    quiet_period: Duration,
    pending: Option<TimerHandle>,
    generation: u64,
}

impl PreviewScheduler {
    pub(crate) fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: None,
            generation: 0,
        }
    }

    /// Arms (or re-arms) the debounce timer.
    pub(crate) fn schedule(&mut self, tx: &UnboundedSender<Msg>) {
        self.generation += 1;
        self.pending = Some(TimerHandle::delay(
            self.quiet_period,
            tx.clone(),
            Msg::PreviewFire {
                generation: self.generation,
            },
        ));
    }

    /// Drops any pending timer and invalidates firings already in flight.
    pub(crate) fn cancel(&mut self) {
        self.pending = None;
        self.generation += 1;
    }

    /// Accepts a firing only if it is the one currently armed; consumes the
    /// pending slot on acceptance.
    pub(crate) fn accept(&mut self, generation: u64) -> bool {
        if generation == self.generation && self.pending.is_some() {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
