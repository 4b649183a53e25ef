use std::time::Duration;

use tokio::time::Instant;

use crate::settings::{CommitStrategy, ControlSettings};

/// Turns a burst of slider positions into occasional committed values.
///
/// The preview is updated on every input; commits come from the debounce
/// deadline passing (see [`EditBuffer::poll_due`]) or from the end of the
/// interaction (see [`EditBuffer::release`]), whichever the strategy allows.
#[derive(Debug)]
pub struct EditBuffer {
    strategy: CommitStrategy,
    quiet_period: Duration,

    preview: Option<u8>,
    pending: Option<u8>,
    deadline: Option<Instant>,
    pressed: bool,
    last_committed: Option<u8>,
}

impl EditBuffer {
    pub fn new(strategy: CommitStrategy, quiet_period: Duration) -> Self {
        EditBuffer {
            strategy,
            quiet_period,
            preview: None,
            pending: None,
            deadline: None,
            pressed: false,
            last_committed: None,
        }
    }

    pub fn from_settings(settings: &ControlSettings) -> Self {
        EditBuffer::new(
            settings.commit_strategy,
            Duration::from_millis(settings.debounce_ms),
        )
    }

    /// Value to render while the user is interacting, if any.
    pub fn preview(&self) -> Option<u8> {
        if self.is_active() {
            self.preview
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.pressed || self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn on_input(&mut self, value: u8, now: Instant) {
        self.preview = Some(value);
        self.pending = Some(value);

        if self.strategy == CommitStrategy::Debounce {
            self.deadline = Some(now + self.quiet_period);
        }
    }

    /// Pointer or touch went down on the control.
    pub fn on_press(&mut self, value: u8, now: Instant) {
        self.pressed = true;
        self.on_input(value, now);
    }

    /// End of interaction, reported either by the control itself or by the
    /// global listener that catches releases outside of it. Both may fire for
    /// the same gesture; the second one finds nothing to commit.
    pub fn release(&mut self) -> Option<u8> {
        self.pressed = false;
        self.take_commit()
    }

    /// Commits the pending value once the quiet period has passed.
    pub fn poll_due(&mut self, now: Instant) -> Option<u8> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.take_commit(),
            _ => None,
        }
    }

    /// Drops any pending commit, returning the value that will not be sent.
    pub fn cancel(&mut self) -> Option<u8> {
        self.deadline = None;
        self.pressed = false;
        self.preview = None;
        self.pending.take()
    }

    /// Records a value the store already holds, so that committing it again
    /// is recognised as a no-op. Ignored while an edit is pending.
    pub fn set_baseline(&mut self, value: u8) {
        if self.pending.is_none() {
            self.last_committed = Some(value);
        }
    }

    fn take_commit(&mut self) -> Option<u8> {
        self.deadline = None;
        let value = self.pending.take()?;

        if self.last_committed == Some(value) {
            return None;
        }

        self.last_committed = Some(value);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(300);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn debounce_commits_last_value_after_quiet_period() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Debounce, QUIET);

        for (offset, value) in [(0, 10), (50, 20), (100, 30), (150, 40)] {
            buffer.on_input(value, t0 + ms(offset));
            assert_eq!(buffer.preview(), Some(value));
        }

        assert_eq!(buffer.deadline(), Some(t0 + ms(450)));
        assert_eq!(buffer.poll_due(t0 + ms(449)), None);
        assert_eq!(buffer.poll_due(t0 + ms(450)), Some(40));
        assert_eq!(buffer.poll_due(t0 + ms(900)), None);
        assert_eq!(buffer.preview(), None);
    }

    #[test]
    fn release_after_debounce_commit_is_a_no_op() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Debounce, QUIET);

        buffer.on_press(25, t0);
        assert_eq!(buffer.poll_due(t0 + QUIET), Some(25));
        assert_eq!(buffer.release(), None);
    }

    #[test]
    fn same_value_is_committed_once() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Release, QUIET);

        buffer.on_press(60, t0);
        assert_eq!(buffer.release(), Some(60));

        buffer.on_press(60, t0 + ms(10));
        assert_eq!(buffer.release(), None);
    }

    #[test]
    fn release_strategy_ignores_time() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Release, QUIET);

        buffer.on_press(20, t0);
        assert_eq!(buffer.deadline(), None);
        assert_eq!(buffer.poll_due(t0 + ms(5_000)), None);

        // Released outside the control: the global listener fires first
        assert_eq!(buffer.release(), Some(20));
        assert_eq!(buffer.release(), None);
    }

    #[test]
    fn cancel_drops_pending_commit() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Debounce, QUIET);

        buffer.on_input(70, t0);
        assert_eq!(buffer.cancel(), Some(70));
        assert_eq!(buffer.poll_due(t0 + QUIET), None);
        assert!(!buffer.is_active());
    }

    #[test]
    fn baseline_makes_current_value_a_no_op() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Debounce, QUIET);
        buffer.set_baseline(35);

        buffer.on_input(40, t0);
        buffer.on_input(35, t0 + ms(20));
        assert_eq!(buffer.poll_due(t0 + ms(400)), None);
    }

    #[test]
    fn value_can_be_committed_again_after_the_store_refused_it() {
        let t0 = Instant::now();
        let mut buffer = EditBuffer::new(CommitStrategy::Release, QUIET);
        buffer.set_baseline(10);

        buffer.on_press(60, t0);
        assert_eq!(buffer.release(), Some(60));

        // The write never happened, so the store still holds 10
        buffer.set_baseline(10);

        buffer.on_press(60, t0 + ms(10));
        assert_eq!(buffer.release(), Some(60));
    }
}
