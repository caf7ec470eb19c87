// Typing-indicator debouncer for the local user.
//
// Every keystroke emits a `typing` hint immediately and re-arms a single
// idle timer (default 1000ms). Only when the timer elapses with no further
// keystrokes does one `stopTyping` fire. The start signal is deliberately
// sent per keystroke — the receiver treats the typing roster as a snapshot,
// so the redundancy is harmless on the wire.
//
// Switching rooms or tearing down the input surface must `cancel()` so a
// stale `stopTyping` is never emitted into a room that is no longer active.

use std::time::{Duration, Instant};

/// Idle window after the last keystroke before `stopTyping` is due.
pub const TYPING_IDLE_WINDOW: Duration = Duration::from_millis(1000);

/// Outbound presence hints the caller should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Typing,
    StopTyping,
}

/// One debouncer per input session: a single resettable deadline.
#[derive(Debug)]
pub struct TypingDebouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self { window: TYPING_IDLE_WINDOW, deadline: None }
    }
}

impl TypingDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a debouncer with a non-default idle window.
    pub fn with_window(window: Duration) -> Self {
        Self { window, deadline: None }
    }

    /// Record a local keystroke. The returned `Typing` signal goes out
    /// immediately; the idle deadline resets, cancelling any pending one.
    pub fn keystroke(&mut self) -> TypingSignal {
        self.keystroke_at(Instant::now())
    }

    /// Like `keystroke` but with a specific timestamp (for testing).
    pub fn keystroke_at(&mut self, now: Instant) -> TypingSignal {
        self.deadline = Some(now + self.window);
        TypingSignal::Typing
    }

    /// Check the idle timer. Yields `StopTyping` at most once per burst.
    pub fn poll(&mut self) -> Option<TypingSignal> {
        self.poll_at(Instant::now())
    }

    /// Like `poll` but with a specific timestamp (for testing).
    pub fn poll_at(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(TypingSignal::StopTyping)
            }
            _ => None,
        }
    }

    /// Drop any pending timer without emitting. Called on room switch and
    /// input teardown.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// When the pending `stopTyping` is due, if a timer is armed. Lets the
    /// runtime sleep precisely instead of polling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    // ── Burst behavior ─────────────────────────────────────────────

    #[test]
    fn burst_emits_typing_per_keystroke_and_one_stop() {
        let mut debouncer = TypingDebouncer::new();
        let now = Instant::now();

        // Three keystrokes inside the window: three start signals.
        for offset in [0u32, 300, 600] {
            let signal = debouncer.keystroke_at(now + MS * offset);
            assert_eq!(signal, TypingSignal::Typing);
        }

        // Not idle yet at 600ms + 999ms.
        assert_eq!(debouncer.poll_at(now + MS * 1599), None);

        // Exactly one stop, due (window) after the last keystroke.
        assert_eq!(debouncer.poll_at(now + MS * 1600), Some(TypingSignal::StopTyping));
        assert_eq!(debouncer.poll_at(now + MS * 5000), None);
    }

    #[test]
    fn each_keystroke_resets_the_single_timer() {
        let mut debouncer = TypingDebouncer::new();
        let now = Instant::now();

        debouncer.keystroke_at(now);
        debouncer.keystroke_at(now + MS * 900);

        // 1000ms after the first keystroke, but only 100ms after the last.
        assert_eq!(debouncer.poll_at(now + MS * 1000), None);
        assert_eq!(debouncer.poll_at(now + MS * 1900), Some(TypingSignal::StopTyping));
    }

    // ── Cancellation ───────────────────────────────────────────────

    #[test]
    fn cancel_suppresses_the_pending_stop() {
        let mut debouncer = TypingDebouncer::new();
        let now = Instant::now();

        debouncer.keystroke_at(now);
        debouncer.cancel();

        assert_eq!(debouncer.poll_at(now + MS * 2000), None);
        assert!(debouncer.next_deadline().is_none());
    }

    #[test]
    fn idle_debouncer_never_emits() {
        let mut debouncer = TypingDebouncer::new();
        assert_eq!(debouncer.poll_at(Instant::now() + MS * 10_000), None);
    }

    // ── Deadline reporting ─────────────────────────────────────────

    #[test]
    fn next_deadline_tracks_the_last_keystroke() {
        let mut debouncer = TypingDebouncer::new();
        let now = Instant::now();

        debouncer.keystroke_at(now);
        debouncer.keystroke_at(now + MS * 400);

        assert_eq!(debouncer.next_deadline(), Some(now + MS * 400 + TYPING_IDLE_WINDOW));
    }

    #[test]
    fn custom_window_respected() {
        let mut debouncer = TypingDebouncer::with_window(Duration::from_millis(200));
        let now = Instant::now();

        debouncer.keystroke_at(now);
        assert_eq!(debouncer.poll_at(now + MS * 199), None);
        assert_eq!(debouncer.poll_at(now + MS * 200), Some(TypingSignal::StopTyping));
    }
}
