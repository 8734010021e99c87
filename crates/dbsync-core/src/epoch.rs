//! Epoch transition detection.

/// What crossing into a block's epoch means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochEvent {
    /// First epoch seen since start-up.
    Start(u64),
    /// The epoch right after the last one seen.
    New(u64),
}

/// Compare the last-seen epoch with the current one.
///
/// Only a step of exactly one epoch is a new epoch; repeats and larger jumps
/// yield nothing.
pub fn epoch_event(last: Option<u64>, current: u64) -> Option<EpochEvent> {
    match last {
        None => Some(EpochEvent::Start(current)),
        Some(prev) if prev.checked_add(1) == Some(current) => Some(EpochEvent::New(current)),
        Some(_) => None,
    }
}

/// In-memory tracker of the last epoch seen. Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpochTracker {
    last: Option<u64>,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Record `current` and report the transition, if any. The tracker
    /// follows the chain even across jumps that produce no event.
    pub fn observe(&mut self, current: u64) -> Option<EpochEvent> {
        let event = epoch_event(self.last, current);
        self.last = Some(current);
        event
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn jump_emits_nothing_but_moves_tracker() {
        let mut t = EpochTracker::new();
        assert_eq!(t.observe(3), Some(EpochEvent::Start(3)));
        assert_eq!(t.observe(6), None);
        assert_eq!(t.observe(7), Some(EpochEvent::New(7)));
    }

    #[test]
    fn reset_restarts() {
        let mut t = EpochTracker::new();
        t.observe(1);
        t.reset();
        assert_eq!(t.observe(1), Some(EpochEvent::Start(1)));
    }

    proptest! {
        #[test]
        fn epoch_event_law(e0 in 0u64..1_000_000) {
            let mut t = EpochTracker::new();
            let events: Vec<_> = [e0, e0 + 1, e0 + 1, e0 + 2].into_iter().map(|e| t.observe(e)).collect();
            prop_assert_eq!(
                events,
                vec![Some(EpochEvent::Start(e0)), Some(EpochEvent::New(e0 + 1)), None, Some(EpochEvent::New(e0 + 2))]
            );
        }
    }
}
