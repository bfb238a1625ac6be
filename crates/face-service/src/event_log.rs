use common::face::RecognitionEvent;
use std::collections::VecDeque;

/// Consecutive events for the same name closer than this are dropped
pub const DEBOUNCE_WINDOW_MS: u64 = 1500;

/// Archive capacity
pub const MAX_EVENTS: usize = 200;

/// Length of the live feed
pub const RECENT_EVENTS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded,
    Debounced,
}

impl AppendOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AppendOutcome::Recorded => "recorded",
            AppendOutcome::Debounced => "debounced",
        }
    }
}

/// Bounded, newest-first log of recognition events.
///
/// The archive and the recent feed are separate buffers with their own
/// capacity; both receive exactly the events that survive debouncing.
#[derive(Debug, Default)]
pub struct EventLog {
    archive: VecDeque<RecognitionEvent>,
    recent: VecDeque<RecognitionEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: RecognitionEvent) -> AppendOutcome {
        let outcome = match self.archive.front() {
            Some(last)
                if last.identity_name == event.identity_name
                    && event.timestamp.saturating_sub(last.timestamp) < DEBOUNCE_WINDOW_MS =>
            {
                AppendOutcome::Debounced
            }
            _ => AppendOutcome::Recorded,
        };

        telemetry::metrics::FACE_EVENTS
            .with_label_values(&[outcome.as_str()])
            .inc();

        if outcome == AppendOutcome::Debounced {
            return outcome;
        }

        tracing::debug!(
            identity = %event.identity_name,
            confidence = event.confidence,
            unknown = event.is_unknown,
            "recognition event recorded"
        );

        self.recent.push_front(event.clone());
        self.recent.truncate(RECENT_EVENTS);
        self.archive.push_front(event);
        self.archive.truncate(MAX_EVENTS);

        outcome
    }

    /// Archived events, newest first
    pub fn events(&self) -> Vec<RecognitionEvent> {
        self.archive.iter().cloned().collect()
    }

    /// Live feed, newest first
    pub fn recent(&self) -> Vec<RecognitionEvent> {
        self.recent.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecognitionEvent> {
        self.archive.iter()
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    pub fn clear(&mut self) {
        self.archive.clear();
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(name: &str, timestamp: u64) -> RecognitionEvent {
        RecognitionEvent {
            id: Uuid::new_v4(),
            timestamp,
            identity_name: name.to_string(),
            identity_id: None,
            confidence: 80,
            is_unknown: name == "Unknown",
            age: None,
            gender: None,
            expression: None,
        }
    }

    #[test]
    fn test_debounce_same_name() {
        let mut log = EventLog::new();
        assert_eq!(log.append(event("Alice", 10_000)), AppendOutcome::Recorded);
        assert_eq!(log.append(event("Alice", 11_000)), AppendOutcome::Debounced);
        assert_eq!(log.len(), 1);

        assert_eq!(log.append(event("Alice", 12_000)), AppendOutcome::Recorded);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_debounce_window_measured_from_last_recorded() {
        let mut log = EventLog::new();
        log.append(event("Alice", 0));
        assert_eq!(log.append(event("Alice", 1499)), AppendOutcome::Debounced);
        assert_eq!(log.append(event("Alice", 1500)), AppendOutcome::Recorded);
    }

    #[test]
    fn test_different_name_is_not_debounced() {
        let mut log = EventLog::new();
        log.append(event("Alice", 0));
        assert_eq!(log.append(event("Bob", 100)), AppendOutcome::Recorded);
        assert_eq!(log.append(event("Alice", 200)), AppendOutcome::Recorded);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_archive_keeps_newest_200() {
        let mut log = EventLog::new();
        for i in 0..250u64 {
            let name = if i % 2 == 0 { "Alice" } else { "Bob" };
            assert_eq!(log.append(event(name, i * 10)), AppendOutcome::Recorded);
        }

        let events = log.events();
        assert_eq!(events.len(), MAX_EVENTS);
        assert_eq!(events[0].timestamp, 2490);
        assert_eq!(events[MAX_EVENTS - 1].timestamp, 500);
        assert!(events.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }

    #[test]
    fn test_recent_feed() {
        let mut log = EventLog::new();
        for i in 0..20u64 {
            log.append(event(&format!("person-{}", i), i));
        }
        log.append(event("person-19", 19));

        let recent = log.recent();
        assert_eq!(recent.len(), RECENT_EVENTS);
        assert_eq!(recent[0].identity_name, "person-19");
        assert_eq!(recent[14].identity_name, "person-5");
    }

    #[test]
    fn test_clear() {
        let mut log = EventLog::new();
        log.append(event("Alice", 0));
        log.clear();
        assert!(log.is_empty());
        assert!(log.recent().is_empty());
        assert_eq!(log.append(event("Alice", 1)), AppendOutcome::Recorded);
    }
}
