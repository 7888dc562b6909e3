//! Rate-limited, non-fatal issue collector for `generate()`.
//!
//! `generate` never fails on a clipped frequency or a dropped unsupported
//! event — it collects them here and succeeds. Each kind is capped at
//! five messages, after which further occurrences roll into one summary
//! line rather than flooding the caller.

const RATE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default)]
struct Counter {
    messages: Vec<String>,
    total: usize,
}

impl Counter {
    fn record(&mut self, message: String) {
        self.total += 1;
        if self.messages.len() < RATE_LIMIT {
            self.messages.push(message);
        }
    }

    fn into_messages(self, kind: &str) -> Vec<String> {
        let mut out = self.messages;
        if self.total > RATE_LIMIT {
            out.push(format!(
                "{} more {} warning(s) suppressed ({} total)",
                self.total - RATE_LIMIT,
                kind,
                self.total
            ));
        }
        out
    }
}

/// Collects warnings produced during a single `generate()` run.
#[derive(Debug, Clone, Default)]
pub struct GeneratorWarnings {
    clipped_frequency: Counter,
    dropped_event: Counter,
    lost_pattern: Counter,
}

impl GeneratorWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clipped_frequency(&mut self, requested_hz: f64) {
        self.clipped_frequency
            .record(format!("frequency {requested_hz:.3} Hz exceeds representable range, clipped"));
    }

    pub fn dropped_unsupported_event(&mut self, what: &str) {
        self.dropped_event.record(format!("dropped unsupported event: {what}"));
    }

    pub fn lost_pattern(&mut self, index: usize) {
        self.lost_pattern.record(format!("pattern {index} has no reachable sequence entry, dropped"));
    }

    pub fn is_empty(&self) -> bool {
        self.clipped_frequency.total == 0 && self.dropped_event.total == 0 && self.lost_pattern.total == 0
    }

    /// Flatten into the `warnings: Vec<String>` the format-handler
    /// contract returns.
    pub fn into_messages(self) -> Vec<String> {
        let mut out = self.clipped_frequency.into_messages("clipped-frequency");
        out.extend(self.dropped_event.into_messages("dropped-event"));
        out.extend(self.lost_pattern.into_messages("lost-pattern"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rate_limits_after_five() {
        let mut w = GeneratorWarnings::new();
        for i in 0..8 {
            w.clipped_frequency(100.0 + i as f64);
        }
        let messages = w.into_messages();
        assert_eq!(messages.len(), 6);
        assert!(messages.last().unwrap().contains("3 more"));
    }

    #[test]
    fn empty_collector_reports_empty() {
        let w = GeneratorWarnings::new();
        assert!(w.is_empty());
        assert!(w.into_messages().is_empty());
    }
}
