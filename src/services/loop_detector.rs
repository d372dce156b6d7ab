//! Loop Detector
//!
//! Flags a movement that keeps repeating without progress.
//!
//! An execution's fingerprint is its status plus a SHA-256 of its content
//! with whitespace runs collapsed. It has progressed when the fingerprint
//! differs from the previous execution of the same movement in this run;
//! a movement's first execution always counts as progress. A loop is `k`
//! consecutive non-progressing executions of one movement.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::domain::models::{AgentResponse, AgentStatus};

/// Status and normalized-content hash of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    status: AgentStatus,
    content_hash: String,
}

impl Fingerprint {
    pub fn new(status: AgentStatus, content: &str) -> Self {
        let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            status,
            content_hash: hex::encode(Sha256::digest(normalized.as_bytes())),
        }
    }

    pub fn of(response: &AgentResponse) -> Self {
        Self::new(response.status, &response.content)
    }
}

#[derive(Debug)]
pub struct LoopDetector {
    threshold: usize,
    last_seen: HashMap<String, Fingerprint>,
    window_movement: Option<String>,
    stalled: usize,
}

impl LoopDetector {
    pub const DEFAULT_THRESHOLD: usize = 3;

    /// `threshold` is clamped to at least 1.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            last_seen: HashMap::new(),
            window_movement: None,
            stalled: 0,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record an execution of `movement`; returns whether it progressed.
    pub fn progressed(&mut self, movement: &str, fingerprint: Fingerprint) -> bool {
        match self.last_seen.insert(movement.to_string(), fingerprint.clone()) {
            Some(previous) => previous != fingerprint,
            None => true,
        }
    }

    /// Append `(movement, progressed)` to the window.
    ///
    /// Returns the number of consecutive non-progressing executions once it
    /// reaches the threshold. The window resets when the movement changes or
    /// an execution progresses.
    pub fn record(&mut self, movement: &str, progressed: bool) -> Option<usize> {
        if progressed || self.window_movement.as_deref() != Some(movement) {
            self.window_movement = Some(movement.to_string());
            self.stalled = usize::from(!progressed);
        } else {
            self.stalled += 1;
        }

        (self.stalled >= self.threshold).then_some(self.stalled)
    }

    /// Fingerprint, compare and record in one step.
    pub fn observe(&mut self, movement: &str, response: &AgentResponse) -> Option<usize> {
        let progressed = self.progressed(movement, Fingerprint::of(response));
        self.record(movement, progressed)
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_loop_on_third_non_progress() {
        let mut detector = LoopDetector::new(3);
        assert_eq!(detector.record("fix", false), None);
        assert_eq!(detector.record("fix", false), None);
        assert_eq!(detector.record("fix", false), Some(3));
    }

    #[test]
    fn test_progress_resets_window() {
        let mut detector = LoopDetector::new(3);
        detector.record("fix", false);
        detector.record("fix", false);
        assert_eq!(detector.record("fix", true), None);
        assert_eq!(detector.record("fix", false), None);
        assert_eq!(detector.record("fix", false), None);
        assert_eq!(detector.record("fix", false), Some(3));
    }

    #[test]
    fn test_movement_change_resets_window() {
        let mut detector = LoopDetector::new(3);
        detector.record("fix", false);
        detector.record("fix", false);
        assert_eq!(detector.record("review", false), None);
        assert_eq!(detector.record("fix", false), None);
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let a = Fingerprint::new(AgentStatus::Done, "same  output\n\n");
        let b = Fingerprint::new(AgentStatus::Done, " same output");
        let c = Fingerprint::new(AgentStatus::Blocked, "same output");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_observe_identical_responses() {
        let mut detector = LoopDetector::default();
        let resp = AgentResponse::done("coder", "still failing");

        // first execution counts as progress
        assert_eq!(detector.observe("fix", &resp), None);
        assert_eq!(detector.observe("fix", &resp), None);
        assert_eq!(detector.observe("fix", &resp), None);
        assert_eq!(detector.observe("fix", &resp), Some(3));
    }

    proptest! {
        #[test]
        fn prop_never_flags_when_every_run_progresses(
            movements in prop::collection::vec("[a-c]", 1..50)
        ) {
            let mut detector = LoopDetector::new(2);
            for m in &movements {
                prop_assert_eq!(detector.record(m, true), None);
            }
        }

        #[test]
        fn prop_flags_exactly_at_threshold(threshold in 1usize..10) {
            let mut detector = LoopDetector::new(threshold);
            for i in 1..threshold {
                prop_assert_eq!(detector.record("m", false), None, "flagged early at {}", i);
            }
            prop_assert_eq!(detector.record("m", false), Some(threshold));
        }
    }
}
