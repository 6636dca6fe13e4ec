//! Realization results.

use std::fmt;

use serde::Serialize;

use crate::scenario::Action;
use crate::sip::{MessageKind, SipMessage};

/// Outcome of one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    /// Position in the scenario
    pub index: usize,
    /// Send or receive
    pub action: Action,
    /// Template kind
    pub kind: MessageKind,
    /// Mismatches; empty when the action passed
    pub mismatches: Vec<String>,
    /// Decoded message, for receive actions that decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<SipMessage>,
}

impl ActionOutcome {
    /// Whether the action passed
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "[{}] #{} {} {}",
            verdict,
            self.index,
            self.action,
            self.kind.name().to_lowercase()
        )?;
        for mismatch in &self.mismatches {
            write!(f, "\n    {mismatch}")?;
        }
        Ok(())
    }
}

/// Per-action results of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RealizationReport {
    /// Outcomes in execution order
    pub outcomes: Vec<ActionOutcome>,
}

impl RealizationReport {
    /// Whether every action passed
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(ActionOutcome::passed)
    }

    /// Number of failed actions
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed()).count()
    }

    pub(crate) fn push(&mut self, outcome: ActionOutcome) {
        if outcome.passed() {
            tracing::info!("{}", outcome);
        } else {
            tracing::warn!("{}", outcome);
        }
        self.outcomes.push(outcome);
    }
}

impl fmt::Display for RealizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{outcome}")?;
        }
        write!(
            f,
            "{} action(s), {} failed: {}",
            self.outcomes.len(),
            self.failures(),
            if self.passed() { "PASSED" } else { "FAILED" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, mismatches: Vec<String>) -> ActionOutcome {
        ActionOutcome {
            index,
            action: Action::Recv,
            kind: MessageKind::Response,
            mismatches,
            received: None,
        }
    }

    #[test]
    fn test_report_verdict() {
        let mut report = RealizationReport::default();
        assert!(report.passed());

        report.push(outcome(0, vec![]));
        assert!(report.passed());

        report.push(outcome(1, vec!["code: expected 200, got 404".to_string()]));
        assert!(!report.passed());
        assert_eq!(report.failures(), 1);

        let text = report.to_string();
        assert!(text.contains("[FAIL] #1 recv response"));
        assert!(text.ends_with("2 action(s), 1 failed: FAILED"));
    }

    #[test]
    fn test_report_json() {
        let mut report = RealizationReport::default();
        report.push(outcome(0, vec![]));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["action"], "recv");
        assert_eq!(json["outcomes"][0]["kind"], "response");
        assert!(json["outcomes"][0].get("received").is_none());
    }
}
