//! Pass and stage reports.

use std::fmt;

use uuid::Uuid;

use crate::domain::foundation::{DomainError, Timestamp};

/// The stages of one pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Cancellations,
    Resumptions,
    PaymentRetries,
    FinalActions,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Cancellations => "cancellations",
            Stage::Resumptions => "resumptions",
            Stage::PaymentRetries => "payment_retries",
            Stage::FinalActions => "final_actions",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item tallies for one stage.
///
/// - `applied`: a write moved the row forward
/// - `unchanged`: the row was already in its target state
/// - `failed`: an error left the item for the next tick
/// - `deferred`: deliberately left alone (retryable redemption failure,
///   unsupported final action)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub due: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub deferred: usize,
}

impl StageReport {
    pub fn with_due(due: usize) -> Self {
        Self {
            due,
            ..Self::default()
        }
    }

    pub(crate) fn tally(&mut self, item: ItemResult) {
        match item {
            ItemResult::Applied => self.applied += 1,
            ItemResult::Unchanged => self.unchanged += 1,
            ItemResult::Failed => self.failed += 1,
            ItemResult::Deferred => self.deferred += 1,
        }
    }
}

/// How a single due item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemResult {
    Applied,
    Unchanged,
    Failed,
    Deferred,
}

/// How a stage ended.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Completed(StageReport),
    /// The due-work query failed; no items were attempted.
    Failed(DomainError),
    /// The pass deadline was reached before or during the stage.
    TimedOut,
}

impl StageOutcome {
    pub fn report(&self) -> Option<&StageReport> {
        match self {
            StageOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// Result of one `process_changes` pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: Timestamp,
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl PassReport {
    pub fn new(pass_id: Uuid, started_at: Timestamp) -> Self {
        Self {
            pass_id,
            started_at,
            stages: Vec::new(),
        }
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }

    /// Report for a stage that completed.
    pub fn stage_report(&self, stage: Stage) -> Option<&StageReport> {
        self.outcome(stage).and_then(StageOutcome::report)
    }

    /// Every stage completed with no failed items.
    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|(_, outcome)| match outcome {
            StageOutcome::Completed(report) => report.failed == 0,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_result() {
        let mut report = StageReport::with_due(4);
        report.tally(ItemResult::Applied);
        report.tally(ItemResult::Unchanged);
        report.tally(ItemResult::Failed);
        report.tally(ItemResult::Deferred);
        assert_eq!(
            report,
            StageReport {
                due: 4,
                applied: 1,
                unchanged: 1,
                failed: 1,
                deferred: 1,
            }
        );
    }

    #[test]
    fn pass_with_failed_stage_is_not_clean() {
        let mut pass = PassReport::new(Uuid::new_v4(), Timestamp::now());
        pass.stages
            .push((Stage::Cancellations, StageOutcome::Completed(StageReport::default())));
        assert!(pass.is_clean());

        pass.stages.push((
            Stage::Resumptions,
            StageOutcome::Failed(DomainError::database("down")),
        ));
        assert!(!pass.is_clean());
        assert!(pass.stage_report(Stage::Resumptions).is_none());
        assert!(pass.stage_report(Stage::Cancellations).is_some());
    }
}
