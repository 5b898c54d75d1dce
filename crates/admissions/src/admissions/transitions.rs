//! Explicit adjacency table for the admission state machine.
//!
//! Every named engine operation resolves to a target status and a guard. Pure
//! transitions are checked for graph membership; operations that record data while
//! advancing (test score, interview feedback) additionally pin the exact source
//! status.

use std::collections::{BTreeMap, BTreeSet};

use super::domain::AdmissionStatus;
use super::error::AdmissionError;

use AdmissionStatus::*;

/// Named state-machine operations exposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ConvertToApplication,
    ScheduleTest,
    RecordTestScore,
    ScheduleInterview,
    RecordInterview,
    Admit,
    Enroll,
    Reject,
    Withdraw,
}

/// How an operation's precondition is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Current status must have an edge to the target.
    Graph,
    /// Current status must equal the given status (which has an edge to the target).
    Exact(AdmissionStatus),
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::ConvertToApplication,
        Operation::ScheduleTest,
        Operation::RecordTestScore,
        Operation::ScheduleInterview,
        Operation::RecordInterview,
        Operation::Admit,
        Operation::Enroll,
        Operation::Reject,
        Operation::Withdraw,
    ];

    pub const fn target(self) -> AdmissionStatus {
        match self {
            Operation::ConvertToApplication => Applied,
            Operation::ScheduleTest => TestScheduled,
            Operation::RecordTestScore => Tested,
            Operation::ScheduleInterview => InterviewScheduled,
            Operation::RecordInterview => Interviewed,
            Operation::Admit => Admitted,
            Operation::Enroll => Enrolled,
            Operation::Reject => Rejected,
            Operation::Withdraw => Withdrawn,
        }
    }

    pub const fn guard(self) -> Guard {
        match self {
            Operation::RecordTestScore => Guard::Exact(TestScheduled),
            Operation::RecordInterview => Guard::Exact(InterviewScheduled),
            _ => Guard::Graph,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Operation::ConvertToApplication => "convert_to_application",
            Operation::ScheduleTest => "schedule_test",
            Operation::RecordTestScore => "record_test_score",
            Operation::ScheduleInterview => "schedule_interview",
            Operation::RecordInterview => "record_interview",
            Operation::Admit => "admit",
            Operation::Enroll => "enroll",
            Operation::Reject => "reject",
            Operation::Withdraw => "withdraw",
        }
    }
}

/// Directed graph of legal status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPolicy {
    edges: BTreeMap<AdmissionStatus, BTreeSet<AdmissionStatus>>,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl TransitionPolicy {
    /// Full graph including the `Applied → InterviewScheduled` shortcut.
    pub fn standard() -> Self {
        Self::new(true)
    }

    pub fn new(interview_from_applied: bool) -> Self {
        let mut edges: BTreeMap<AdmissionStatus, BTreeSet<AdmissionStatus>> = BTreeMap::new();
        let mut edge = |from: AdmissionStatus, to: AdmissionStatus| {
            edges.entry(from).or_default().insert(to);
        };

        edge(Inquiry, Applied);
        edge(Applied, TestScheduled);
        if interview_from_applied {
            edge(Applied, InterviewScheduled);
        }
        edge(Applied, Admitted);
        edge(TestScheduled, Tested);
        edge(Tested, InterviewScheduled);
        edge(Tested, Admitted);
        edge(InterviewScheduled, Interviewed);
        edge(Interviewed, Admitted);
        edge(Admitted, Enrolled);

        for status in AdmissionStatus::ALL {
            if !status.is_terminal() {
                edge(status, Rejected);
                edge(status, Withdrawn);
            }
        }

        Self { edges }
    }

    pub fn allows(&self, from: AdmissionStatus, to: AdmissionStatus) -> bool {
        self.edges
            .get(&from)
            .is_some_and(|targets| targets.contains(&to))
    }

    pub fn next_states(&self, from: AdmissionStatus) -> Vec<AdmissionStatus> {
        self.edges
            .get(&from)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every `(from, to)` edge, in status order.
    pub fn edges(&self) -> impl Iterator<Item = (AdmissionStatus, AdmissionStatus)> + '_ {
        self.edges
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (*from, *to)))
    }

    /// Check whether `operation` may run against a record currently in `current`.
    pub fn authorize(
        &self,
        operation: Operation,
        current: AdmissionStatus,
    ) -> Result<(), AdmissionError> {
        let target = operation.target();
        let permitted = match operation.guard() {
            Guard::Graph => self.allows(current, target),
            Guard::Exact(required) => current == required && self.allows(required, target),
        };

        if permitted {
            Ok(())
        } else {
            Err(AdmissionError::IllegalTransition {
                from: current,
                to: target,
            })
        }
    }
}
