#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Reject,
    Skip,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NonNumericValue,
    UnknownCategory,
    UnknownIncome,
    MalformedRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub kind: IssueKind,
    /// Column name, or `row` for whole-row problems.
    pub subject: String,
    pub detail: String,
    pub line: Option<u64>,
    pub action: DecisionAction,
}

/// Upper bound on issues kept verbatim; counts keep growing past it.
pub const MAX_LEDGER_DETAILS: usize = 1_000;

/// Data-quality findings from one load: a capped list of individual issues
/// plus exact per-(kind, subject) counts.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLedger {
    issues: Vec<QualityIssue>,
    counts: BTreeMap<IssueKind, BTreeMap<String, usize>>,
}

impl QualityLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: QualityIssue) {
        *self
            .counts
            .entry(issue.kind)
            .or_default()
            .entry(issue.subject.clone())
            .or_insert(0) += 1;
        if self.issues.len() < MAX_LEDGER_DETAILS {
            self.issues.push(issue);
        }
    }

    #[must_use]
    pub fn issues(&self) -> &[QualityIssue] {
        &self.issues
    }

    #[must_use]
    pub fn count(&self, kind: IssueKind) -> usize {
        self.counts
            .get(&kind)
            .map_or(0, |by_subject| by_subject.values().sum())
    }

    #[must_use]
    pub fn count_for(&self, kind: IssueKind, subject: &str) -> usize {
        self.counts
            .get(&kind)
            .and_then(|by_subject| by_subject.get(subject))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn counts(&self) -> &BTreeMap<IssueKind, BTreeMap<String, usize>> {
        &self.counts
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts
            .values()
            .flat_map(BTreeMap::values)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadPolicy {
    pub mode: LoadMode,
}

impl LoadPolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: LoadMode::Strict,
        }
    }

    #[must_use]
    pub fn lenient() -> Self {
        Self {
            mode: LoadMode::Lenient,
        }
    }

    /// A row that cannot be read as a record. Strict loads reject the whole
    /// file; lenient loads skip the row.
    pub fn decide_malformed_row(
        &self,
        line: Option<u64>,
        detail: impl Into<String>,
        ledger: &mut QualityLedger,
    ) -> DecisionAction {
        let action = match self.mode {
            LoadMode::Strict => DecisionAction::Reject,
            LoadMode::Lenient => DecisionAction::Skip,
        };
        ledger.push(QualityIssue {
            kind: IssueKind::MalformedRow,
            subject: "row".to_owned(),
            detail: detail.into(),
            line,
            action,
        });
        action
    }

    /// A cell that was kept in the record but will be left out of the
    /// aggregates it cannot take part in. Never fatal.
    pub fn note_excluded_cell(
        &self,
        kind: IssueKind,
        column: &str,
        raw: &str,
        line: Option<u64>,
        ledger: &mut QualityLedger,
    ) -> DecisionAction {
        ledger.push(QualityIssue {
            kind,
            subject: column.to_owned(),
            detail: format!("raw={raw:?}"),
            line,
            action: DecisionAction::Exclude,
        });
        DecisionAction::Exclude
    }
}

// ---------------------------------------------------------------------------
// Dataset lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("a load is already in progress (ticket {ticket})")]
    LoadInProgress { ticket: u64 },
    #[error("ticket {got} does not match the pending load {expected:?}")]
    StaleTicket { expected: Option<u64>, got: u64 },
}

/// The single user-facing message for a failed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub message: String,
    pub at_unix_ms: u64,
}

/// Proof that the holder started the pending load.
#[derive(Debug, PartialEq, Eq)]
pub struct LoadTicket {
    id: u64,
}

impl LoadTicket {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// One successfully loaded value. `generation` increases with every
/// successful load and identifies the record set it was derived from.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub generation: u64,
    pub loaded_at_unix_ms: u64,
    pub value: Arc<T>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            loaded_at_unix_ms: self.loaded_at_unix_ms,
            value: Arc::clone(&self.value),
        }
    }
}

/// Owns `Unloaded -> Loading -> Ready | Failed`.
///
/// A failed reload never disturbs an existing snapshot: the phase goes back
/// to `Ready` and the failure is reported through [`Self::last_failure`].
/// Only a first load that fails ends in `Failed`.
#[derive(Debug)]
pub struct DatasetLifecycle<T> {
    phase: LoadPhase,
    current: Option<Snapshot<T>>,
    last_failure: Option<LoadFailure>,
    pending: Option<u64>,
    next_ticket: u64,
    generation: u64,
}

impl<T> Default for DatasetLifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DatasetLifecycle<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: LoadPhase::Unloaded,
            current: None,
            last_failure: None,
            pending: None,
            next_ticket: 1,
            generation: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// The latest successful snapshot, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Snapshot<T>> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<&LoadFailure> {
        self.last_failure.as_ref()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn begin_load(&mut self) -> Result<LoadTicket, RuntimeError> {
        if let Some(ticket) = self.pending {
            return Err(RuntimeError::LoadInProgress { ticket });
        }
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(id);
        self.phase = LoadPhase::Loading;
        debug!(ticket = id, "dataset load started");
        Ok(LoadTicket { id })
    }

    /// Settles the pending load. Returns the resulting phase.
    pub fn finish_load<E: fmt::Display>(
        &mut self,
        ticket: LoadTicket,
        outcome: Result<T, E>,
    ) -> Result<LoadPhase, RuntimeError> {
        if self.pending != Some(ticket.id) {
            return Err(RuntimeError::StaleTicket {
                expected: self.pending,
                got: ticket.id,
            });
        }
        self.pending = None;

        match outcome {
            Ok(value) => {
                self.generation += 1;
                self.current = Some(Snapshot {
                    generation: self.generation,
                    loaded_at_unix_ms: now_unix_ms(),
                    value: Arc::new(value),
                });
                self.last_failure = None;
                self.phase = LoadPhase::Ready;
                info!(generation = self.generation, "dataset ready");
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "dataset load failed");
                self.last_failure = Some(LoadFailure {
                    message,
                    at_unix_ms: now_unix_ms(),
                });
                self.phase = if self.current.is_some() {
                    LoadPhase::Ready
                } else {
                    LoadPhase::Failed
                };
            }
        }
        Ok(self.phase)
    }

    /// `begin_load`, run `load`, `finish_load`. If `load` panics the
    /// pending ticket is settled as a failure on the way out.
    pub fn load_with<E, F>(&mut self, load: F) -> Result<LoadPhase, RuntimeError>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let ticket = self.begin_load()?;
        let mut guard = PendingGuard {
            lifecycle: self,
            armed: true,
        };
        let outcome = load();
        guard.armed = false;
        guard.lifecycle.finish_load(ticket, outcome)
    }

    fn abandon_pending(&mut self, message: &str) {
        warn!(ticket = ?self.pending, "dataset load abandoned");
        self.pending = None;
        self.last_failure = Some(LoadFailure {
            message: message.to_owned(),
            at_unix_ms: now_unix_ms(),
        });
        self.phase = if self.current.is_some() {
            LoadPhase::Ready
        } else {
            LoadPhase::Failed
        };
    }
}

struct PendingGuard<'a, T> {
    lifecycle: &'a mut DatasetLifecycle<T>,
    armed: bool,
}

impl<T> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.lifecycle.abandon_pending("dataset load aborted");
        }
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
