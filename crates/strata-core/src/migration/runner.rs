//! Migration runner: plan computation and ordered execution.

use super::error::MigrationError;
use super::ledger::{current_timestamp, AppliedEntry, AppliedLedger, LockState};
use super::record::{MigrationId, MigrationRecord};
use super::registry::MigrationRegistry;
use crate::catalog::SchemaMutator;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Applying pending migrations, ascending.
    Up,
    /// Rolling back applied migrations, descending.
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Cooperative cancellation flag, checked between migration steps only. A
/// step that has started always runs its (action, ledger-write) pair to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation before the next step.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Verify ledger/registry sync before planning and report orphans.
    pub check_drift: bool,
    /// Compute and report the plan without executing anything.
    pub dry_run: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            check_drift: true,
            dry_run: false,
        }
    }
}

/// Outcome of a run. Failure cases instead surface through
/// [`MigrationError`], which carries the same completed-prefix information.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Direction of the run.
    pub direction: Direction,
    /// Identities the plan selected, in execution order.
    pub planned: Vec<MigrationId>,
    /// Identities whose (action, ledger-write) pair fully committed.
    pub completed: Vec<MigrationId>,
    /// Applied identities with no matching registry record (diagnostic).
    pub orphaned: Vec<MigrationId>,
    /// True if the run stopped early on a cancellation request.
    pub cancelled: bool,
}

impl RunReport {
    /// True when the plan was empty: nothing to do.
    pub fn is_noop(&self) -> bool {
        self.planned.is_empty()
    }
}

/// Applied/pending breakdown for reporting.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Currently applied entries, ascending.
    pub applied: Vec<AppliedEntry>,
    /// Registry identities not yet applied, ascending.
    pub pending: Vec<MigrationId>,
    /// Applied identities with no matching registry record.
    pub orphaned: Vec<MigrationId>,
}

/// What a run was asked to do.
enum PlanRequest {
    UpAll,
    UpTo(MigrationId),
    DownCount(usize),
    DownTo(MigrationId),
}

impl PlanRequest {
    fn direction(&self) -> Direction {
        match self {
            PlanRequest::UpAll | PlanRequest::UpTo(_) => Direction::Up,
            PlanRequest::DownCount(_) | PlanRequest::DownTo(_) => Direction::Down,
        }
    }

    fn target(&self) -> Option<&MigrationId> {
        match self {
            PlanRequest::UpTo(id) | PlanRequest::DownTo(id) => Some(id),
            _ => None,
        }
    }
}

/// The migration runner.
///
/// Executes migrations strictly sequentially: the ledger write for step *i*
/// happens after *i*'s action succeeds and before step *i+1* begins. Each
/// run holds the ledger's advisory lease from before the first step until
/// after the last.
pub struct MigrationRunner<S, L> {
    registry: MigrationRegistry,
    store: S,
    ledger: L,
    config: RunnerConfig,
    cancel: CancelToken,
}

impl<S, L> MigrationRunner<S, L>
where
    S: SchemaMutator,
    L: AppliedLedger,
{
    /// Create a runner over a registry, a schema store, and a ledger.
    pub fn new(registry: MigrationRegistry, store: S, ledger: L, config: RunnerConfig) -> Self {
        Self {
            registry,
            store,
            ledger,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// The registry this runner executes from.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The schema store being migrated.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The applied-state ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// A handle other threads can use to cancel this runner between steps.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Use an externally created cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every pending migration, ascending.
    pub fn apply_all(&mut self) -> Result<RunReport, MigrationError> {
        self.run(PlanRequest::UpAll)
    }

    /// Apply pending migrations up to and including `target`.
    pub fn apply_to(&mut self, target: &MigrationId) -> Result<RunReport, MigrationError> {
        self.run(PlanRequest::UpTo(target.clone()))
    }

    /// Roll back the `count` most recently applied migrations, descending.
    /// A count beyond the applied set clamps to rolling back everything.
    pub fn rollback(&mut self, count: usize) -> Result<RunReport, MigrationError> {
        self.run(PlanRequest::DownCount(count))
    }

    /// Roll back every migration applied after `target`, leaving `target`
    /// itself applied.
    pub fn rollback_to(&mut self, target: &MigrationId) -> Result<RunReport, MigrationError> {
        self.run(PlanRequest::DownTo(target.clone()))
    }

    /// Report applied vs pending vs orphaned. Read-only; takes no lease.
    pub fn status(&self) -> Result<StatusReport, MigrationError> {
        let applied = self.ledger.list_applied()?;
        let applied_seqs: HashSet<u64> = applied.iter().map(|e| e.id.seq).collect();

        let orphaned = applied
            .iter()
            .filter(|e| !self.registry.contains(e.id.seq))
            .map(|e| e.id.clone())
            .collect();
        let pending = self
            .registry
            .all()
            .iter()
            .filter(|r| !applied_seqs.contains(&r.id().seq))
            .map(|r| r.id().clone())
            .collect();

        Ok(StatusReport {
            applied,
            pending,
            orphaned,
        })
    }

    fn run(&mut self, request: PlanRequest) -> Result<RunReport, MigrationError> {
        // A target outside the registry fails before any mutation.
        if let Some(target) = request.target() {
            if !self.registry.contains(target.seq) {
                return Err(MigrationError::UnknownIdentity {
                    id: target.clone(),
                });
            }
        }

        let holder = format!("pid-{}", std::process::id());
        match self.ledger.try_lock(&holder)? {
            LockState::Acquired => {}
            LockState::Held { holder } => {
                return Err(MigrationError::RunAlreadyInProgress { holder });
            }
        }

        let outcome = self.execute(request);

        match self.ledger.unlock() {
            Ok(()) => outcome,
            Err(unlock_err) => match outcome {
                Ok(_) => Err(unlock_err.into()),
                Err(run_err) => {
                    // The run failure is the actionable error; the stuck
                    // lease is recoverable via an explicit unlock.
                    tracing::warn!(error = %unlock_err, "failed to release run lease");
                    Err(run_err)
                }
            },
        }
    }

    fn execute(&mut self, request: PlanRequest) -> Result<RunReport, MigrationError> {
        let Self {
            registry,
            store,
            ledger,
            config,
            cancel,
        } = self;

        let applied_entries = ledger.list_applied()?;
        let applied: HashSet<u64> = applied_entries.iter().map(|e| e.id.seq).collect();

        let orphaned: Vec<MigrationId> = if config.check_drift {
            let orphaned: Vec<MigrationId> = applied_entries
                .iter()
                .filter(|e| !registry.contains(e.id.seq))
                .map(|e| e.id.clone())
                .collect();
            for id in &orphaned {
                tracing::warn!(%id, "applied migration has no registry record");
            }
            orphaned
        } else {
            Vec::new()
        };

        let direction = request.direction();
        let plan = compute_plan(registry, &applied, &request);

        let mut report = RunReport {
            direction,
            planned: plan.iter().map(|r| r.id().clone()).collect(),
            completed: Vec::new(),
            orphaned,
            cancelled: false,
        };

        if config.dry_run {
            return Ok(report);
        }

        for record in plan {
            if cancel.is_cancelled() {
                tracing::info!(direction = %direction, "run cancelled between steps");
                report.cancelled = true;
                return Ok(report);
            }

            let id = record.id().clone();
            match direction {
                Direction::Up => {
                    record
                        .up(&mut *store)
                        .map_err(|source| MigrationError::MigrationFailed {
                            id: id.clone(),
                            source,
                            completed: report.completed.clone(),
                        })?;
                    ledger
                        .mark_applied(&id, current_timestamp())
                        .map_err(|source| MigrationError::InconsistentState {
                            id: id.clone(),
                            source,
                            completed: report.completed.clone(),
                        })?;
                    tracing::info!(%id, "applied migration");
                }
                Direction::Down => {
                    record
                        .down(&mut *store)
                        .map_err(|source| MigrationError::RollbackFailed {
                            id: id.clone(),
                            source,
                            completed: report.completed.clone(),
                        })?;
                    ledger
                        .unmark_applied(&id)
                        .map_err(|source| MigrationError::InconsistentState {
                            id: id.clone(),
                            source,
                            completed: report.completed.clone(),
                        })?;
                    tracing::info!(%id, "rolled back migration");
                }
            }
            report.completed.push(id);
        }

        Ok(report)
    }
}

/// Compute the ordered plan for a request. Forward plans select pending
/// records ascending; rollback plans select the most recently applied
/// records descending, clamped to what is actually applied.
fn compute_plan<'a>(
    registry: &'a MigrationRegistry,
    applied: &HashSet<u64>,
    request: &PlanRequest,
) -> Vec<&'a MigrationRecord> {
    match request {
        PlanRequest::UpAll | PlanRequest::UpTo(_) => {
            let records = match request.target() {
                Some(target) => registry.up_to(target),
                None => registry.all(),
            };
            records
                .iter()
                .filter(|r| !applied.contains(&r.id().seq))
                .collect()
        }
        PlanRequest::DownCount(count) => {
            let mut selected: Vec<&MigrationRecord> = registry
                .all()
                .iter()
                .filter(|r| applied.contains(&r.id().seq))
                .collect();
            selected.reverse();
            selected.truncate(*count);
            selected
        }
        PlanRequest::DownTo(target) => registry
            .all()
            .iter()
            .filter(|r| applied.contains(&r.id().seq))
            .rev()
            .take_while(|r| r.id().seq > target.seq)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(seq: u64, slug: &str) -> MigrationRecord {
        MigrationRecord::new(MigrationId::new(seq, slug), |_| Ok(()), |_| Ok(()))
    }

    fn registry(seqs: &[u64]) -> MigrationRegistry {
        MigrationRegistry::build(seqs.iter().map(|&s| noop(s, "m"))).unwrap()
    }

    fn seqs(plan: &[&MigrationRecord]) -> Vec<u64> {
        plan.iter().map(|r| r.id().seq).collect()
    }

    #[test]
    fn test_plan_up_selects_pending_ascending() {
        let registry = registry(&[1, 2, 3, 4]);
        let applied = HashSet::from([1, 3]);

        let plan = compute_plan(&registry, &applied, &PlanRequest::UpAll);
        assert_eq!(seqs(&plan), vec![2, 4]);
    }

    #[test]
    fn test_plan_up_to_restricts_range() {
        let registry = registry(&[1, 2, 3, 4]);
        let applied = HashSet::from([1]);

        let plan = compute_plan(
            &registry,
            &applied,
            &PlanRequest::UpTo(MigrationId::new(3, "m")),
        );
        assert_eq!(seqs(&plan), vec![2, 3]);
    }

    #[test]
    fn test_plan_down_descending_and_clamped() {
        let registry = registry(&[1, 2, 3]);
        let applied = HashSet::from([1, 2, 3]);

        let plan = compute_plan(&registry, &applied, &PlanRequest::DownCount(2));
        assert_eq!(seqs(&plan), vec![3, 2]);

        // Over-rollback clamps to everything applied.
        let plan = compute_plan(&registry, &applied, &PlanRequest::DownCount(10));
        assert_eq!(seqs(&plan), vec![3, 2, 1]);
    }

    #[test]
    fn test_plan_down_to_excludes_target() {
        let registry = registry(&[1, 2, 3, 4]);
        let applied = HashSet::from([1, 2, 3, 4]);

        let plan = compute_plan(
            &registry,
            &applied,
            &PlanRequest::DownTo(MigrationId::new(2, "m")),
        );
        assert_eq!(seqs(&plan), vec![4, 3]);
    }

    #[test]
    fn test_plan_down_skips_orphaned_gaps() {
        // Applied contains seqs the registry no longer knows; only known
        // records are planned.
        let registry = registry(&[1, 3]);
        let applied = HashSet::from([1, 2, 3]);

        let plan = compute_plan(&registry, &applied, &PlanRequest::DownCount(5));
        assert_eq!(seqs(&plan), vec![3, 1]);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let peer = token.clone();
        assert!(!token.is_cancelled());
        peer.cancel();
        assert!(token.is_cancelled());
    }
}
