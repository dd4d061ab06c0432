//! Timed block sessions.
//!
//! A session moves `Pending -> Active -> Completing -> Completed`. The deadline
//! timer, an interrupt, and an explicit early unblock all race to end it; the
//! status lives in a `watch` channel and every transition is a
//! compare-and-set through `send_if_modified`, so only the first cause runs
//! the unblock. The others observe the session as already ending and return.

use crate::entry;
use crate::ledger::{LedgerEntry, SessionLedger};
use crate::platform;
use crate::store::BlockStore;
use crate::targets::MAX_DURATION;
use crate::AppError;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

// =========================================================================
// Session state
// =========================================================================

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Deadline,
    Cancelled,
    EarlyUnblock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The block was lifted.
    Unblocked,
    /// Cancelled before the block took effect; nothing to undo.
    NeverActivated,
    /// Cancelled while the block was being written; the block was applied and
    /// then removed again. Replaces `NeverActivated` once the removal is done.
    RolledBack,
    /// The unblock write failed and the entries are still in the hosts file.
    UnblockFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub cause: Cause,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Pending,
    Active,
    Completing(Cause),
    Completed(Completion),
}

struct Shared {
    targets: Vec<String>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
    status: watch::Sender<Status>,
}

/// Handle to one block session. Clones share the same state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    fn new(targets: Vec<String>, duration: Option<Duration>) -> Self {
        let (status, _) = watch::channel(Status::Pending);
        Self {
            shared: Arc::new(Shared {
                targets,
                duration,
                deadline: OnceLock::new(),
                status,
            }),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.shared.targets
    }

    pub fn status(&self) -> Status {
        self.shared.status.borrow().clone()
    }

    /// When the deadline timer fires. Unset until the session is active, and
    /// for sessions without expiry.
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline.get().copied()
    }

    /// Wait until the session reaches `Completed`.
    pub async fn completed(&self) -> Completion {
        let mut rx = self.shared.status.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Status::Completed(done) = current {
                return done;
            }
            // The sender is owned by `self`, so the channel cannot close here.
            let _ = rx.changed().await;
        }
    }

    /// Deadline for a session starting now, checked before anything is written.
    fn deadline_from_now(&self) -> Result<Option<Instant>, AppError> {
        let Some(duration) = self.shared.duration else {
            return Ok(None);
        };
        check_duration(duration)?;
        Instant::now()
            .checked_add(duration)
            .map(Some)
            .ok_or_else(|| AppError::InvalidDuration(format!("{duration:?}")))
    }

    fn arm(&self, deadline: Option<Instant>) {
        if let Some(at) = deadline {
            let _ = self.shared.deadline.set(at);
        }
    }

    /// Move from `from` to `to` if the session is still in `from`.
    fn transition(&self, from: &Status, to: Status) -> bool {
        self.shared.status.send_if_modified(|current| {
            if *current == *from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self, completion: Completion) {
        self.shared.status.send_replace(Status::Completed(completion));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("targets", &self.shared.targets)
            .field("deadline", &self.deadline())
            .field("status", &self.status())
            .finish()
    }
}

/// Result of [`SessionController::recover`].
#[derive(Debug)]
pub enum Recovery {
    /// No session was recorded.
    Nothing,
    /// The recorded deadline had passed; its targets have been unblocked.
    Expired { targets: Vec<String> },
    /// The recorded session still had time left and is active again.
    Resumed(Session),
}

// =========================================================================
// Controller
// =========================================================================

#[derive(Debug, Clone)]
pub struct SessionController {
    store: BlockStore,
    ledger: Option<SessionLedger>,
}

impl SessionController {
    pub fn new(store: BlockStore) -> Self {
        Self {
            store,
            ledger: None,
        }
    }

    /// Record timed sessions in `ledger` so they survive a crash.
    pub fn with_ledger(mut self, ledger: SessionLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    // ---------------------------------------------------------------------
    // Immediate operations
    // ---------------------------------------------------------------------

    pub fn block_now<S: AsRef<str>>(&self, targets: &[S]) -> Result<(), AppError> {
        if targets.is_empty() {
            return Err(AppError::EmptySourceList);
        }
        self.store.apply_block(targets)
    }

    pub fn unblock_now<S: AsRef<str>>(&self, targets: &[S]) -> Result<(), AppError> {
        if targets.is_empty() {
            return Err(AppError::EmptySourceList);
        }
        self.store.apply_unblock(targets)
    }

    pub fn list_blocked(&self) -> Result<Vec<String>, AppError> {
        self.store.currently_blocked()
    }

    pub fn restore_default(&self) -> Result<(), AppError> {
        self.store.restore_default()
    }

    // ---------------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------------

    /// Validate a session request without touching the hosts file.
    pub fn prepare(
        &self,
        targets: Vec<String>,
        duration: Option<Duration>,
    ) -> Result<Session, AppError> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(targets.len());
        for name in targets {
            entry::validate(&name)?;
            if seen.insert(name.clone()) {
                unique.push(name);
            }
        }
        if unique.is_empty() {
            return Err(AppError::EmptySourceList);
        }
        if let Some(duration) = duration {
            check_duration(duration)?;
        }
        if let Some(ledger) = &self.ledger {
            if ledger.exists() {
                return Err(AppError::SessionInProgress(ledger.path().to_path_buf()));
            }
        }
        Ok(Session::new(unique, duration))
    }

    /// Apply the block and arm the deadline.
    ///
    /// Does nothing unless the session is pending. If a cancellation lands
    /// while the block is being written, the block is undone straight away.
    pub fn activate(&self, session: &Session) -> Result<(), AppError> {
        if session.status() != Status::Pending {
            return Ok(());
        }
        let record = LedgerEntry::new(session.targets().to_vec(), session.shared.duration);
        self.go_active(session, record)
    }

    /// `prepare` followed by `activate`.
    pub fn start_timed_block(
        &self,
        targets: Vec<String>,
        duration: Option<Duration>,
    ) -> Result<Session, AppError> {
        let session = self.prepare(targets, duration)?;
        self.activate(&session)?;
        Ok(session)
    }

    pub fn request_early_unblock(&self, session: &Session) -> Result<bool, AppError> {
        self.complete(session, Cause::EarlyUnblock)
    }

    pub fn on_deadline_elapsed(&self, session: &Session) -> Result<bool, AppError> {
        self.complete(session, Cause::Deadline)
    }

    /// A pending session is closed without touching the hosts file; an active
    /// one is unblocked.
    pub fn on_cancellation_received(&self, session: &Session) -> Result<bool, AppError> {
        let aborted = Status::Completed(Completion {
            cause: Cause::Cancelled,
            outcome: Outcome::NeverActivated,
        });
        if session.transition(&Status::Pending, aborted) {
            info!("session cancelled before the block was applied");
            return Ok(true);
        }
        self.complete(session, Cause::Cancelled)
    }

    /// Drive an activated session to completion.
    ///
    /// Races the deadline timer against `cancel` and against completion by
    /// any other caller holding the session.
    pub async fn run_until_complete<F>(
        &self,
        session: &Session,
        cancel: F,
    ) -> Result<Completion, AppError>
    where
        F: Future,
    {
        let deadline = session.deadline();
        let expiry = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = session.completed() => {}
            _ = cancel => {
                self.on_cancellation_received(session)?;
            }
            _ = expiry => {
                self.on_deadline_elapsed(session)?;
            }
        }

        let completion = session.completed().await;
        match completion.outcome {
            Outcome::UnblockFailed(reason) => Err(AppError::UnblockFailed {
                targets: session.targets().to_vec(),
                reason,
            }),
            _ => Ok(completion),
        }
    }

    /// Run a whole timed session: listen for `cancel`, apply the block, wait
    /// for the first cause, unblock.
    pub async fn run_timed_block<F>(
        &self,
        targets: Vec<String>,
        duration: Option<Duration>,
        cancel: F,
    ) -> Result<Completion, AppError>
    where
        F: Future,
    {
        let session = self.prepare(targets, duration)?;
        tokio::pin!(cancel);

        // Poll the cancellation source once so it is already listening when
        // the hosts file changes.
        tokio::select! {
            biased;
            _ = &mut cancel => {
                self.on_cancellation_received(&session)?;
                return Ok(session.completed().await);
            }
            _ = std::future::ready(()) => {}
        }

        self.activate(&session)?;
        self.run_until_complete(&session, cancel).await
    }

    /// Pick up a session recorded by a process that died before finishing.
    pub fn recover(&self) -> Result<Recovery, AppError> {
        let Some(ledger) = &self.ledger else {
            return Ok(Recovery::Nothing);
        };
        let Some(mut record) = ledger.load()? else {
            return Ok(Recovery::Nothing);
        };
        if record.pid != std::process::id() && platform::process_alive(record.pid) {
            warn!(pid = record.pid, "recorded session is still owned by a running process");
            return Err(AppError::SessionInProgress(ledger.path().to_path_buf()));
        }

        let duration = match (record.deadline, record.remaining()) {
            (None, _) => None,
            (Some(_), Some(left)) => Some(left),
            (Some(_), None) => {
                info!(targets = ?record.targets, "recorded session expired; unblocking");
                self.store
                    .apply_unblock(&record.targets)
                    .map_err(|e| AppError::UnblockFailed {
                        targets: record.targets.clone(),
                        reason: e.to_string(),
                    })?;
                ledger.clear()?;
                return Ok(Recovery::Expired {
                    targets: record.targets,
                });
            }
        };

        info!(targets = ?record.targets, ?duration, "resuming recorded session");
        let session = Session::new(record.targets.clone(), duration);
        record.pid = std::process::id();
        self.go_active(&session, record)?;
        Ok(Recovery::Resumed(session))
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn go_active(&self, session: &Session, record: LedgerEntry) -> Result<(), AppError> {
        let deadline = session.deadline_from_now()?;
        self.store.apply_block(session.targets())?;
        self.settle_activation(session, deadline, record)
    }

    /// Called once the block is on disk: either the session goes active, or a
    /// cancellation arrived during the write and the block is rolled back.
    fn settle_activation(
        &self,
        session: &Session,
        deadline: Option<Instant>,
        record: LedgerEntry,
    ) -> Result<(), AppError> {
        session.arm(deadline);

        if !session.transition(&Status::Pending, Status::Active) {
            warn!("session cancelled while the block was applied; rolling back");
            return match self.store.apply_unblock(session.targets()) {
                Ok(()) => {
                    session.finish(Completion {
                        cause: Cause::Cancelled,
                        outcome: Outcome::RolledBack,
                    });
                    Ok(())
                }
                Err(e) => {
                    self.write_ledger(&record);
                    error!(targets = ?session.targets(), error = %e, "unblock failed, entries still present");
                    session.finish(Completion {
                        cause: Cause::Cancelled,
                        outcome: Outcome::UnblockFailed(e.to_string()),
                    });
                    Err(AppError::UnblockFailed {
                        targets: session.targets().to_vec(),
                        reason: e.to_string(),
                    })
                }
            };
        }

        self.write_ledger(&record);
        info!(
            targets = ?session.targets(),
            duration = ?session.shared.duration,
            "session active"
        );
        Ok(())
    }

    /// First-cause-wins unblock. Returns `false` if another cause got there
    /// first or the session is not active.
    fn complete(&self, session: &Session, cause: Cause) -> Result<bool, AppError> {
        if !session.transition(&Status::Active, Status::Completing(cause)) {
            return Ok(false);
        }

        let outcome = match self.store.apply_unblock(session.targets()) {
            Ok(()) => {
                if let Some(ledger) = &self.ledger {
                    if let Err(e) = ledger.clear() {
                        warn!(error = %e, "could not remove session ledger");
                    }
                }
                info!(?cause, "session completed");
                Outcome::Unblocked
            }
            Err(e) => {
                error!(
                    ?cause,
                    targets = ?session.targets(),
                    error = %e,
                    "unblock failed, entries still present"
                );
                Outcome::UnblockFailed(e.to_string())
            }
        };

        session.finish(Completion {
            cause,
            outcome: outcome.clone(),
        });

        match outcome {
            Outcome::UnblockFailed(reason) => Err(AppError::UnblockFailed {
                targets: session.targets().to_vec(),
                reason,
            }),
            _ => Ok(true),
        }
    }

    fn write_ledger(&self, record: &LedgerEntry) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(record) {
                warn!(error = %e, "could not record session ledger");
            }
        }
    }
}

fn check_duration(duration: Duration) -> Result<(), AppError> {
    if duration.is_zero() || duration > MAX_DURATION {
        return Err(AppError::InvalidDuration(format!("{duration:?}")));
    }
    Ok(())
}
