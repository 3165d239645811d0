//! Nightly sweep over pending and active sanctions.
//!
//! Two independent scans run in sequence:
//!
//! 1. pending sanctions of auto-approving kinds whose pending window elapsed
//!    are approved, or forcibly rejected when their registration was deleted;
//! 2. approved embargoes past their end date are completed and their
//!    registration made public, or forcibly rejected when it was deleted.
//!
//! Each item runs in its own transaction that re-reads the sanction before
//! acting. An error on one item, an undecodable record included, is logged
//! and counted as failed, and the scan moves on; nothing is retried. Dry runs
//! log and report the same decisions and write nothing.

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::error::SanctionError;
use crate::handler::HandlerRegistry;
use crate::node::{LogAction, NodeLog, Registration};
use crate::sanction::Sanction;
use crate::store::{Store, StoreTxn, TxResult, abort};
use crate::types::{Action, SanctionKind};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub approved: usize,
    pub completed: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Approved,
    Completed,
    Rejected,
    Skipped,
}

impl SweepReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Approved => self.approved += 1,
            Outcome::Completed => self.completed += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

pub struct Sweeper<'a> {
    store: &'a Store,
    registry: &'a HandlerRegistry,
    pending_window: Duration,
}

impl<'a> Sweeper<'a> {
    pub fn new(store: &'a Store, registry: &'a HandlerRegistry, pending_window: Duration) -> Self {
        Self {
            store,
            registry,
            pending_window,
        }
    }

    pub fn run(&self, now: DateTime<Utc>, dry_run: bool) -> Result<SweepReport, SanctionError> {
        let mut report = SweepReport::default();
        let mut sanctions = vec![];
        for record in self.store.scan_sanctions()? {
            match record {
                Ok(sanction) => sanctions.push(sanction),
                Err(unreadable) => {
                    report.failed += 1;
                    error!(
                        key = %unreadable.key,
                        error = %unreadable.error,
                        "Unreadable sanction record {}. Continuing...",
                        unreadable.key
                    );
                }
            }
        }

        self.activate_pending(&sanctions, now, dry_run, &mut report);
        self.complete_elapsed(&sanctions, now, dry_run, &mut report);

        info!(
            dry_run,
            approved = report.approved,
            completed = report.completed,
            rejected = report.rejected,
            skipped = report.skipped,
            failed = report.failed,
            "sanction sweep finished"
        );
        Ok(report)
    }

    fn should_activate(&self, sanction: &Sanction, now: DateTime<Utc>) -> bool {
        sanction.kind.auto_approves()
            && sanction.is_pending()
            && sanction.initiation_date.elapsed_at(now) >= self.pending_window
    }

    fn should_complete(sanction: &Sanction, now: DateTime<Utc>) -> bool {
        sanction.kind == SanctionKind::Embargo
            && sanction.is_approved()
            && sanction
                .end_date
                .as_ref()
                .is_some_and(|end| end.to_datetime_utc() < now)
    }

    fn activate_pending(
        &self,
        sanctions: &[Sanction],
        now: DateTime<Utc>,
        dry_run: bool,
        report: &mut SweepReport,
    ) {
        for kind in SanctionKind::ALL.into_iter().filter(|k| k.auto_approves()) {
            for sanction in sanctions.iter().filter(|s| s.kind == kind) {
                if !self.should_activate(sanction, now) {
                    continue;
                }
                let registration = match self.store.owner_of(&sanction.id) {
                    Ok(registration) => registration,
                    Err(err) => {
                        self.tally(report, Err(err), sanction, "activating");
                        continue;
                    }
                };
                let registration_id = registration.as_ref().map(|r| r.id.as_str()).unwrap_or("<none>");
                if dry_run {
                    warn!("Dry run mode");
                }
                warn!(
                    sanction = %sanction.id,
                    registration = registration_id,
                    "{} {} approved. Activating it for registration {}",
                    kind.display_name(),
                    sanction.id,
                    registration_id
                );

                let result = if dry_run {
                    preview(registration.as_ref(), &sanction.id, Outcome::Approved)
                } else {
                    self.store
                        .transaction(|txn| self.activate_one(txn, &sanction.id, now))
                };
                self.tally(report, result, sanction, "activating");
            }
        }
    }

    fn complete_elapsed(
        &self,
        sanctions: &[Sanction],
        now: DateTime<Utc>,
        dry_run: bool,
        report: &mut SweepReport,
    ) {
        for sanction in sanctions {
            if !Self::should_complete(sanction, now) {
                continue;
            }
            let registration = match self.store.owner_of(&sanction.id) {
                Ok(registration) => registration,
                Err(err) => {
                    self.tally(report, Err(err), sanction, "completing");
                    continue;
                }
            };
            let registration_id = registration.as_ref().map(|r| r.id.as_str()).unwrap_or("<none>");
            if dry_run {
                warn!("Dry run mode");
            }
            warn!(
                sanction = %sanction.id,
                registration = registration_id,
                "Embargo {} complete. Making registration {} public",
                sanction.id,
                registration_id
            );

            let result = if dry_run {
                preview(registration.as_ref(), &sanction.id, Outcome::Completed)
            } else {
                self.store
                    .transaction(|txn| self.complete_one(txn, &sanction.id, now))
            };
            self.tally(report, result, sanction, "completing");
        }
    }

    fn activate_one(&self, txn: &StoreTxn<'_>, sanction_id: &str, now: DateTime<Utc>) -> TxResult<Outcome> {
        let Some(mut sanction) = txn.get_sanction(sanction_id)? else {
            return Ok(Outcome::Skipped);
        };
        // resolved by someone else since the scan read it
        if !self.should_activate(&sanction, now) {
            return Ok(Outcome::Skipped);
        }
        let Some(mut registration) = txn.owner_of(sanction_id)? else {
            return abort(missing_owner(sanction_id));
        };
        let handler = match self.registry.get(sanction.kind) {
            Ok(handler) => handler,
            Err(err) => return abort(err),
        };

        if registration.is_deleted {
            // clean up after a registration that failed or was removed
            if let Err(err) = sanction.forcibly_reject() {
                return abort(err);
            }
            txn.put_sanction(&sanction)?;
            return Ok(Outcome::Rejected);
        }

        if let Err(err) = sanction.auto_approve() {
            return abort(err);
        }
        handler.on_approved(&mut registration);
        txn.put_sanction(&sanction)?;
        txn.put_registration(&registration)?;
        txn.append_log(&NodeLog::new(
            &registration,
            handler.log_action(Action::Approve),
            &sanction.id,
            None,
        ))?;
        Ok(Outcome::Approved)
    }

    fn complete_one(&self, txn: &StoreTxn<'_>, sanction_id: &str, now: DateTime<Utc>) -> TxResult<Outcome> {
        let Some(mut sanction) = txn.get_sanction(sanction_id)? else {
            return Ok(Outcome::Skipped);
        };
        if !Self::should_complete(&sanction, now) {
            return Ok(Outcome::Skipped);
        }
        let Some(mut registration) = txn.owner_of(sanction_id)? else {
            return abort(missing_owner(sanction_id));
        };

        if registration.is_deleted {
            if let Err(err) = sanction.forcibly_reject() {
                return abort(err);
            }
            txn.put_sanction(&sanction)?;
            return Ok(Outcome::Rejected);
        }

        if let Err(err) = sanction.complete() {
            return abort(err);
        }
        registration.is_public = true;
        txn.put_sanction(&sanction)?;
        txn.put_registration(&registration)?;
        txn.append_log(&NodeLog::new(
            &registration,
            LogAction::EmbargoCompleted,
            &sanction.id,
            None,
        ))?;
        Ok(Outcome::Completed)
    }

    fn tally(
        &self,
        report: &mut SweepReport,
        result: Result<Outcome, SanctionError>,
        sanction: &Sanction,
        doing: &str,
    ) {
        match result {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                report.failed += 1;
                error!(
                    sanction = %sanction.id,
                    kind = %sanction.kind,
                    error = %err,
                    "Unexpected error raised when {doing} {}. Continuing...",
                    sanction.kind.display_name()
                );
            }
        }
    }
}

fn missing_owner(sanction_id: &str) -> SanctionError {
    SanctionError::RegistrationNotFound(format!("owner of {sanction_id}"))
}

/// The decision a real run would take, read without a transaction.
fn preview(
    registration: Option<&Registration>,
    sanction_id: &str,
    outcome: Outcome,
) -> Result<Outcome, SanctionError> {
    match registration {
        None => Err(missing_owner(sanction_id)),
        Some(registration) if registration.is_deleted => Ok(Outcome::Rejected),
        Some(_) => Ok(outcome),
    }
}
