mod bookings;
mod error;
mod locks;
mod maintenance;
mod queries;
mod resolver;
mod snapshot;
mod store;

pub use bookings::BookingRequest;
pub use error::{ConflictReason, EngineError};
pub use queries::Availability;
pub use resolver::{resolve, Resolution};
pub use snapshot::Snapshot;
pub use store::{Ledger, SharedBooking, SharedSlotSet, SlotStore, SlotTxn};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::clock::Clock;
use crate::model::*;
use crate::notify::Notifier;
use crate::wal::Wal;

use store::{apply_booking_change, apply_slot_change};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        at: Ms,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => {
                            batch.push((commit, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Commit, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    // A batch is all or nothing: one bad commit aborts its neighbours too.
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            wal.discard_pending();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { at, response } => {
            // Everything acknowledged so far is on disk; fold exactly that.
            let result = Wal::replay(wal.path()).and_then(|commits| {
                let before = commits.len();
                let compacted = Snapshot::fold(&commits).into_commits(at);
                info!("compacting WAL: {before} commits -> {}", compacted.len());
                Wal::write_compact_file(wal.path(), &compacted)?;
                wal.swap_compact_file()
            });
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// How long records outlive the activity they guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Default lock TTL past the end of the reserved window.
    pub lock_grace_minutes: u32,
    /// How long a booked record keeps guarding its window after the trip ends.
    pub booking_retention_minutes: u32,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            lock_grace_minutes: 15,
            booking_retention_minutes: 15,
        }
    }
}

/// The availability/locking engine: slot sets, bookings, and their WAL.
pub struct Engine {
    pub(super) slots: SlotStore,
    pub(super) ledger: Ledger,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) policy: ExpiryPolicy,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        policy: ExpiryPolicy,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> io::Result<Self> {
        let (wal, commits) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let snapshot = Snapshot::fold(&commits);
        let slots = SlotStore::new();
        let ledger = Ledger::new();
        for set in snapshot.slots.into_values() {
            slots.insert(set);
        }
        for booking in snapshot.bookings.into_values() {
            ledger.insert(booking);
        }
        for settlement in snapshot.settlements.into_values() {
            ledger.insert_settlement(settlement);
        }
        info!(
            "replayed {} commits: {} slot sets, {} bookings",
            commits.len(),
            slots.len(),
            ledger.booking_count()
        );

        Ok(Self {
            slots,
            ledger,
            wal_tx,
            clock,
            notifier,
            policy,
        })
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write a commit through the background group-commit writer.
    async fn wal_append(&self, commit: &Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                commit: commit.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::TransactionAborted("WAL writer shut down".into()))?;
        match rx.await {
            Ok(result) => result.map_err(|e| EngineError::TransactionAborted(e.to_string())),
            Err(_) => {
                error!("WAL writer dropped a commit response; durability of commit is unknown");
                Err(EngineError::DependencyFailure(
                    "WAL writer dropped response; commit outcome unknown".into(),
                ))
            }
        }
    }

    /// WAL-append one commit, then apply every change to the state the caller has locked.
    /// Nothing is applied unless the commit is durable.
    pub(super) async fn persist_and_apply(
        &self,
        mut slots: Option<&mut SlotSet>,
        mut held_booking: Option<&mut Booking>,
        changes: Vec<Change>,
    ) -> Result<(), EngineError> {
        if changes.is_empty() {
            return Ok(());
        }
        let commit = Commit {
            at: self.clock.now_ms(),
            changes,
        };
        self.wal_append(&commit).await?;

        for change in &commit.changes {
            match change {
                Change::SlotCreated { .. } | Change::SlotUpdated { .. } | Change::SlotDeleted { .. } => {
                    if let Some(set) = slots.as_deref_mut() {
                        apply_slot_change(set, change);
                    }
                }
                Change::BookingCreated { booking } => self.ledger.insert(booking.clone()),
                Change::BookingStatusChanged { .. } => {
                    if let Some(booking) = held_booking.as_deref_mut() {
                        apply_booking_change(booking, change);
                    }
                }
                Change::SettlementRecorded { settlement, .. } => {
                    self.ledger.insert_settlement(settlement.clone());
                    if let Some(booking) = held_booking.as_deref_mut() {
                        apply_booking_change(booking, change);
                    }
                }
            }
        }
        Ok(())
    }

    /// Commit a slot transaction (plus any booking changes staged into it).
    pub(super) async fn commit(
        &self,
        txn: SlotTxn,
        held_booking: Option<&mut Booking>,
    ) -> Result<(), EngineError> {
        let (mut guard, changes) = txn.into_parts();
        self.persist_and_apply(Some(&mut *guard), held_booking, changes)
            .await
    }
}
