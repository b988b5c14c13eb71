mod booking;
mod cascade;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;
mod unit_of_work;
mod validator;

pub use booking::BookingRequest;
pub use cascade::DomainEvent;
pub use conflict::{count_in_workspace, exists_overlapping, find_overlapping};
pub use error::EngineError;
pub use lifecycle::{transition, Effect, Transition};
pub use queries::Summary;
pub use unit_of_work::{LanePlan, UnitOfWork};
pub use validator::{validate, Proposal};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};

use crate::config::Policy;
use crate::model::*;
use crate::notify::Notifier;
use crate::wal::{Record, Wal};

use store::Store;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
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
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Record, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<(Record, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &records).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { record, response } => {
            let result = wal.append_buffered(&record).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Appointment validation and lifecycle engine.
pub struct Engine {
    pub(super) store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Units of work hold this shared; compaction takes it exclusively so the
    /// snapshot and the log swap see no concurrent commit.
    pub(super) commit_gate: RwLock<()>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: Policy,
}

impl Engine {
    /// Open the engine on a WAL file, replaying every committed record.
    pub async fn open(
        wal_path: PathBuf,
        policy: Policy,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let records = Wal::replay(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let wal = Wal::open(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            notifier,
            policy,
        };

        for record in &records {
            let plan = LanePlan::for_record(&engine.store, record);
            let mut uow = engine.lock(&plan).await?;
            uow.replay(record);
        }
        if !records.is_empty() {
            info!("replayed {} WAL records from {}", records.len(), wal_path.display());
        }

        Ok(engine)
    }

    /// Write one record to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, record: &[Event]) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.to_vec(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Run `attempt` until it succeeds, fails deterministically, or the
    /// commit budget is spent. Each attempt re-runs validation from scratch.
    pub(super) async fn retrying<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let max = self.policy.max_commit_attempts.max(1);
        let mut n = 1;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() && n < max => {
                    warn!("{op}: transient failure on attempt {n}/{max}: {e}");
                    metrics::counter!(crate::observability::COMMIT_RETRIES_TOTAL, "op" => op).increment(1);
                    n += 1;
                }
                other => return other,
            }
        }
    }

    /// Compact the WAL down to the records that recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut records: Vec<Record> = Vec::new();

        for lane in self.store.workspace_lanes() {
            let guard = lane.read().await;
            records.push(vec![Event::WorkspaceCreated {
                workspace: guard.workspace.clone(),
            }]);
            for service in guard.services.values() {
                records.push(vec![Event::ServiceCreated {
                    service: service.clone(),
                }]);
            }
        }
        for lane in self.store.participant_lanes() {
            let guard = lane.read().await;
            records.push(vec![Event::UserCreated {
                user: guard.user.clone(),
            }]);
        }
        for appointment in self.store.appointments() {
            records.push(vec![Event::AppointmentBooked { appointment }]);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
