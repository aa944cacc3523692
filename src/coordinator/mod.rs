//! The write path: leadership guard, local validation, proposal and wait for apply.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyerror::AnyError;
use serde::Deserialize;
use serde::Serialize;

use crate::command::Command;
use crate::command::RawCommand;
use crate::command::Response;
use crate::model::Entity;
use crate::model::Filament;
use crate::model::JobStatus;
use crate::model::PrintJob;
use crate::model::Printer;
use crate::model::StatusUpdate;
use crate::store::fleet::Rejection;
use crate::store::StateMachineStore;
use crate::NodeId;

/// Where the current leader can be reached, as far as this replica knows.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderHint {
    pub leader_id: Option<NodeId>,
    pub leader_addr: Option<String>,
}

impl fmt::Display for LeaderHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.leader_id, &self.leader_addr) {
            (Some(id), Some(addr)) => write!(f, "{}@{}", id, addr),
            (Some(id), None) => write!(f, "{}", id),
            _ => write!(f, "unknown leader"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("not leader, forward to {0}")]
    NotLeader(LeaderHint),

    #[error(transparent)]
    Replication(AnyError),
}

/// What the write path needs from the consensus layer.
pub trait Consensus: Send + Sync + 'static {
    /// Whether this replica may propose new log entries.
    fn is_leader(&self) -> bool;

    fn leader_hint(&self) -> LeaderHint {
        LeaderHint::default()
    }

    /// Proposes `command` and resolves once the entry is committed and applied on this replica,
    /// with the state machine's response to it.
    fn submit(&self, command: RawCommand) -> impl Future<Output = Result<Response, ConsensusError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("not leader, forward to {0}")]
    NotLeader(LeaderHint),

    /// The outcome is unknown: the entry may still be committed.
    #[error("write not applied within {0:?}")]
    Timeout(Duration),

    #[error("replication failed: {0}")]
    Replication(AnyError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unexpected response to {operation}: {response:?}")]
    Unexpected { operation: &'static str, response: Response },
}

impl From<ConsensusError> for WriteError {
    fn from(e: ConsensusError) -> Self {
        match e {
            ConsensusError::NotLeader(hint) => WriteError::NotLeader(hint),
            ConsensusError::Replication(e) => WriteError::Replication(e),
        }
    }
}

/// Accepts writes on the leader, rejects invalid ones locally, and turns valid ones into log
/// entries.
pub struct WriteCoordinator<C: Consensus> {
    consensus: C,
    store: Arc<StateMachineStore>,
    write_timeout: Duration,
}

impl<C: Consensus> WriteCoordinator<C> {
    pub fn new(consensus: C, store: Arc<StateMachineStore>, write_timeout: Duration) -> Self {
        Self {
            consensus,
            store,
            write_timeout,
        }
    }

    pub fn consensus(&self) -> &C {
        &self.consensus
    }

    /// Creates a printer, a filament or a print job and returns it as stored.
    ///
    /// The checks against the local state are not a reservation: a concurrent write may still
    /// make the command invalid by the time it is applied, in which case it is rejected there.
    pub async fn submit_create(&self, entity: Entity) -> Result<Entity, WriteError> {
        self.ensure_leader()?;

        tracing::debug!(kind = %entity.kind(), id = entity.id(), "submit create");

        let cmd = match entity {
            Entity::Printer(printer) => {
                self.store.read(|fleet| fleet.check_printer(&printer)).await?;
                Command::CreatePrinter(printer)
            }
            Entity::Filament(mut filament) => {
                filament.remaining_weight_g = filament.total_weight_g;
                self.store.read(|fleet| fleet.check_filament(&filament)).await?;
                Command::CreateFilament(filament)
            }
            Entity::PrintJob(mut job) => {
                job.status = JobStatus::Queued;
                self.store.read(|fleet| fleet.check_print_job(&job)).await?;
                Command::CreatePrintJob(job)
            }
        };

        let operation = cmd.operation();
        match self.propose(cmd).await? {
            Response::Printer(p) => Ok(Entity::Printer(p)),
            Response::Filament(f) => Ok(Entity::Filament(f)),
            Response::PrintJob(j) => Ok(Entity::PrintJob(j)),
            response => Err(WriteError::Unexpected { operation, response }),
        }
    }

    pub async fn create_printer(&self, printer: Printer) -> Result<Printer, WriteError> {
        match self.submit_create(printer.into()).await? {
            Entity::Printer(p) => Ok(p),
            other => Err(unexpected_entity("create_printer", other)),
        }
    }

    pub async fn create_filament(&self, filament: Filament) -> Result<Filament, WriteError> {
        match self.submit_create(filament.into()).await? {
            Entity::Filament(f) => Ok(f),
            other => Err(unexpected_entity("create_filament", other)),
        }
    }

    pub async fn create_print_job(&self, job: PrintJob) -> Result<PrintJob, WriteError> {
        match self.submit_create(job.into()).await? {
            Entity::PrintJob(j) => Ok(j),
            other => Err(unexpected_entity("create_print_job", other)),
        }
    }

    /// Moves a job to `new_status`, consuming its filament when the job is done.
    pub async fn submit_status_update(&self, job_id: &str, new_status: JobStatus) -> Result<StatusUpdate, WriteError> {
        self.ensure_leader()?;

        let update = StatusUpdate {
            job_id: job_id.to_string(),
            new_status,
        };

        self.store.read(|fleet| fleet.check_status_update(&update)).await?;

        let cmd = Command::UpdateJobStatus(update);
        let operation = cmd.operation();

        match self.propose(cmd).await? {
            Response::StatusUpdate(u) => Ok(u),
            Response::Noop => Err(Rejection::JobNotFound(job_id.to_string()).into()),
            response => Err(WriteError::Unexpected { operation, response }),
        }
    }

    fn ensure_leader(&self) -> Result<(), WriteError> {
        if self.consensus.is_leader() {
            Ok(())
        } else {
            Err(WriteError::NotLeader(self.consensus.leader_hint()))
        }
    }

    /// Submits a validated command and waits, bounded by the write timeout, for its response.
    async fn propose(&self, cmd: Command) -> Result<Response, WriteError> {
        tracing::debug!(%cmd, "propose");

        let raw = cmd.encode()?;

        let res = tokio::time::timeout(self.write_timeout, self.consensus.submit(raw)).await;

        let response = match res {
            Ok(x) => x?,
            Err(_elapsed) => {
                tracing::warn!(%cmd, timeout = ?self.write_timeout, "write not applied in time");
                return Err(WriteError::Timeout(self.write_timeout));
            }
        };

        match response {
            Response::Rejected(rejection) => Err(WriteError::Rejected(rejection)),
            Response::Malformed { reason } => Err(WriteError::Unexpected {
                operation: cmd.operation(),
                response: Response::Malformed { reason },
            }),
            x => Ok(x),
        }
    }
}

fn unexpected_entity(operation: &'static str, entity: Entity) -> WriteError {
    let response = match entity {
        Entity::Printer(p) => Response::Printer(p),
        Entity::Filament(f) => Response::Filament(f),
        Entity::PrintJob(j) => Response::PrintJob(j),
    };
    WriteError::Unexpected { operation, response }
}
