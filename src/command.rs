//! The command envelope: the unit replicated through the raft log.
//!
//! A [`Command`] travels through consensus as [`RawCommand`], an opaque, self-describing byte
//! string: a JSON object with an `op` tag and a `payload`, e.g.
//! `{"op":"create_printer","payload":{"id":"p1","company":"Prusa","model":"MK4"}}`.
//! Every replica decodes it on apply; an unknown tag or a malformed payload fails with
//! [`DecodeError`] instead of panicking.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::model::Filament;
use crate::model::PrintJob;
use crate::model::Printer;
use crate::model::StatusUpdate;
use crate::store::fleet::Rejection;

/// One mutation of the fleet state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Command {
    CreatePrinter(Printer),
    CreateFilament(Filament),
    CreatePrintJob(PrintJob),
    UpdateJobStatus(StatusUpdate),
}

impl Command {
    /// Name of the operation, as it appears in the `op` tag.
    pub fn operation(&self) -> &'static str {
        match self {
            Command::CreatePrinter(_) => "create_printer",
            Command::CreateFilament(_) => "create_filament",
            Command::CreatePrintJob(_) => "create_print_job",
            Command::UpdateJobStatus(_) => "update_job_status",
        }
    }

    pub fn encode(&self) -> Result<RawCommand, serde_json::Error> {
        let buf = serde_json::to_vec(self)?;
        Ok(RawCommand(buf))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let cmd = serde_json::from_slice(buf)?;
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CreatePrinter(p) => write!(f, "{}({})", self.operation(), p.id),
            Command::CreateFilament(fi) => write!(f, "{}({})", self.operation(), fi.id),
            Command::CreatePrintJob(j) => write!(f, "{}({})", self.operation(), j.id),
            Command::UpdateJobStatus(u) => write!(f, "{}({}->{})", self.operation(), u.job_id, u.new_status),
        }
    }
}

/// An encoded [`Command`], the application data of a raft log entry.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RawCommand(pub Vec<u8>);

impl RawCommand {
    pub fn decode(&self) -> Result<Command, DecodeError> {
        Command::decode(&self.0)
    }
}

impl fmt::Debug for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawCommand({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0.len())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed command envelope: {source}")]
pub struct DecodeError {
    #[from]
    source: serde_json::Error,
}

/// The result of applying one log entry to the state machine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Printer(Printer),
    Filament(Filament),
    PrintJob(PrintJob),
    StatusUpdate(StatusUpdate),

    /// The command was committed but violates a domain rule against the state it was applied
    /// to; the state is unchanged.
    Rejected(Rejection),

    /// The entry could not be decoded and was skipped.
    Malformed { reason: String },

    /// Nothing changed: blank or membership entries, or a status update for an unknown job.
    Noop,
}
