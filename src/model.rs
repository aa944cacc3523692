//! Domain entities of a print farm: printers, filament spools and print jobs.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// A registered printer. Immutable once created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Printer {
    pub id: String,
    pub company: String,
    pub model: String,
}

impl Printer {
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty()
    }
}

/// A filament spool.
///
/// `remaining_weight_g` starts at `total_weight_g` and only decreases, when a
/// print job consuming this spool reaches [`JobStatus::Done`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Filament {
    pub id: String,

    /// Material, e.g. `PLA` or `PETG`.
    #[serde(rename = "type")]
    pub material: String,

    pub color: String,

    #[serde(alias = "total_weight_in_grams")]
    pub total_weight_g: u64,

    /// Ignored on creation: a new spool is always full.
    #[serde(default, alias = "remaining_weight_in_grams")]
    pub remaining_weight_g: u64,
}

impl Filament {
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && self.remaining_weight_g <= self.total_weight_g
    }
}

/// A print job, referring to a printer and a filament by id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub id: String,
    pub printer_id: String,
    pub filament_id: String,

    #[serde(alias = "filepath")]
    pub file_path: String,

    #[serde(alias = "print_weight_in_grams")]
    pub print_weight_g: u64,

    #[serde(default)]
    pub status: JobStatus,
}

impl PrintJob {
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.printer_id.is_empty() && !self.filament_id.is_empty() && self.print_weight_g > 0
    }
}

/// Lifecycle of a print job.
///
/// ```text
/// Queued  --> Running --> Done
///    |           |
///    +-----------+-----> Cancelled
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Done,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Done) | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}, expect one of queued, running, done, cancelled")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Payload of a job status transition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub job_id: String,
    pub new_status: JobStatus,
}

/// The kinds of entity a client can create.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Printer,
    Filament,
    PrintJob,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Printer => write!(f, "printer"),
            EntityKind::Filament => write!(f, "filament"),
            EntityKind::PrintJob => write!(f, "print job"),
        }
    }
}

/// A created entity of any kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Entity {
    Printer(Printer),
    Filament(Filament),
    PrintJob(PrintJob),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Printer(_) => EntityKind::Printer,
            Entity::Filament(_) => EntityKind::Filament,
            Entity::PrintJob(_) => EntityKind::PrintJob,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Printer(p) => &p.id,
            Entity::Filament(f) => &f.id,
            Entity::PrintJob(j) => &j.id,
        }
    }
}

impl From<Printer> for Entity {
    fn from(p: Printer) -> Self {
        Entity::Printer(p)
    }
}

impl From<Filament> for Entity {
    fn from(f: Filament) -> Self {
        Entity::Filament(f)
    }
}

impl From<PrintJob> for Entity {
    fn from(j: PrintJob) -> Self {
        Entity::PrintJob(j)
    }
}
