use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::command::Command;
use crate::command::Response;
use crate::model::EntityKind;
use crate::model::Filament;
use crate::model::JobStatus;
use crate::model::PrintJob;
use crate::model::Printer;
use crate::model::StatusUpdate;

/// A domain rule a command violates.
///
/// The same checks run twice: in the write coordinator before a command is proposed, and again
/// when the committed command is applied, so that every replica enforces them identically.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("malformed {kind}: {reason}")]
    Malformed { kind: EntityKind, reason: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("printer {0} not found")]
    PrinterNotFound(String),

    #[error("filament {0} not found")]
    FilamentNotFound(String),

    #[error("print job {0} not found")]
    JobNotFound(String),

    #[error("filament {filament_id} has {remaining_g}g left, {required_g}g required")]
    InsufficientFilament {
        filament_id: String,
        remaining_g: u64,
        required_g: u64,
    },

    #[error("print job {job_id} can not transition from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// The replicated domain state: printers, filaments and print jobs keyed by id.
///
/// Ordered maps keep the serialized form identical on every replica that applied the same
/// commands.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct FleetState {
    pub printers: BTreeMap<String, Printer>,
    pub filaments: BTreeMap<String, Filament>,
    pub print_jobs: BTreeMap<String, PrintJob>,
}

impl FleetState {
    pub fn check_printer(&self, printer: &Printer) -> Result<(), Rejection> {
        if !printer.is_well_formed() {
            return Err(Rejection::Malformed {
                kind: EntityKind::Printer,
                reason: "id must not be empty".to_string(),
            });
        }
        if self.printers.contains_key(&printer.id) {
            return Err(Rejection::AlreadyExists {
                kind: EntityKind::Printer,
                id: printer.id.clone(),
            });
        }
        Ok(())
    }

    pub fn check_filament(&self, filament: &Filament) -> Result<(), Rejection> {
        if !filament.is_well_formed() {
            return Err(Rejection::Malformed {
                kind: EntityKind::Filament,
                reason: "id must not be empty and remaining weight must not exceed total weight".to_string(),
            });
        }
        if self.filaments.contains_key(&filament.id) {
            return Err(Rejection::AlreadyExists {
                kind: EntityKind::Filament,
                id: filament.id.clone(),
            });
        }
        Ok(())
    }

    pub fn check_print_job(&self, job: &PrintJob) -> Result<(), Rejection> {
        if !job.is_well_formed() {
            return Err(Rejection::Malformed {
                kind: EntityKind::PrintJob,
                reason: "ids must not be empty and print weight must be positive".to_string(),
            });
        }
        if self.print_jobs.contains_key(&job.id) {
            return Err(Rejection::AlreadyExists {
                kind: EntityKind::PrintJob,
                id: job.id.clone(),
            });
        }
        if !self.printers.contains_key(&job.printer_id) {
            return Err(Rejection::PrinterNotFound(job.printer_id.clone()));
        }

        let filament = self
            .filaments
            .get(&job.filament_id)
            .ok_or_else(|| Rejection::FilamentNotFound(job.filament_id.clone()))?;

        if job.print_weight_g > filament.remaining_weight_g {
            return Err(Rejection::InsufficientFilament {
                filament_id: filament.id.clone(),
                remaining_g: filament.remaining_weight_g,
                required_g: job.print_weight_g,
            });
        }
        Ok(())
    }

    /// Checks a status transition and returns the remaining weight of the job's filament after
    /// it, if the transition consumes filament.
    pub fn check_status_update(&self, update: &StatusUpdate) -> Result<Option<u64>, Rejection> {
        let job = self
            .print_jobs
            .get(&update.job_id)
            .ok_or_else(|| Rejection::JobNotFound(update.job_id.clone()))?;

        if !job.status.can_transition_to(update.new_status) {
            return Err(Rejection::InvalidTransition {
                job_id: job.id.clone(),
                from: job.status,
                to: update.new_status,
            });
        }

        if update.new_status != JobStatus::Done {
            return Ok(None);
        }

        let filament = self
            .filaments
            .get(&job.filament_id)
            .ok_or_else(|| Rejection::FilamentNotFound(job.filament_id.clone()))?;

        match filament.remaining_weight_g.checked_sub(job.print_weight_g) {
            Some(left) => Ok(Some(left)),
            None => Err(Rejection::InsufficientFilament {
                filament_id: filament.id.clone(),
                remaining_g: filament.remaining_weight_g,
                required_g: job.print_weight_g,
            }),
        }
    }

    /// Applies one committed command.
    ///
    /// Never fails: a command that violates a rule against the current state leaves the state
    /// untouched and is answered with [`Response::Rejected`].
    pub fn apply(&mut self, cmd: Command) -> Response {
        match cmd {
            Command::CreatePrinter(printer) => {
                if let Err(rejection) = self.check_printer(&printer) {
                    return Response::Rejected(rejection);
                }
                self.printers.insert(printer.id.clone(), printer.clone());
                Response::Printer(printer)
            }
            Command::CreateFilament(mut filament) => {
                filament.remaining_weight_g = filament.total_weight_g;

                if let Err(rejection) = self.check_filament(&filament) {
                    return Response::Rejected(rejection);
                }
                self.filaments.insert(filament.id.clone(), filament.clone());
                Response::Filament(filament)
            }
            Command::CreatePrintJob(mut job) => {
                job.status = JobStatus::Queued;

                if let Err(rejection) = self.check_print_job(&job) {
                    return Response::Rejected(rejection);
                }
                self.print_jobs.insert(job.id.clone(), job.clone());
                Response::PrintJob(job)
            }
            Command::UpdateJobStatus(update) => self.update_job_status(update),
        }
    }

    fn update_job_status(&mut self, update: StatusUpdate) -> Response {
        if !self.print_jobs.contains_key(&update.job_id) {
            tracing::debug!(job_id = %update.job_id, "status update for unknown job, ignored");
            return Response::Noop;
        }

        let filament_left = match self.check_status_update(&update) {
            Ok(x) => x,
            Err(rejection) => return Response::Rejected(rejection),
        };

        let Some(job) = self.print_jobs.get_mut(&update.job_id) else {
            return Response::Noop;
        };
        job.status = update.new_status;

        if let Some(left) = filament_left {
            if let Some(filament) = self.filaments.get_mut(&job.filament_id) {
                filament.remaining_weight_g = left;
            }
        }

        Response::StatusUpdate(update)
    }
}
