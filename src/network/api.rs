use actix_web::error::InternalError;
use actix_web::get;
use actix_web::http::StatusCode;
use actix_web::post;
use actix_web::web;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::web::Path;
use actix_web::web::Query;
use actix_web::HttpResponse;
use actix_web::Responder;
use actix_web::ResponseError;
use openraft::ServerState;
use serde::Deserialize;
use serde::Serialize;

use crate::app::App;
use crate::coordinator::Consensus;
use crate::coordinator::LeaderHint;
use crate::coordinator::WriteError;
use crate::model::Filament;
use crate::model::JobStatus;
use crate::model::PrintJob;
use crate::model::Printer;
use crate::store::fleet::Rejection;
use crate::NodeId;

/// Registers the application API. Mounted at the root and under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_printer)
        .service(list_printers)
        .service(create_filament)
        .service(list_filaments)
        .service(create_print_job)
        .service(list_print_jobs)
        .service(update_job_status);
}

/// Body of every non-2xx application API response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,

    /// Set when the request must be retried on the leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<LeaderHint>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub node_id: NodeId,
    pub cluster_name: String,
    pub state: ServerState,
    pub current_leader: Option<NodeId>,

    /// Where writes go, as far as this replica knows.
    pub leader: LeaderHint,
}

#[derive(Deserialize, Debug)]
pub struct StatusQuery {
    pub status: String,
}

impl ResponseError for WriteError {
    fn status_code(&self) -> StatusCode {
        match self {
            WriteError::Rejected(Rejection::AlreadyExists { .. }) => StatusCode::CONFLICT,
            WriteError::Rejected(Rejection::JobNotFound(_)) => StatusCode::NOT_FOUND,
            WriteError::Rejected(_) => StatusCode::BAD_REQUEST,
            WriteError::NotLeader(_) => StatusCode::SERVICE_UNAVAILABLE,
            WriteError::Timeout(_)
            | WriteError::Replication(_)
            | WriteError::Encode(_)
            | WriteError::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let leader = match self {
            WriteError::NotLeader(hint) => Some(hint.clone()),
            _ => None,
        };

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            leader,
        })
    }
}

// --- Application API

#[get("/health")]
pub async fn health(app: Data<App>) -> actix_web::Result<impl Responder> {
    let (state, current_leader) = {
        let metrics = app.raft.metrics();
        let m = metrics.borrow();
        (m.state, m.current_leader)
    };

    Ok(Json(Health {
        node_id: app.id,
        cluster_name: app.config.cluster_name.clone(),
        state,
        current_leader,
        leader: app.coordinator.consensus().leader_hint(),
    }))
}

#[post("/printers")]
pub async fn create_printer(app: Data<App>, req: Json<Printer>) -> actix_web::Result<impl Responder> {
    let printer = app.coordinator.create_printer(req.0).await?;
    Ok(HttpResponse::Created().json(printer))
}

#[get("/printers")]
pub async fn list_printers(app: Data<App>) -> actix_web::Result<impl Responder> {
    let printers = app.state_machine_store.printers().await;
    Ok(Json(printers))
}

#[post("/filaments")]
pub async fn create_filament(app: Data<App>, req: Json<Filament>) -> actix_web::Result<impl Responder> {
    let filament = app.coordinator.create_filament(req.0).await?;
    Ok(HttpResponse::Created().json(filament))
}

#[get("/filaments")]
pub async fn list_filaments(app: Data<App>) -> actix_web::Result<impl Responder> {
    let filaments = app.state_machine_store.filaments().await;
    Ok(Json(filaments))
}

#[post("/print_jobs")]
pub async fn create_print_job(app: Data<App>, req: Json<PrintJob>) -> actix_web::Result<impl Responder> {
    let job = app.coordinator.create_print_job(req.0).await?;
    Ok(HttpResponse::Created().json(job))
}

#[get("/print_jobs")]
pub async fn list_print_jobs(app: Data<App>) -> actix_web::Result<impl Responder> {
    let jobs = app.state_machine_store.print_jobs().await;
    Ok(Json(jobs))
}

/// `POST /print_jobs/{id}/status?status=running`
#[post("/print_jobs/{id}/status")]
pub async fn update_job_status(
    app: Data<App>,
    job_id: Path<String>,
    query: Query<StatusQuery>,
) -> actix_web::Result<impl Responder> {
    let new_status = query.status.parse::<JobStatus>().map_err(|e| {
        let resp = HttpResponse::BadRequest().json(ErrorBody {
            error: e.to_string(),
            leader: None,
        });
        InternalError::from_response(e, resp)
    })?;

    let update = app.coordinator.submit_status_update(&job_id, new_status).await?;
    Ok(Json(update))
}
