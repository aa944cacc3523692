use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use anyerror::AnyError;
use openraft::error::Infallible;
use reqwest::Method;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::Filament;
use crate::model::JobStatus;
use crate::model::PrintJob;
use crate::model::Printer;
use crate::model::StatusUpdate;
use crate::network::api::ErrorBody;
use crate::network::api::Health;
use crate::typ;
use crate::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    /// The node answered with a non-success status.
    #[error("{status}: {}", .body.error)]
    Api { status: StatusCode, body: ErrorBody },

    /// A cluster management call returned a raft error.
    #[error(transparent)]
    Raft(AnyError),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client of a print farm cluster.
///
/// Writes that land on a follower are answered with `503` and the leader's address; the client
/// then retries on the leader, at most `max_redirects` times.
#[derive(Clone)]
pub struct FleetClient {
    /// The node to send requests to. Updated when a follower points to the leader.
    target: Arc<Mutex<String>>,

    max_redirects: usize,

    timeout: Duration,

    inner: reqwest::Client,
}

impl FleetClient {
    pub fn new(addr: impl ToString) -> Self {
        Self {
            target: Arc::new(Mutex::new(addr.to_string())),
            max_redirects: 3,
            timeout: Duration::from_secs(10),
            inner: reqwest::Client::new(),
        }
    }

    /// Do not follow not-leader redirects.
    pub fn without_redirect(mut self) -> Self {
        self.max_redirects = 0;
        self
    }

    pub fn with_max_redirects(mut self, n: usize) -> Self {
        self.max_redirects = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The address requests are currently sent to.
    pub fn target(&self) -> String {
        self.target.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // --- Application API

    pub async fn health(&self) -> Result<Health, ClientError> {
        self.send(Method::GET, "health", &[], None::<&()>).await
    }

    pub async fn create_printer(&self, printer: &Printer) -> Result<Printer, ClientError> {
        self.send(Method::POST, "printers", &[], Some(printer)).await
    }

    pub async fn list_printers(&self) -> Result<Vec<Printer>, ClientError> {
        self.send(Method::GET, "printers", &[], None::<&()>).await
    }

    pub async fn create_filament(&self, filament: &Filament) -> Result<Filament, ClientError> {
        self.send(Method::POST, "filaments", &[], Some(filament)).await
    }

    pub async fn list_filaments(&self) -> Result<Vec<Filament>, ClientError> {
        self.send(Method::GET, "filaments", &[], None::<&()>).await
    }

    pub async fn create_print_job(&self, job: &PrintJob) -> Result<PrintJob, ClientError> {
        self.send(Method::POST, "print_jobs", &[], Some(job)).await
    }

    pub async fn list_print_jobs(&self) -> Result<Vec<PrintJob>, ClientError> {
        self.send(Method::GET, "print_jobs", &[], None::<&()>).await
    }

    pub async fn update_job_status(&self, job_id: &str, status: JobStatus) -> Result<StatusUpdate, ClientError> {
        let uri = format!("print_jobs/{}/status", job_id);
        self.send(Method::POST, &uri, &[("status", status.as_str())], None::<&()>).await
    }

    // --- Cluster management API

    /// Initialize a cluster of only the node that receives this request.
    pub async fn init(&self) -> Result<(), ClientError> {
        let empty: Vec<(NodeId, String)> = vec![];
        self.send_raft::<_, _, typ::InitializeError>(Method::POST, "init", Some(&empty)).await
    }

    /// Add a node as learner. Must be sent to the leader.
    pub async fn add_learner(&self, req: (NodeId, String)) -> Result<typ::ClientWriteResponse, ClientError> {
        self.send_raft::<_, _, typ::ClientWriteError>(Method::POST, "add-learner", Some(&req)).await
    }

    /// Change membership to the specified set of nodes. Must be sent to the leader.
    pub async fn change_membership(&self, req: &BTreeSet<NodeId>) -> Result<typ::ClientWriteResponse, ClientError> {
        self.send_raft::<_, _, typ::ClientWriteError>(Method::POST, "change-membership", Some(req)).await
    }

    /// Remove `node_id` from the voters, or the receiving node if `None`. Must be sent to the leader.
    pub async fn leave(&self, node_id: Option<NodeId>) -> Result<typ::ClientWriteResponse, ClientError> {
        match node_id {
            Some(id) => self.send_raft::<_, _, typ::ClientWriteError>(Method::POST, "leave", Some(&id)).await,
            None => self.send_raft::<(), _, typ::ClientWriteError>(Method::POST, "leave", None).await,
        }
    }

    pub async fn metrics(&self) -> Result<typ::RaftMetrics, ClientError> {
        self.send_raft::<(), _, Infallible>(Method::GET, "metrics", None).await
    }

    // --- Internal methods

    /// Sends to a management endpoint, which replies in form of `Result<T, RaftError<E>>`.
    async fn send_raft<Req, Resp, Err>(&self, method: Method, uri: &str, req: Option<&Req>) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        Err: std::error::Error + DeserializeOwned + 'static,
    {
        let res: Result<Resp, typ::RaftError<Err>> = self.send(method, uri, &[], req).await?;
        res.map_err(|e| ClientError::Raft(AnyError::new(&e)))
    }

    /// Sends a request to the current target and follows not-leader redirects.
    async fn send<Req, Resp>(
        &self,
        method: Method,
        uri: &str,
        query: &[(&str, &str)],
        req: Option<&Req>,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut n_redirect = 0;

        loop {
            let url = format!("http://{}/{}", self.target(), uri);

            let mut builder = self.inner.request(method.clone(), &url).timeout(self.timeout);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(r) = req {
                builder = builder.json(r);
            }

            tracing::debug!(%method, %url, ">>> client send request");

            let resp = builder.send().await.map_err(|e| ClientError::Http {
                url: url.clone(),
                source: e,
            })?;

            let status = resp.status();
            tracing::debug!(%url, %status, "<<< client recv reply");

            if status.is_success() {
                return resp.json().await.map_err(|e| ClientError::Http { url, source: e });
            }

            let text = resp.text().await.map_err(|e| ClientError::Http {
                url: url.clone(),
                source: e,
            })?;
            let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody {
                error: text,
                leader: None,
            });

            let leader_addr = body.leader.as_ref().and_then(|l| l.leader_addr.clone());

            match leader_addr {
                Some(addr) if status == StatusCode::SERVICE_UNAVAILABLE && n_redirect < self.max_redirects => {
                    tracing::info!(from = %url, to = %addr, "not leader, redirect");

                    *self.target.lock().unwrap_or_else(PoisonError::into_inner) = addr;
                    n_redirect += 1;
                }
                _ => return Err(ClientError::Api { status, body }),
            }
        }
    }
}
