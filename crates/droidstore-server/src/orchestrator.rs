//! Compute-job orchestrator interface.
//!
//! The run lifecycle creates and tears down a supervising job per run in
//! the cluster. Calls are fire-and-forget relative to the store: a failed
//! orchestrator call is logged and surfaced, but never rolls back a
//! committed run or task row. The store's own state stays authoritative
//! even when the orchestrator is unreachable.

use async_trait::async_trait;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use droidstore_core::provenance::{RESERVED_AGENTVER, RESERVED_IMAGENAME, RESERVED_LIVEMODE};
use droidstore_core::{Run, RunId};

/// Errors from orchestrator calls.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The cluster API request itself failed.
    #[error("cluster API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cluster API answered with a non-success status.
    #[error("cluster API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// In-cluster configuration (token, namespace, CA) is unavailable.
    #[error("cluster configuration unavailable: {0}")]
    Config(String),

    /// The run's settings bag is missing a reserved job parameter.
    #[error("run settings are missing \"{0}\"")]
    MissingSetting(&'static str),
}

/// Parameters of a supervising job, pulled verbatim from a run's
/// immutable settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSpec {
    pub run_id: RunId,
    pub live: bool,
    pub image: String,
    pub agent_version: String,
}

impl SupervisorSpec {
    /// Extract the job parameters from the run's settings bag.
    pub fn from_run(run: &Run) -> Result<Self, OrchestratorError> {
        let settings = run
            .settings
            .as_ref()
            .ok_or(OrchestratorError::MissingSetting(RESERVED_IMAGENAME))?;
        let get = |key: &'static str| {
            settings
                .get_str(key)
                .map(str::to_string)
                .ok_or(OrchestratorError::MissingSetting(key))
        };
        Ok(Self {
            run_id: run.id,
            live: settings.get_str(RESERVED_LIVEMODE) == Some("True"),
            image: get(RESERVED_IMAGENAME)?,
            agent_version: get(RESERVED_AGENTVER)?,
        })
    }
}

/// The narrow orchestrator interface the lifecycle manager consumes.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Start a supervising job for a run. Returns the job name.
    async fn create_supervisor(&self, spec: &SupervisorSpec) -> Result<String, OrchestratorError>;

    /// Tear down every job labeled with the run id, then the specific job
    /// recorded by the controller, when one is named.
    async fn remove_run_jobs(
        &self,
        run_id: RunId,
        job_name: Option<&str>,
    ) -> Result<(), OrchestratorError>;
}

/// Orchestrator that does nothing. Used when the server runs outside a
/// cluster; lifecycle operations still succeed against the store.
pub struct NoopOrchestrator;

#[async_trait]
impl Orchestrator for NoopOrchestrator {
    async fn create_supervisor(&self, spec: &SupervisorSpec) -> Result<String, OrchestratorError> {
        debug!(run_id = %spec.run_id, "no cluster configured; supervising job not created");
        Ok(format!("noop-{}", spec.run_id))
    }

    async fn remove_run_jobs(
        &self,
        run_id: RunId,
        _job_name: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        debug!(run_id = %run_id, "no cluster configured; nothing to tear down");
        Ok(())
    }
}

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const CLUSTER_API: &str = "https://kubernetes.default.svc";

#[derive(Deserialize)]
struct JobList {
    #[serde(default)]
    items: Vec<JobItem>,
}

#[derive(Deserialize)]
struct JobItem {
    metadata: JobMetadata,
}

#[derive(Deserialize)]
struct JobMetadata {
    name: String,
}

/// Kubernetes batch/v1 orchestrator, talking to the in-cluster API server
/// with the pod's service-account credentials.
pub struct KubeOrchestrator {
    http: reqwest::Client,
    base_url: String,
    namespace: String,
    token: String,
}

impl KubeOrchestrator {
    /// Build from the in-cluster service-account mount.
    pub fn from_cluster() -> Result<Self, OrchestratorError> {
        let read = |file: &str| {
            std::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/{file}"))
                .map_err(|e| OrchestratorError::Config(format!("{file}: {e}")))
        };
        let token = read("token")?.trim().to_string();
        let namespace = read("namespace")?.trim().to_string();
        let ca = std::fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt"))
            .map_err(|e| OrchestratorError::Config(format!("ca.crt: {e}")))?;
        let certificate = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| OrchestratorError::Config(format!("ca.crt: {e}")))?;
        let http = reqwest::Client::builder()
            .add_root_certificate(certificate)
            .build()?;

        Ok(Self {
            http,
            base_url: CLUSTER_API.to_string(),
            namespace,
            token,
        })
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.base_url, self.namespace
        )
    }

    async fn delete_jobs_by_selector(&self, selector: &str) -> Result<(), OrchestratorError> {
        let list: JobList = check(
            self.http
                .get(self.jobs_url())
                .bearer_auth(&self.token)
                .query(&[("labelSelector", selector)])
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        for job in list.items {
            debug!(job = %job.metadata.name, selector, "deleting job");
            check(
                self.http
                    .delete(format!("{}/{}", self.jobs_url(), job.metadata.name))
                    .bearer_auth(&self.token)
                    // do not wait for owned pods to finish terminating
                    .json(&json!({ "propagationPolicy": "Background" }))
                    .send()
                    .await?,
            )
            .await?;
        }
        Ok(())
    }

    fn supervisor_manifest(&self, name: &str, spec: &SupervisorSpec) -> serde_json::Value {
        let labels = json!({
            "run_id": spec.run_id.to_string(),
            "run_live": if spec.live { "True" } else { "False" },
        });
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": name, "labels": labels },
            "spec": {
                "backoffLimit": 3,
                "template": {
                    "metadata": { "name": name, "labels": labels },
                    "spec": {
                        "containers": [{
                            "name": "main",
                            "image": spec.image,
                            "command": ["/mnt/agents/dispatcher", "-run", spec.run_id.to_string()],
                            "env": [
                                {
                                    "name": "DROIDSTORE_INTERNAL_COMKEY",
                                    "valueFrom": { "secretKeyRef": { "name": "store-secrets", "key": "comkey" } }
                                },
                                {
                                    "name": "ENV_POD_NAME",
                                    "valueFrom": { "fieldRef": { "fieldPath": "metadata.name" } }
                                }
                            ],
                            "volumeMounts": [
                                { "mountPath": "/mnt/agents", "name": "agents-storage", "readOnly": true }
                            ]
                        }],
                        "imagePullSecrets": [{ "name": "registry-secrets" }],
                        "volumes": [{
                            "name": "agents-storage",
                            "azureFile": {
                                "readOnly": true,
                                "secretName": "agent-secrets",
                                "shareName": format!("linux-{}", spec.agent_version)
                            }
                        }],
                        "restartPolicy": "Never"
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_supervisor(&self, spec: &SupervisorSpec) -> Result<String, OrchestratorError> {
        let mut tag = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut tag);
        let name = format!("ctrl-{}-{}", spec.run_id, hex::encode(tag));

        info!(run_id = %spec.run_id, job = %name, image = %spec.image, "creating supervising job");
        check(
            self.http
                .post(self.jobs_url())
                .bearer_auth(&self.token)
                .json(&self.supervisor_manifest(&name, spec))
                .send()
                .await?,
        )
        .await?;
        Ok(name)
    }

    async fn remove_run_jobs(
        &self,
        run_id: RunId,
        job_name: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.delete_jobs_by_selector(&format!("run_id={run_id}"))
            .await?;
        if let Some(name) = job_name {
            self.delete_jobs_by_selector(&format!("job-name={name}"))
                .await?;
        }
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, OrchestratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OrchestratorError::Api {
        status: status.as_u16(),
        body,
    })
}
