//! HTTP surface.
//!
//! Every route except `/health` sits behind the access gate. Handlers
//! stay thin: parse, call the store or orchestrator, shape the response.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod responses;

use handlers::{health, runs, tasks};

/// Build the full router over the shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    let guarded = Router::new()
        .route("/runs", get(runs::list_runs))
        .route("/run", post(runs::create_run))
        .route(
            "/run/:id",
            get(runs::get_run)
                .post(runs::update_run)
                .delete(runs::delete_run),
        )
        .route("/run/:id/restart", post(runs::restart_run))
        .route(
            "/run/:id/tasks",
            get(tasks::list_tasks).post(tasks::add_tasks),
        )
        .route("/run/:id/task", post(tasks::create_task))
        .route("/run/:id/checkout", post(tasks::checkout))
        .route("/task/:id", get(tasks::get_task).post(tasks::update_task))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use droidstore_core::provenance::{
        RESERVED_AGENTVER, RESERVED_CLIENT, RESERVED_CREATOR, RESERVED_IMAGENAME,
        RESERVED_JOBNAME, RESERVED_LIVEMODE,
    };
    use droidstore_core::RunId;
    use droidstore_store::MemoryStore;

    use crate::auth::AccessGate;
    use crate::orchestrator::{Orchestrator, OrchestratorError, SupervisorSpec};

    use super::*;

    const TEST_KEY: &str = "test-key";

    /// Orchestrator double that records every call.
    #[derive(Default)]
    struct RecordingOrchestrator {
        created: StdMutex<Vec<SupervisorSpec>>,
        removed: StdMutex<Vec<(RunId, Option<String>)>>,
        fail_create: bool,
    }

    #[async_trait::async_trait]
    impl Orchestrator for RecordingOrchestrator {
        async fn create_supervisor(
            &self,
            spec: &SupervisorSpec,
        ) -> Result<String, OrchestratorError> {
            if self.fail_create {
                return Err(OrchestratorError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let mut created = self.created.lock().unwrap();
            created.push(spec.clone());
            Ok(format!("ctrl-{}-test{}", spec.run_id, created.len()))
        }

        async fn remove_run_jobs(
            &self,
            run_id: RunId,
            job_name: Option<&str>,
        ) -> Result<(), OrchestratorError> {
            self.removed
                .lock()
                .unwrap()
                .push((run_id, job_name.map(str::to_string)));
            Ok(())
        }
    }

    fn app_with(orchestrator: RecordingOrchestrator) -> (Router, Arc<RecordingOrchestrator>) {
        let orchestrator = Arc::new(orchestrator);
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            orchestrator.clone(),
            AccessGate::new(TEST_KEY, "http://127.0.0.1:0/keys", "aud"),
        );
        (create_router(state), orchestrator)
    }

    fn app() -> (Router, Arc<RecordingOrchestrator>) {
        app_with(RecordingOrchestrator::default())
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, TEST_KEY);
        match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn valid_details() -> Value {
        json!({
            RESERVED_CREATOR: "ops@example.com",
            RESERVED_CLIENT: "storecli 0.16.2",
        })
    }

    fn valid_settings() -> Value {
        json!({
            RESERVED_LIVEMODE: "False",
            RESERVED_IMAGENAME: "registry.example.com/droid:1",
            RESERVED_AGENTVER: "1.2.0",
        })
    }

    fn run_body() -> Value {
        json!({
            "name": "nightly",
            "details": valid_details(),
            "settings": valid_settings(),
        })
    }

    async fn create_run(router: &Router) -> i64 {
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/run", Some(run_body())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["id"].as_i64().unwrap()
    }

    async fn add_task(router: &Router, run_id: i64, name: &str) -> i64 {
        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{run_id}/task"),
                Some(json!({ "name": name })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_credential() {
        let (router, _) = app();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn guarded_route_without_credential_is_401() {
        let (router, _) = app();
        let response = router
            .oneshot(Request::builder().uri("/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unparseable_credential_is_400() {
        let (router, _) = app();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/runs")
                    .header(header::AUTHORIZATION, "Bearer ???")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_creation_requires_provenance() {
        let (router, orchestrator) = app();

        // no details at all
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/run", Some(json!({ "name": "x" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // client below the supported floor
        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/run",
                Some(json!({
                    "details": {
                        RESERVED_CREATOR: "ops@example.com",
                        RESERVED_CLIENT: "storecli 0.14.9",
                    }
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(orchestrator.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_creation_spawns_a_supervising_job() {
        let (router, orchestrator) = app();
        let id = create_run(&router).await;

        let created = orchestrator.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].run_id, RunId::new(id));
        assert_eq!(created[0].image, "registry.example.com/droid:1");
        assert_eq!(created[0].agent_version, "1.2.0");
        assert!(!created[0].live);
    }

    #[tokio::test]
    async fn owner_backfills_from_creator_and_lists_filter() {
        let (router, _) = app();
        create_run(&router).await;

        let response = router
            .clone()
            .oneshot(request(Method::GET, "/runs?owner=ops@example.com", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let runs = body_json(response).await;
        assert_eq!(runs.as_array().unwrap().len(), 1);
        assert_eq!(runs[0]["owner"], "ops@example.com");

        let response = router
            .oneshot(request(Method::GET, "/runs?owner=nobody", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn run_settings_are_immutable() {
        let (router, _) = app();
        let id = create_run(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{id}"),
                Some(json!({ "settings": { "k": "v" } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // and the stored value did not move
        let response = router
            .oneshot(request(Method::GET, &format!("/run/{id}"), None))
            .await
            .unwrap();
        let run = body_json(response).await;
        assert_eq!(run["settings"][RESERVED_AGENTVER], "1.2.0");
    }

    #[tokio::test]
    async fn run_status_only_moves_forward() {
        let (router, _) = app();
        let id = create_run(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{id}"),
                Some(json!({ "status": "Running" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(request(
                Method::POST,
                &format!("/run/{id}"),
                Some(json!({ "status": "Scheduling" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn task_immutable_fields_are_rejected() {
        let (router, _) = app();
        let run_id = create_run(&router).await;
        let task_id = add_task(&router, run_id, "step-1").await;

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/task/{task_id}"),
                Some(json!({ "name": "renamed" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(request(Method::GET, &format!("/task/{task_id}"), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["name"], "step-1");
    }

    #[tokio::test]
    async fn task_result_updates_apply() {
        let (router, _) = app();
        let run_id = create_run(&router).await;
        let task_id = add_task(&router, run_id, "step-1").await;

        let response = router
            .oneshot(request(
                Method::POST,
                &format!("/task/{task_id}"),
                Some(json!({
                    "status": "completed",
                    "result": "passed",
                    "duration": 12500,
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let task = body_json(response).await;
        assert_eq!(task["status"], "completed");
        assert_eq!(task["result"], "passed");
    }

    #[tokio::test]
    async fn batch_insert_reports_the_count() {
        let (router, _) = app();
        let run_id = create_run(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{run_id}/tasks"),
                Some(json!([{ "name": "a" }, { "name": "b" }, { "name": "c" }])),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["added"], 3);

        let response = router
            .oneshot(request(Method::GET, &format!("/run/{run_id}/tasks"), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn batch_insert_rejects_a_nameless_task() {
        let (router, _) = app();
        let run_id = create_run(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{run_id}/tasks"),
                Some(json!([{ "name": "a" }, { "annotation": "no name" }])),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // nothing from the batch landed
        let response = router
            .oneshot(request(Method::GET, &format!("/run/{run_id}/tasks"), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn concurrent_checkouts_hand_each_task_out_once() {
        let (router, _) = app();
        let run_id = create_run(&router).await;
        for i in 0..5 {
            add_task(&router, run_id, &format!("step-{i}")).await;
        }

        let mut workers = Vec::new();
        for _ in 0..3 {
            let router = router.clone();
            workers.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    let response = router
                        .clone()
                        .oneshot(request(
                            Method::POST,
                            &format!("/run/{run_id}/checkout"),
                            None,
                        ))
                        .await
                        .unwrap();
                    match response.status() {
                        StatusCode::OK => {
                            claimed.push(body_json(response).await["id"].as_i64().unwrap());
                        }
                        StatusCode::NO_CONTENT => break,
                        other => panic!("unexpected checkout status {other}"),
                    }
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }
        let distinct: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(all.len(), 5);
        assert_eq!(distinct.len(), 5);

        // every task moved to scheduled exactly once
        let response = router
            .oneshot(request(Method::GET, &format!("/run/{run_id}/tasks"), None))
            .await
            .unwrap();
        let tasks = body_json(response).await;
        for task in tasks.as_array().unwrap() {
            assert_eq!(task["status"], "scheduled");
        }
    }

    #[tokio::test]
    async fn checkout_distinguishes_exhaustion_from_absence() {
        let (router, _) = app();
        let run_id = create_run(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{run_id}/checkout"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());

        let response = router
            .oneshot(request(Method::POST, "/run/424242/checkout", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_tears_down_jobs_then_cascades() {
        let (router, orchestrator) = app();
        let run_id = create_run(&router).await;
        let task_id = add_task(&router, run_id, "step-1").await;

        // controller recorded its job name in the details
        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{run_id}"),
                Some(json!({ "details": { RESERVED_JOBNAME: "ctrl-1-abcd" } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(request(Method::DELETE, &format!("/run/{run_id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "removed");

        let removed = orchestrator.removed.lock().unwrap().clone();
        assert_eq!(
            removed,
            vec![(RunId::new(run_id), Some("ctrl-1-abcd".to_string()))]
        );

        for uri in [format!("/run/{run_id}"), format!("/task/{task_id}")] {
            let response = router
                .clone()
                .oneshot(request(Method::GET, &uri, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        // a second delete finds nothing
        let response = router
            .oneshot(request(Method::DELETE, &format!("/run/{run_id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn restart_replaces_the_job_and_rewinds_the_status() {
        let (router, orchestrator) = app();
        let run_id = create_run(&router).await;
        add_task(&router, run_id, "step-1").await;

        // the run had progressed
        router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/run/{run_id}"),
                Some(json!({ "status": "Running" })),
            ))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(request(Method::POST, &format!("/run/{run_id}/restart"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "Scheduling");

        assert_eq!(orchestrator.removed.lock().unwrap().len(), 1);
        assert_eq!(orchestrator.created.lock().unwrap().len(), 2);

        // tasks keep whatever state they had
        let response = router
            .oneshot(request(Method::GET, &format!("/run/{run_id}/tasks"), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await[0]["status"], "initialized");
    }

    #[tokio::test]
    async fn failed_job_creation_leaves_the_run_behind() {
        let (router, _) = app_with(RecordingOrchestrator {
            fail_create: true,
            ..Default::default()
        });

        let response = router
            .clone()
            .oneshot(request(Method::POST, "/run", Some(run_body())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = router
            .oneshot(request(Method::GET, "/runs", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_json_settings_survive_as_plain_text() {
        let (router, _) = app();
        let response = router
            .clone()
            .oneshot(request(
                Method::POST,
                "/run",
                Some(json!({
                    "details": valid_details(),
                    "settings": "opaque blob the client made up",
                })),
            ))
            .await
            .unwrap();
        // string settings carry no job parameters
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(request(Method::GET, "/runs", None))
            .await
            .unwrap();
        let runs = body_json(response).await;
        assert_eq!(runs[0]["settings"], "opaque blob the client made up");
    }
}
