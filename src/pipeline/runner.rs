//! The pipeline runner: drives the stage table in order for one session.
//!
//! One run is strictly sequential — stage k's prompt consumes stage k-1's
//! artifact, and stage k does not start until that artifact is durably
//! persisted. The only suspension points are the backend call and the
//! persistence writes. Once started, a run is not cancellable: a consumer
//! that stops listening does not stop the run, and every remaining stage is
//! still persisted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::backend::GenerationBackend;
use crate::errors::PipelineError;
use crate::extract::extract_value;
use crate::pipeline::models::{Artifact, PipelineEvent, PipelineRun, StageResult};
use crate::session::{AccessGate, Session};
use crate::stage::{StageId, stage_table};
use crate::store::DbHandle;

pub struct PipelineRunner {
    db: DbHandle,
    backend: Arc<dyn GenerationBackend>,
    gate: Arc<dyn AccessGate>,
}

impl PipelineRunner {
    pub fn new(db: DbHandle, backend: Arc<dyn GenerationBackend>, gate: Arc<dyn AccessGate>) -> Self {
        Self { db, backend, gate }
    }

    /// Start a run for a session.
    ///
    /// The gate is checked exactly once, before any stage; a denial surfaces
    /// here and no partial run occurs. On success the run is spawned as a
    /// detached task and the receiver yields events until the run completes
    /// or aborts. Dropping the receiver does not stop the run.
    pub async fn start(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<mpsc::UnboundedReceiver<PipelineEvent>, PipelineError> {
        let session = {
            let id = session_id.to_string();
            self.db
                .call(move |db| db.get_session(&id))
                .await
                .map_err(PipelineError::Other)?
        }
        .ok_or_else(|| PipelineError::SessionNotFound {
            id: session_id.to_string(),
        })?;

        self.gate.check_access(&session, identity)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let db = self.db.clone();
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let session_id = session.id.clone();
            if let Err(e) = run_session(db, backend, session, tx).await {
                warn!(session = %session_id, "pipeline run aborted: {}", e);
            }
        });

        Ok(rx)
    }
}

/// Execute every stage in table order for one session.
///
/// Event send failures are ignored throughout: they only mean the consumer
/// went away, and the run is fire-and-forget once started.
async fn run_session(
    db: DbHandle,
    backend: Arc<dyn GenerationBackend>,
    session: Session,
    tx: mpsc::UnboundedSender<PipelineEvent>,
) -> Result<(), PipelineError> {
    let mut working: HashMap<StageId, Artifact> = HashMap::new();
    let mut run = PipelineRun::default();

    for stage in stage_table() {
        let _ = tx.send(PipelineEvent::StageRunning { stage: stage.id });
        info!(session = %session.id, stage = %stage.id, "stage running");

        // Dependencies come from this run's own working set, never re-read
        // from storage mid-run.
        let request = stage.build_request(&session.transcript, &working);

        let response = match backend.invoke(&request).await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(PipelineEvent::StageError {
                    message: e.to_string(),
                });
                run.record(StageResult::error(stage.id));
                return Err(e.into());
            }
        };

        let raw = response.text();
        let artifact = match extract_value(&raw) {
            Some(value) => Artifact::Structured {
                stage: stage.id,
                value,
            },
            None => {
                // Not a run failure: later stages can consume arbitrary text.
                info!(session = %session.id, stage = %stage.id, "no recoverable structure, storing degraded artifact");
                stage.degraded_artifact(&raw)
            }
        };

        // The artifact must be durable before the next stage starts.
        let persisted = {
            let id = session.id.clone();
            let artifact = artifact.clone();
            db.call(move |db| db.upsert_artifact(&id, &artifact)).await
        };
        if let Err(source) = persisted {
            let _ = tx.send(PipelineEvent::StageError {
                message: format!("Failed to persist {} result: {}", stage.id, source),
            });
            run.record(StageResult::error(stage.id));
            return Err(PipelineError::Persistence {
                stage: stage.id,
                source,
            });
        }

        let advanced = {
            let id = session.id.clone();
            let status = stage.status_on_success;
            db.call(move |db| db.advance_status(&id, status)).await
        };
        if let Err(source) = advanced {
            let _ = tx.send(PipelineEvent::StageError {
                message: format!("Failed to persist {} result: {}", stage.id, source),
            });
            run.record(StageResult::error(stage.id));
            return Err(PipelineError::Persistence {
                stage: stage.id,
                source,
            });
        }

        run.record(StageResult::done(stage.id, artifact.clone()));
        let _ = tx.send(PipelineEvent::StageDone {
            stage: stage.id,
            artifact: artifact.clone(),
        });
        working.insert(stage.id, artifact);
    }

    let _ = tx.send(PipelineEvent::RunComplete {});
    info!(session = %session.id, stages = run.completed_stages(), "pipeline run complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationRequest, RawResponse};
    use crate::errors::BackendError;
    use crate::session::{OwnerGate, SessionStatus};
    use crate::store::Db;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays a fixed script of responses and records the
    /// requests it saw.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<RawResponse, BackendError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<RawResponse, BackendError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn invoke(
            &self,
            request: &GenerationRequest,
        ) -> Result<RawResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(BackendError::Transport {
                        message: "script exhausted".to_string(),
                    })
                })
        }
    }

    fn reply(text: &str) -> Result<RawResponse, BackendError> {
        Ok(RawResponse::from_text(text))
    }

    async fn setup(
        responses: Vec<Result<RawResponse, BackendError>>,
    ) -> (PipelineRunner, DbHandle, Session, Arc<ScriptedBackend>) {
        let db = DbHandle::new(Db::new_in_memory().unwrap());
        let session = Session::new("alice", "Test", "We discussed the product.");
        let stored = session.clone();
        db.call(move |db| db.create_session(&stored)).await.unwrap();

        let backend = Arc::new(ScriptedBackend::new(responses));
        let runner = PipelineRunner::new(db.clone(), backend.clone(), Arc::new(OwnerGate));
        (runner, db, session, backend)
    }

    async fn collect_events(
        mut rx: mpsc::UnboundedReceiver<PipelineEvent>,
    ) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    // =========================================
    // Happy path
    // =========================================

    #[tokio::test]
    async fn test_full_run_persists_all_stages() {
        let (runner, db, session, _) = setup(vec![
            reply(r#"{"facts": [{"statement": "a"}]}"#),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": [], "non_functional": [], "constraints": []}"#),
            reply(r#"{"overview": "x", "components": [], "build_order": []}"#),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        let events = collect_events(rx).await;

        // 4 running + 4 done + 1 complete.
        assert_eq!(events.len(), 9);
        assert!(matches!(events.last(), Some(PipelineEvent::RunComplete {})));

        let id = session.id.clone();
        assert_eq!(db.call(move |db| db.count_artifacts(&id)).await.unwrap(), 4);

        let id = session.id.clone();
        let loaded = db.call(move |db| db.get_session(&id)).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::BlueprintReady);
    }

    #[tokio::test]
    async fn test_later_stages_consume_prior_artifacts() {
        let (runner, _db, session, backend) = setup(vec![
            reply(r#"{"facts": [{"statement": "uses stripe"}]}"#),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": []}"#),
            reply(r#"{"overview": "x"}"#),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        collect_events(rx).await;

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        // Stage 1 sees the transcript; stage 2 sees stage 1's artifact.
        assert!(requests[0].messages[0].content.contains("We discussed the product."));
        assert!(requests[1].messages[0].content.contains("uses stripe"));
        // Stage 3 consumes both facts and hypotheses.
        assert!(requests[2].messages[0].content.contains("## FACTS"));
        assert!(requests[2].messages[0].content.contains("## HYPOTHESES"));
    }

    // =========================================
    // Degraded continuation
    // =========================================

    #[tokio::test]
    async fn test_unparseable_response_degrades_but_continues() {
        let raw_text = "I am unable to produce JSON for this.";
        let (runner, db, session, _) = setup(vec![
            reply(raw_text),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": []}"#),
            reply(r#"{"overview": "x"}"#),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        let events = collect_events(rx).await;

        assert!(matches!(events.last(), Some(PipelineEvent::RunComplete {})));

        let id = session.id.clone();
        assert_eq!(db.call(move |db| db.count_artifacts(&id)).await.unwrap(), 4);

        // Stage 1's artifact carries the raw text verbatim.
        let id = session.id.clone();
        let artifact = db
            .call(move |db| db.get_artifact(&id, StageId::Facts))
            .await
            .unwrap()
            .unwrap();
        match artifact {
            Artifact::Degraded { raw, .. } => assert_eq!(raw, raw_text),
            _ => panic!("Expected degraded artifact"),
        }
    }

    #[tokio::test]
    async fn test_truncated_response_is_repaired_not_degraded() {
        let (runner, db, session, _) = setup(vec![
            reply(r#"{"facts": [{"statement": "cut off mid-sent"#),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": []}"#),
            reply(r#"{"overview": "x"}"#),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        collect_events(rx).await;

        let id = session.id.clone();
        let artifact = db
            .call(move |db| db.get_artifact(&id, StageId::Facts))
            .await
            .unwrap()
            .unwrap();
        match artifact {
            Artifact::Structured { value, .. } => {
                assert_eq!(value, json!({"facts": [{"statement": "cut off mid-sent"}]}));
            }
            _ => panic!("Expected repaired structured artifact"),
        }
    }

    // =========================================
    // Abort semantics
    // =========================================

    #[tokio::test]
    async fn test_backend_fault_at_stage_two_aborts() {
        let (runner, db, session, _) = setup(vec![
            reply(r#"{"facts": []}"#),
            Err(BackendError::Transport {
                message: "connection reset".to_string(),
            }),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        let events = collect_events(rx).await;

        // running(facts), done(facts), running(hypotheses), error — nothing after.
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            PipelineEvent::StageRunning { stage: StageId::Facts }
        ));
        assert!(matches!(
            &events[1],
            PipelineEvent::StageDone { stage: StageId::Facts, .. }
        ));
        assert!(matches!(
            &events[2],
            PipelineEvent::StageRunning { stage: StageId::Hypotheses }
        ));
        match &events[3] {
            PipelineEvent::StageError { message } => {
                assert!(message.contains("connection reset"));
            }
            other => panic!("Expected stage-error, got {:?}", other),
        }

        // Exactly one artifact persisted; stage 1 remains usable.
        let id = session.id.clone();
        assert_eq!(db.call(move |db| db.count_artifacts(&id)).await.unwrap(), 1);
        let id = session.id.clone();
        let loaded = db.call(move |db| db.get_session(&id)).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::FactsExtracted);
    }

    #[tokio::test]
    async fn test_content_fault_aborts_like_transport_fault() {
        let (runner, db, session, _) = setup(vec![Err(BackendError::Content {
            message: "Overloaded".to_string(),
        })])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        let events = collect_events(rx).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], PipelineEvent::StageError { .. }));
        let id = session.id.clone();
        assert_eq!(db.call(move |db| db.count_artifacts(&id)).await.unwrap(), 0);
    }

    // =========================================
    // Re-run overwrite
    // =========================================

    #[tokio::test]
    async fn test_rerun_overwrites_artifacts_in_place() {
        let (runner, db, session, _) = setup(vec![
            reply(r#"{"facts": ["first run"]}"#),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": []}"#),
            reply(r#"{"overview": "x"}"#),
            // Second run.
            reply(r#"{"facts": ["second run"]}"#),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": []}"#),
            reply(r#"{"overview": "x"}"#),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        collect_events(rx).await;
        let rx = runner.start(&session.id, "alice").await.unwrap();
        collect_events(rx).await;

        let id = session.id.clone();
        assert_eq!(db.call(move |db| db.count_artifacts(&id)).await.unwrap(), 4);

        let id = session.id.clone();
        let artifact = db
            .call(move |db| db.get_artifact(&id, StageId::Facts))
            .await
            .unwrap()
            .unwrap();
        match artifact {
            Artifact::Structured { value, .. } => {
                assert_eq!(value, json!({"facts": ["second run"]}));
            }
            _ => panic!("Expected structured artifact"),
        }
    }

    // =========================================
    // Pre-run gating
    // =========================================

    #[tokio::test]
    async fn test_gate_denial_before_any_stage() {
        let (runner, db, session, backend) = setup(vec![reply(r#"{"facts": []}"#)]).await;

        let result = runner.start(&session.id, "mallory").await;
        assert!(matches!(
            result.err(),
            Some(PipelineError::AccessDenied { .. })
        ));

        // No backend call, no artifacts.
        assert!(backend.requests.lock().unwrap().is_empty());
        let id = session.id.clone();
        assert_eq!(db.call(move |db| db.count_artifacts(&id)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_reported() {
        let (runner, _db, _session, _) = setup(vec![]).await;
        let result = runner.start("no-such-session", "alice").await;
        assert!(matches!(
            result.err(),
            Some(PipelineError::SessionNotFound { .. })
        ));
    }

    // =========================================
    // Fire-and-forget
    // =========================================

    #[tokio::test]
    async fn test_dropped_receiver_does_not_stop_the_run() {
        let (runner, db, session, _) = setup(vec![
            reply(r#"{"facts": []}"#),
            reply(r#"{"hypotheses": []}"#),
            reply(r#"{"functional": []}"#),
            reply(r#"{"overview": "x"}"#),
        ])
        .await;

        let rx = runner.start(&session.id, "alice").await.unwrap();
        drop(rx);

        // The detached task keeps persisting stages with nobody listening.
        let id = session.id.clone();
        let mut persisted = 0;
        for _ in 0..50 {
            let id = id.clone();
            persisted = db.call(move |db| db.count_artifacts(&id)).await.unwrap();
            if persisted == 4 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(persisted, 4);
    }
}
