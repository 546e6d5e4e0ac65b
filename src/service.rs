use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

use crate::engine::traits::ContainerEngine;
use crate::messages::{RequestEnvelope, RequestKind, ResponseEnvelope};
use crate::registry::CompilerRegistry;
use crate::router::EventRouter;
use crate::sandbox::multi_test::MultiTestOrchestrator;
use crate::sandbox::single_test::SingleTestSandbox;
use crate::sandbox::{Sandbox, SandboxError};
use crate::workspace::WorkspaceManager;

#[derive(Debug, thiserror::Error)]
#[error("failed to publish response: {msg}")]
pub struct PublishError {
    pub msg: String,
}

/// The outbound half of the queue boundary. The transport itself is an
/// external collaborator; the core only needs somewhere to hand the
/// finished envelope.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ResponsePublisher: std::fmt::Debug + Send + Sync {
    async fn publish(&self, response: ResponseEnvelope) -> Result<(), PublishError>;
}

/// A publisher that logs the serialized response, used when no broker
/// is wired up.
#[derive(Debug)]
pub struct TracingPublisher;

#[async_trait::async_trait]
impl ResponsePublisher for TracingPublisher {
    async fn publish(&self, response: ResponseEnvelope) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&response)
            .map_err(|e| PublishError { msg: e.to_string() })?;
        tracing::info!(response = %payload, "response");
        Ok(())
    }
}

/// Consumes request envelopes from the transport boundary, validates
/// them against the compiler registry, runs the matching sandbox shape
/// and publishes the result. One spawned task per request; a failing
/// request never affects its siblings.
#[derive(Debug)]
pub struct CompilerService {
    registry: Arc<CompilerRegistry>,
    engine: Arc<dyn ContainerEngine>,
    router: Arc<EventRouter>,
    workspaces: WorkspaceManager,
    publisher: Arc<dyn ResponsePublisher>,
}

impl CompilerService {
    pub fn new(
        registry: Arc<CompilerRegistry>,
        engine: Arc<dyn ContainerEngine>,
        router: Arc<EventRouter>,
        workspaces: WorkspaceManager,
        publisher: Arc<dyn ResponsePublisher>,
    ) -> Self {
        Self {
            registry,
            engine,
            router,
            workspaces,
            publisher,
        }
    }

    pub fn handle_requests(
        self: Arc<Self>,
        mut requests: Receiver<RequestEnvelope>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = requests.recv().await {
                let service = self.clone();
                tokio::spawn(async move {
                    service.handle(envelope).await;
                });
            }
        })
    }

    #[tracing::instrument(skip_all, fields(request_id = %envelope.id, kind = ?envelope.kind))]
    pub async fn handle(&self, envelope: RequestEnvelope) {
        // Boundary assertion: an unknown compiler stops processing of
        // this message; no degraded response is attempted.
        let Some(profile) = self.registry.get(&envelope.compiler_name) else {
            tracing::error!(
                compiler = %envelope.compiler_name,
                "unknown compiler, dropping request"
            );
            return;
        };

        let request = envelope.to_sandbox_request(profile);

        let response: Result<ResponseEnvelope, SandboxError> = match envelope.kind {
            RequestKind::Compile => {
                let sandbox = Sandbox::new(
                    request,
                    self.engine.clone(),
                    self.router.clone(),
                    self.workspaces.clone(),
                );
                sandbox.run().await.map(ResponseEnvelope::from)
            }
            RequestKind::SingleTest => match envelope.test_case {
                Some(test_case) => {
                    let sandbox = SingleTestSandbox::new(
                        request,
                        test_case,
                        self.engine.clone(),
                        self.router.clone(),
                        self.workspaces.clone(),
                    );
                    sandbox.run().await.map(ResponseEnvelope::from)
                }
                // Nothing to evaluate against; run the sandbox plainly
                // and report the raw capture without a verdict.
                None => {
                    tracing::warn!("single-test request without a test case");
                    let sandbox = Sandbox::new(
                        request,
                        self.engine.clone(),
                        self.router.clone(),
                        self.workspaces.clone(),
                    );
                    sandbox.run().await.map(ResponseEnvelope::from)
                }
            },
            RequestKind::MultipleTests => {
                let orchestrator = MultiTestOrchestrator::new(
                    request,
                    envelope.test_cases,
                    envelope.run_all,
                    envelope.run_all_parallel,
                    self.engine.clone(),
                    self.router.clone(),
                    self.workspaces.clone(),
                );
                Ok(ResponseEnvelope::from(orchestrator.run().await))
            }
        };

        match response {
            Ok(response) => {
                if let Err(e) = self.publisher.publish(response).await {
                    tracing::error!("failed to publish response: {e}");
                }
            }
            // A distinct failure channel from "completed with Failed":
            // the run never finished, so no response is emitted.
            Err(e) => tracing::error!("sandbox execution failed, no response emitted: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SandboxResult, SandboxStatus, TestCase, TestVerdict};
    use crate::stubs::engine::{StubBehaviour, StubEngine};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::mpsc::{Sender, channel};
    use uuid::Uuid;

    /// Captures published responses on a channel for assertions.
    #[derive(Debug)]
    struct RecordingPublisher {
        tx: Sender<ResponseEnvelope>,
    }

    #[async_trait::async_trait]
    impl ResponsePublisher for RecordingPublisher {
        async fn publish(&self, response: ResponseEnvelope) -> Result<(), PublishError> {
            self.tx
                .send(response)
                .await
                .map_err(|e| PublishError { msg: e.to_string() })
        }
    }

    fn scratch_root() -> PathBuf {
        std::env::temp_dir()
            .join("compilebox-tests")
            .join(Uuid::new_v4().as_simple().to_string())
    }

    async fn service_with(
        behaviour: StubBehaviour,
    ) -> (
        Arc<CompilerService>,
        tokio::sync::mpsc::Receiver<ResponseEnvelope>,
        PathBuf,
    ) {
        let root = scratch_root();
        let driver = root.join("driver.sh");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(&driver, "#!/bin/sh\n").await.unwrap();

        let engine = Arc::new(StubEngine::new(behaviour));
        let router = Arc::new(EventRouter::new());
        router
            .clone()
            .pump(engine.clone() as Arc<dyn ContainerEngine>)
            .await
            .unwrap();

        let (tx, rx) = channel(16);
        let service = Arc::new(CompilerService::new(
            Arc::new(CompilerRegistry::with_default_profiles()),
            engine,
            router,
            WorkspaceManager::new(root.clone(), driver),
            Arc::new(RecordingPublisher { tx }),
        ));

        (service, rx, root)
    }

    fn envelope(kind: RequestKind) -> RequestEnvelope {
        RequestEnvelope {
            id: Uuid::new_v4(),
            kind,
            timeout_seconds: 2,
            memory_limit_mb: 128,
            source_code: vec!["print('hi')".to_string()],
            compiler_name: "python".to_string(),
            stdin_data: Vec::new(),
            test_case: None,
            test_cases: Vec::new(),
            run_all: false,
            run_all_parallel: false,
        }
    }

    #[tokio::test]
    async fn compile_request_publishes_the_captured_output() {
        let behaviour = StubBehaviour {
            stdout_lines: vec!["hi".to_string()],
            ..StubBehaviour::default()
        };
        let (service, mut responses, root) = service_with(behaviour).await;

        let request = envelope(RequestKind::Compile);
        let expected_id = request.id;
        service.handle(request).await;

        let response = responses.recv().await.unwrap();
        assert_eq!(response.id, expected_id);
        assert_eq!(response.result, SandboxResult::Succeeded);
        assert_eq!(response.status, SandboxStatus::Finished);
        assert_eq!(response.standard_output[0], "hi");
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn unknown_compiler_is_dropped_without_a_response() {
        let (service, mut responses, root) = service_with(StubBehaviour::default()).await;

        let mut request = envelope(RequestKind::Compile);
        request.compiler_name = "cobol".to_string();
        service.handle(request).await;

        let recv = tokio::time::timeout(Duration::from_millis(200), responses.recv()).await;
        assert!(recv.is_err(), "no response may be published");
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn failing_single_test_publishes_test_failed() {
        let behaviour = StubBehaviour {
            stdout_lines: vec!["wrong".to_string()],
            ..StubBehaviour::default()
        };
        let (service, mut responses, root) = service_with(behaviour).await;

        let mut request = envelope(RequestKind::SingleTest);
        request.test_case = Some(TestCase {
            id: Uuid::new_v4(),
            stdin_data: Vec::new(),
            expected_stdout: vec!["right".to_string()],
        });
        service.handle(request).await;

        let response = responses.recv().await.unwrap();
        assert_eq!(response.result, SandboxResult::Failed);
        assert_eq!(response.status, SandboxStatus::TestFailed);
        let test_result = response.test_case_result.unwrap();
        assert_eq!(test_result.verdict, TestVerdict::Failed);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn single_test_without_a_case_still_runs_and_responds() {
        let behaviour = StubBehaviour {
            stdout_lines: vec!["hi".to_string()],
            ..StubBehaviour::default()
        };
        let (service, mut responses, root) = service_with(behaviour).await;

        let request = envelope(RequestKind::SingleTest);
        let expected_id = request.id;
        service.handle(request).await;

        let response = responses.recv().await.unwrap();
        assert_eq!(response.id, expected_id);
        assert_eq!(response.result, SandboxResult::Succeeded);
        assert_eq!(response.status, SandboxStatus::Finished);
        assert_eq!(response.standard_output[0], "hi");
        assert!(response.test_case_result.is_none());
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn multi_test_request_publishes_one_result_per_case() {
        let behaviour = StubBehaviour {
            stdout_lines: vec!["ok".to_string()],
            run_duration: Duration::from_millis(20),
            ..StubBehaviour::default()
        };
        let (service, mut responses, root) = service_with(behaviour).await;

        let mut request = envelope(RequestKind::MultipleTests);
        request.run_all = true;
        request.test_cases = (0..2)
            .map(|_| TestCase {
                id: Uuid::new_v4(),
                stdin_data: Vec::new(),
                expected_stdout: vec!["ok".to_string()],
            })
            .collect();
        service.handle(request).await;

        let response = responses.recv().await.unwrap();
        assert_eq!(response.test_case_results.len(), 2);
        assert_eq!(response.result, SandboxResult::Succeeded);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn preparation_failure_emits_no_response() {
        let behaviour = StubBehaviour::default();
        let root = scratch_root();
        tokio::fs::create_dir_all(&root).await.unwrap();

        let engine = Arc::new(StubEngine::new(behaviour));
        let router = Arc::new(EventRouter::new());
        router
            .clone()
            .pump(engine.clone() as Arc<dyn ContainerEngine>)
            .await
            .unwrap();

        let (tx, mut responses) = channel(16);
        // The driver script does not exist; preparation must fail.
        let service = CompilerService::new(
            Arc::new(CompilerRegistry::with_default_profiles()),
            engine,
            router,
            WorkspaceManager::new(root.clone(), root.join("missing.sh")),
            Arc::new(RecordingPublisher { tx }),
        );

        service.handle(envelope(RequestKind::Compile)).await;

        let recv = tokio::time::timeout(Duration::from_millis(200), responses.recv()).await;
        assert!(recv.is_err(), "no response may be published");
        std::fs::remove_dir_all(root).unwrap();
    }
}
