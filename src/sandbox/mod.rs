pub mod state;

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::{Sleep, sleep};

use crate::constants::{CONTAINER_INPUT_DIR, DRIVER_SCRIPT_NAME, STOP_GRACE_SECONDS};
use crate::domain::{ExecutionOutcome, SandboxRequest, SandboxResult, SandboxStatus};
use crate::engine::traits::{ContainerEngine, ContainerEvent, ContainerSpec, EngineError};
use crate::router::EventRouter;
use crate::sandbox::state::{LifecycleState, Transition};
use crate::workspace::{Workspace, WorkspaceManager};

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("workspace preparation failed: {0}")]
    Preparation(#[source] io::Error),
    #[error("output capture failed: {0}")]
    Capture(#[source] io::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("engine event stream closed before the container was removed")]
    EventStreamClosed,
}

/// Owns one container's full lifecycle: prepares the workspace, creates
/// and starts the container, consumes its routed lifecycle events under
/// a race with the timeout timer, captures the output and guarantees
/// the workspace is removed on every exit path.
///
/// `run` consumes the sandbox, so at most one outcome is ever produced
/// and it is only assembled after the container reached `Removed`.
#[derive(Debug)]
pub struct Sandbox {
    request: SandboxRequest,
    engine: Arc<dyn ContainerEngine>,
    router: Arc<EventRouter>,
    workspaces: WorkspaceManager,
}

impl Sandbox {
    pub fn new(
        request: SandboxRequest,
        engine: Arc<dyn ContainerEngine>,
        router: Arc<EventRouter>,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            request,
            engine,
            router,
            workspaces,
        }
    }

    #[tracing::instrument(skip_all, fields(request_id = %self.request.id))]
    pub async fn run(self) -> Result<ExecutionOutcome, SandboxError> {
        let workspace = self
            .workspaces
            .prepare(&self.request)
            .await
            .map_err(SandboxError::Preparation)?;

        let (container_id, events) = match self.launch(&workspace).await {
            Ok(launched) => launched,
            Err(e) => {
                tracing::error!("failed to launch container: {e}");
                workspace.cleanup().await;
                return Err(e);
            }
        };

        let supervised = self.supervise(&container_id, events).await;
        self.router.deregister(&container_id);

        let outcome = match supervised {
            Ok(state) => self
                .assemble(&state, &workspace)
                .map_err(SandboxError::Capture),
            Err(e) => Err(e),
        };

        // The workspace is deleted on every exit path, including a
        // failed capture.
        workspace.cleanup().await;
        outcome
    }

    /// Builds the container spec, creates the container, registers it
    /// for event routing and starts it. The id is assigned exactly once
    /// here and is immutable afterwards.
    async fn launch(
        &self,
        workspace: &Workspace,
    ) -> Result<(String, Receiver<ContainerEvent>), SandboxError> {
        let bind_source = workspace.bind_source().map_err(SandboxError::Preparation)?;

        let spec = ContainerSpec {
            image: self.request.profile.image.clone(),
            entrypoint: self.build_command(),
            working_dir: CONTAINER_INPUT_DIR.to_string(),
            binds: vec![format!("{bind_source}:{CONTAINER_INPUT_DIR}")],
            memory_bytes: self.request.memory_limit_mb * 1_000_000,
            network_disabled: true,
            auto_remove: true,
        };

        let container_id = self.engine.create(&spec).await?;
        tracing::debug!(container_id = %container_id, "container created");

        // Register before starting so no lifecycle event can be routed
        // into the void.
        let events = self.router.register(&container_id);

        if let Err(e) = self.engine.start(&container_id).await {
            self.router.deregister(&container_id);
            self.best_effort_stop(&container_id).await;
            return Err(e.into());
        }

        Ok((container_id, events))
    }

    /// The driver invocation the container runs as its entrypoint. An
    /// interpreted language passes an empty binary name, telling the
    /// script to skip the compile step.
    fn build_command(&self) -> Vec<String> {
        let profile = &self.request.profile;
        let language = &profile.language;

        vec![
            "sh".to_string(),
            format!("./{DRIVER_SCRIPT_NAME}"),
            profile.entry_command.clone(),
            format!("{language}.source"),
            format!("{language}.input"),
            if profile.interpreted {
                String::new()
            } else {
                format!("{language}.out.o")
            },
            profile.additional_arguments.clone(),
            profile.stdout_file.clone(),
            profile.stderr_file.clone(),
        ]
    }

    /// Drives the lifecycle state machine from two asynchronous
    /// sources: the routed engine events and the one-shot timeout timer
    /// armed when the container starts. Both are handled on this single
    /// task, so no transition can interleave with another.
    async fn supervise(
        &self,
        container_id: &str,
        mut events: Receiver<ContainerEvent>,
    ) -> Result<LifecycleState, SandboxError> {
        let mut state = LifecycleState::new();
        let mut timer: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        self.best_effort_stop(container_id).await;
                        return Err(SandboxError::EventStreamClosed);
                    };

                    tracing::trace!(container_id = %container_id, kind = ?event.kind, "container event");
                    match state.apply(event.kind) {
                        Transition::ArmTimer => {
                            timer = Some(Box::pin(sleep(self.request.timeout)));
                        }
                        Transition::DisarmTimer => timer = None,
                        Transition::Finished => return Ok(state),
                        Transition::None => {}
                    }
                }
                () = async { timer.as_mut().unwrap().await }, if timer.is_some() => {
                    timer = None;
                    if !state.timeout_applies() {
                        continue;
                    }

                    tracing::warn!(
                        container_id = %container_id,
                        "container exceeded its timeout, stopping"
                    );
                    state.exceeded_timeout = true;
                    self.best_effort_stop(container_id).await;
                }
            }
        }
    }

    /// Requests a stop with a short grace period. Failures are logged,
    /// never escalated; cleanup still proceeds through the terminal
    /// event once the engine removes the container.
    async fn best_effort_stop(&self, container_id: &str) {
        let grace = Duration::from_secs(STOP_GRACE_SECONDS);
        if let Err(e) = self.engine.stop(container_id, grace).await {
            tracing::error!(container_id = %container_id, "failed to stop container: {e}");
        }
    }

    /// Assembles the raw capture once the container is removed. Limit
    /// breaches short-circuit with empty output; otherwise a non-empty
    /// stderr marks a failed run and the stdout is not even loaded.
    fn assemble(
        &self,
        state: &LifecycleState,
        workspace: &Workspace,
    ) -> io::Result<ExecutionOutcome> {
        if state.exceeded_memory || state.exceeded_timeout {
            let status = if state.exceeded_memory {
                SandboxStatus::MemoryConstraintExceeded
            } else {
                SandboxStatus::TimeLimitExceeded
            };

            return Ok(ExecutionOutcome {
                request_id: self.request.id,
                result: SandboxResult::Failed,
                status,
                standard_output: Vec::new(),
                standard_error_output: Vec::new(),
            });
        }

        let standard_error_output = workspace.read_stderr()?;
        if !standard_error_output.is_empty() {
            return Ok(ExecutionOutcome {
                request_id: self.request.id,
                result: SandboxResult::Failed,
                status: SandboxStatus::Finished,
                standard_output: Vec::new(),
                standard_error_output,
            });
        }

        Ok(ExecutionOutcome {
            request_id: self.request.id,
            result: SandboxResult::Succeeded,
            status: SandboxStatus::Finished,
            standard_output: workspace.read_stdout()?,
            standard_error_output,
        })
    }
}
