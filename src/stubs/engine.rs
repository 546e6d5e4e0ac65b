use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::constants::OUTPUT_EOF_SENTINEL;
use crate::engine::traits::{
    ContainerEngine, ContainerEvent, ContainerEventKind, ContainerSpec, EngineError,
};

const EVENT_BUFFER: usize = 64;

/// How a stub container behaves once started.
#[derive(Clone, Debug)]
pub struct StubBehaviour {
    /// How long the simulated program runs before finishing on its own.
    pub run_duration: Duration,
    /// Lines the simulated program writes to the standard output file.
    /// The driver script's sentinel echo is appended automatically.
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    /// Simulate the engine killing the container for exceeding its
    /// memory ceiling.
    pub out_of_memory: bool,
    pub fail_create: bool,
    pub fail_start: bool,
}

impl Default for StubBehaviour {
    fn default() -> Self {
        Self {
            run_duration: Duration::from_millis(50),
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
            out_of_memory: false,
            fail_create: false,
            fail_start: false,
        }
    }
}

/// An in-process container engine that plays back the full lifecycle
/// event sequence and writes output files into the bind-mounted
/// workspace, exactly as the real engine's driver script would. Used by
/// the demo binary and the test suite; no container runtime required.
#[derive(Debug)]
pub struct StubEngine {
    behaviour: StubBehaviour,
    events_tx: Sender<ContainerEvent>,
    events_rx: Mutex<Option<Receiver<ContainerEvent>>>,
    containers: DashMap<String, StubContainer>,
}

#[derive(Debug)]
struct StubContainer {
    spec: ContainerSpec,
    finished: Arc<AtomicBool>,
}

impl StubEngine {
    pub fn new(behaviour: StubBehaviour) -> Self {
        let (events_tx, events_rx) = channel(EVENT_BUFFER);
        Self {
            behaviour,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            containers: DashMap::new(),
        }
    }

    async fn emit(tx: &Sender<ContainerEvent>, container_id: &str, kind: ContainerEventKind) {
        let event = ContainerEvent {
            container_id: container_id.to_string(),
            kind,
        };
        if tx.send(event).await.is_err() {
            tracing::trace!("stub engine event dropped, no subscriber");
        }
    }

    /// The host side of the container's `/input` bind mount.
    fn host_dir(spec: &ContainerSpec) -> Option<PathBuf> {
        let bind = spec.binds.first()?;
        Some(PathBuf::from(bind.split(':').next()?))
    }

    async fn write_outputs(spec: &ContainerSpec, behaviour: &StubBehaviour) {
        let Some(dir) = Self::host_dir(spec) else {
            return;
        };

        // The driver passes the output file names as the final two
        // entries of the command line.
        let [stdout_file, stderr_file] = match spec.entrypoint.as_slice() {
            [.., stdout_file, stderr_file] => [stdout_file, stderr_file],
            _ => return,
        };

        let mut stdout = behaviour.stdout_lines.join("\n");
        if !stdout.is_empty() {
            stdout.push('\n');
        }
        stdout.push_str(OUTPUT_EOF_SENTINEL);
        stdout.push('\n');

        if let Err(e) = tokio::fs::write(dir.join(stdout_file), stdout).await {
            tracing::error!("stub engine failed to write stdout file: {e}");
        }

        if !behaviour.stderr_lines.is_empty() {
            let stderr = format!("{}\n", behaviour.stderr_lines.join("\n"));
            if let Err(e) = tokio::fs::write(dir.join(stderr_file), stderr).await {
                tracing::error!("stub engine failed to write stderr file: {e}");
            }
        }
    }
}

#[async_trait::async_trait]
impl ContainerEngine for StubEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        if self.behaviour.fail_create {
            return Err(EngineError::CreateFailed {
                msg: "stub engine configured to fail creation".to_string(),
            });
        }

        let container_id = Uuid::new_v4().as_simple().to_string();
        self.containers.insert(
            container_id.clone(),
            StubContainer {
                spec: spec.clone(),
                finished: Arc::new(AtomicBool::new(false)),
            },
        );

        Self::emit(&self.events_tx, &container_id, ContainerEventKind::Create).await;
        Ok(container_id)
    }

    async fn start(&self, container_id: &str) -> Result<(), EngineError> {
        if self.behaviour.fail_start {
            return Err(EngineError::StartFailed {
                msg: "stub engine configured to fail start".to_string(),
            });
        }

        let container = self
            .containers
            .get(container_id)
            .ok_or_else(|| EngineError::StartFailed {
                msg: format!("unknown container {container_id}"),
            })?;

        let spec = container.spec.clone();
        let finished = container.finished.clone();
        drop(container);

        Self::emit(&self.events_tx, container_id, ContainerEventKind::Start).await;

        let behaviour = self.behaviour.clone();
        let tx = self.events_tx.clone();
        let container_id = container_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(behaviour.run_duration).await;

            // A stop raced us and already tore the container down.
            if finished.swap(true, Ordering::SeqCst) {
                return;
            }

            if behaviour.out_of_memory {
                Self::emit(&tx, &container_id, ContainerEventKind::OutOfMemory).await;
            } else {
                Self::write_outputs(&spec, &behaviour).await;
            }

            Self::emit(&tx, &container_id, ContainerEventKind::Die).await;
            Self::emit(&tx, &container_id, ContainerEventKind::Destroy).await;
        });

        Ok(())
    }

    async fn stop(&self, container_id: &str, _grace: Duration) -> Result<(), EngineError> {
        let container = self
            .containers
            .get(container_id)
            .ok_or_else(|| EngineError::StopFailed {
                msg: format!("unknown container {container_id}"),
            })?;
        let finished = container.finished.clone();
        drop(container);

        // Finished on its own already; nothing to stop.
        if finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        Self::emit(&self.events_tx, container_id, ContainerEventKind::Kill).await;
        Self::emit(&self.events_tx, container_id, ContainerEventKind::Die).await;
        Self::emit(&self.events_tx, container_id, ContainerEventKind::Destroy).await;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, ContainerEvent>, EngineError> {
        let rx = self.events_rx.lock().await.take().ok_or_else(|| {
            EngineError::EventStreamUnavailable {
                msg: "stub engine event stream already taken".to_string(),
            }
        })?;

        Ok(ReceiverStream::new(rx).boxed())
    }
}
