use std::time::Duration;

use futures::stream::BoxStream;

/// A lifecycle transition reported by the container engine for one
/// container. Unrecognized engine actions are never materialized as an
/// event; they are filtered out at the engine boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: String,
    pub kind: ContainerEventKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerEventKind {
    Create,
    Start,
    Kill,
    Die,
    /// Terminal. The container is gone and captured output is safe to
    /// read.
    Destroy,
    /// The engine killed the container for exceeding its memory
    /// ceiling. Informational; `Die`/`Destroy` still follow.
    OutOfMemory,
}

impl ContainerEventKind {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "create" => Some(Self::Create),
            "start" => Some(Self::Start),
            "kill" => Some(Self::Kill),
            "die" => Some(Self::Die),
            "destroy" => Some(Self::Destroy),
            "oom" => Some(Self::OutOfMemory),
            _ => None,
        }
    }
}

/// Everything a sandbox needs to ask of the engine when creating its
/// container.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub working_dir: String,
    /// `host-path:container-path` bind mounts, host side already in
    /// posix form.
    pub binds: Vec<String>,
    pub memory_bytes: i64,
    pub network_disabled: bool,
    pub auto_remove: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("could not connect to the container engine: {msg}")]
    ConnectFailed { msg: String },
    #[error("container create failed: {msg}")]
    CreateFailed { msg: String },
    #[error("container start failed: {msg}")]
    StartFailed { msg: String },
    #[error("container stop failed: {msg}")]
    StopFailed { msg: String },
    #[error("engine event stream unavailable: {msg}")]
    EventStreamUnavailable { msg: String },
}

/// The external container runtime: create/start/stop plus a
/// subscribable stream of lifecycle events keyed by container id.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ContainerEngine: std::fmt::Debug + Send + Sync {
    /// Creates a container from the spec and returns its id. The
    /// container is expected to remove itself once stopped.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start(&self, container_id: &str) -> Result<(), EngineError>;

    /// Requests a stop, giving the container `grace` to exit before a
    /// forced kill.
    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), EngineError>;

    /// The engine's global lifecycle event stream, covering every
    /// container it manages.
    async fn subscribe(&self) -> Result<BoxStream<'static, ContainerEvent>, EngineError>;
}
