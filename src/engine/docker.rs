use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{Config, StartContainerOptions, StopContainerOptions};
use bollard::models::{EventMessageTypeEnum, HostConfig};
use bollard::system::EventsOptions;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::engine::traits::{
    ContainerEngine, ContainerEvent, ContainerEventKind, ContainerSpec, EngineError,
};

/// The production container engine, backed by the local Docker daemon.
#[derive(Debug)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::ConnectFailed { msg: e.to_string() })?;
        Ok(Self { docker })
    }
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(spec.entrypoint.clone()),
            working_dir: Some(spec.working_dir.clone()),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                memory: Some(spec.memory_bytes),
                auto_remove: Some(spec.auto_remove),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| EngineError::CreateFailed { msg: e.to_string() })?;

        Ok(container.id)
    }

    async fn start(&self, container_id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::StartFailed { msg: e.to_string() })
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| EngineError::StopFailed { msg: e.to_string() })
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, ContainerEvent>, EngineError> {
        let options = EventsOptions::<String> {
            since: None,
            until: None,
            filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
        };

        let stream = self
            .docker
            .events(Some(options))
            .filter_map(|message| async move {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("dropping unreadable engine event: {e}");
                        return None;
                    }
                };

                if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
                    return None;
                }

                let container_id = message.actor.and_then(|actor| actor.id)?;
                let kind = ContainerEventKind::from_action(message.action.as_deref()?)?;

                Some(ContainerEvent { container_id, kind })
            })
            .boxed();

        Ok(stream)
    }
}
