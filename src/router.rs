use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::JoinHandle;

use crate::engine::traits::{ContainerEngine, ContainerEvent, EngineError};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Fans the engine's global lifecycle event stream out to the sandbox
/// owning each container id. Sandboxes register before their container
/// starts and deregister once they have finished; events for unknown or
/// already-removed ids are dropped.
#[derive(Debug, Default)]
pub struct EventRouter {
    routes: DashMap<String, Sender<ContainerEvent>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container id and hands back the receiving end of its
    /// event channel.
    pub fn register(&self, container_id: &str) -> Receiver<ContainerEvent> {
        let (tx, rx) = channel(EVENT_CHANNEL_CAPACITY);
        self.routes.insert(container_id.to_string(), tx);
        rx
    }

    pub fn deregister(&self, container_id: &str) {
        self.routes.remove(container_id);
    }

    /// Forwards one event to the sandbox owning the container, if any.
    pub async fn route(&self, event: ContainerEvent) {
        let Some(route) = self.routes.get(&event.container_id) else {
            tracing::trace!(
                container_id = %event.container_id,
                "dropping event for unregistered container"
            );
            return;
        };

        let tx = route.clone();
        // The entry guard must not be held across the await below.
        drop(route);

        if tx.send(event.clone()).await.is_err() {
            tracing::trace!(
                container_id = %event.container_id,
                "dropping event for completed sandbox"
            );
        }
    }

    /// Spawns the pump task consuming the engine's global stream and
    /// routing each event by container id.
    pub async fn pump(
        self: Arc<Self>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<JoinHandle<()>, EngineError> {
        let mut stream = engine.subscribe().await?;

        Ok(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                self.route(event).await;
            }
            tracing::warn!("engine event stream ended");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::traits::ContainerEventKind;

    fn event(container_id: &str, kind: ContainerEventKind) -> ContainerEvent {
        ContainerEvent {
            container_id: container_id.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn routes_events_to_the_registered_sandbox() {
        let router = EventRouter::new();
        let mut rx = router.register("abc");

        router.route(event("abc", ContainerEventKind::Create)).await;
        router.route(event("abc", ContainerEventKind::Start)).await;

        assert_eq!(rx.recv().await.unwrap().kind, ContainerEventKind::Create);
        assert_eq!(rx.recv().await.unwrap().kind, ContainerEventKind::Start);
    }

    #[tokio::test]
    async fn drops_events_for_unknown_ids() {
        let router = EventRouter::new();
        let mut rx = router.register("abc");

        router.route(event("other", ContainerEventKind::Die)).await;
        router.route(event("abc", ContainerEventKind::Destroy)).await;

        // Only the registered container's event arrives.
        assert_eq!(rx.recv().await.unwrap().kind, ContainerEventKind::Destroy);
    }

    #[tokio::test]
    async fn deregistered_ids_no_longer_receive() {
        let router = EventRouter::new();
        let mut rx = router.register("abc");
        router.deregister("abc");

        router.route(event("abc", ContainerEventKind::Die)).await;
        assert!(rx.recv().await.is_none());
    }
}
