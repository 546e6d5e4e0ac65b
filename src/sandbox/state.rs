use crate::engine::traits::ContainerEventKind;

/// Where the underlying container currently is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleStatus {
    Unknown,
    Created,
    Started,
    Killing,
    Killed,
    /// Terminal. No transition is accepted once reached.
    Removed,
}

/// What the sandbox's supervision loop must do after a transition has
/// been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    None,
    /// The container started; arm the one-shot timeout timer.
    ArmTimer,
    /// The container died on its own; the timer is no longer needed.
    DisarmTimer,
    /// The container is gone; output is safe to read.
    Finished,
}

/// The single point of mutable state for one sandbox. Mutated only by
/// the sandbox's own event loop, so transition guards are always
/// evaluated by the same writer that commits them.
#[derive(Debug)]
pub struct LifecycleState {
    status: LifecycleStatus,
    pub exceeded_timeout: bool,
    pub exceeded_memory: bool,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            status: LifecycleStatus::Unknown,
            exceeded_timeout: false,
            exceeded_memory: false,
        }
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status
    }

    /// Applies one routed engine event. Anything arriving after
    /// `Removed` is silently dropped, which protects against duplicate
    /// or out-of-order delivery from the event source.
    pub fn apply(&mut self, event: ContainerEventKind) -> Transition {
        if self.status == LifecycleStatus::Removed {
            return Transition::None;
        }

        match event {
            ContainerEventKind::Create => {
                self.status = LifecycleStatus::Created;
                Transition::None
            }
            ContainerEventKind::Start => {
                self.status = LifecycleStatus::Started;
                Transition::ArmTimer
            }
            ContainerEventKind::Kill => {
                self.status = LifecycleStatus::Killing;
                Transition::None
            }
            ContainerEventKind::Die => {
                self.status = LifecycleStatus::Killed;
                Transition::DisarmTimer
            }
            ContainerEventKind::Destroy => {
                self.status = LifecycleStatus::Removed;
                Transition::Finished
            }
            ContainerEventKind::OutOfMemory => {
                self.exceeded_memory = true;
                Transition::None
            }
        }
    }

    /// Whether a firing timeout timer should still act. Once the
    /// container finished on its own there is nothing left to stop.
    pub fn timeout_applies(&self) -> bool {
        !matches!(
            self.status,
            LifecycleStatus::Killed | LifecycleStatus::Removed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContainerEventKind::*;

    #[test]
    fn follows_the_normal_event_order() {
        let mut state = LifecycleState::new();

        assert_eq!(state.apply(Create), Transition::None);
        assert_eq!(state.status(), LifecycleStatus::Created);

        assert_eq!(state.apply(Start), Transition::ArmTimer);
        assert_eq!(state.status(), LifecycleStatus::Started);

        assert_eq!(state.apply(Die), Transition::DisarmTimer);
        assert_eq!(state.status(), LifecycleStatus::Killed);

        assert_eq!(state.apply(Destroy), Transition::Finished);
        assert_eq!(state.status(), LifecycleStatus::Removed);
    }

    #[test]
    fn kill_is_observed_between_start_and_die() {
        let mut state = LifecycleState::new();
        state.apply(Create);
        state.apply(Start);

        assert_eq!(state.apply(Kill), Transition::None);
        assert_eq!(state.status(), LifecycleStatus::Killing);
    }

    #[test]
    fn nothing_changes_after_removed() {
        let mut state = LifecycleState::new();
        for event in [Create, Start, Die, Destroy] {
            state.apply(event);
        }
        assert_eq!(state.status(), LifecycleStatus::Removed);

        for event in [Create, Start, Kill, Die, Destroy, OutOfMemory] {
            assert_eq!(state.apply(event), Transition::None);
            assert_eq!(state.status(), LifecycleStatus::Removed);
        }
        assert!(!state.exceeded_memory);
    }

    #[test]
    fn oom_sets_the_memory_flag_without_a_status_change() {
        let mut state = LifecycleState::new();
        state.apply(Create);
        state.apply(Start);

        assert_eq!(state.apply(OutOfMemory), Transition::None);
        assert!(state.exceeded_memory);
        assert_eq!(state.status(), LifecycleStatus::Started);
    }

    #[test]
    fn timeout_no_longer_applies_once_the_container_died() {
        let mut state = LifecycleState::new();
        state.apply(Create);
        state.apply(Start);
        assert!(state.timeout_applies());

        state.apply(Die);
        assert!(!state.timeout_applies());

        state.apply(Destroy);
        assert!(!state.timeout_applies());
    }
}
