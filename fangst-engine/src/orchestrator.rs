//! Sequential startup with rollback.
//!
//! Components register in dependency order. `start()` runs each start
//! closure in turn; the first failure rolls back everything already
//! started, in reverse, and surfaces the original error with the failing
//! component's name. Rollback and shutdown failures are logged and
//! swallowed so the sequence always completes.

use tracing::{error, info};

use crate::error::EngineError;

pub type ComponentResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Lifecycle = Box<dyn FnMut() -> ComponentResult + Send>;

/// One orchestrated component: a name plus start/stop closures.
pub struct Component {
    name: String,
    start: Lifecycle,
    stop: Lifecycle,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        start: impl FnMut() -> ComponentResult + Send + 'static,
        stop: impl FnMut() -> ComponentResult + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            start: Box::new(start),
            stop: Box::new(stop),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct StartupOrchestrator {
    components: Vec<Component>,
    started: Vec<usize>,
}

impl StartupOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component(&mut self, component: Component) -> Result<(), EngineError> {
        if self.components.iter().any(|c| c.name == component.name) {
            return Err(EngineError::DuplicateComponent(component.name));
        }
        self.components.push(component);
        Ok(())
    }

    /// Names of currently started components, in start order.
    pub fn started_components(&self) -> Vec<String> {
        self.started
            .iter()
            .map(|&i| self.components[i].name.clone())
            .collect()
    }

    /// Starts every component in registration order. On failure the
    /// already-started components are rolled back in reverse and the
    /// original error is returned, naming the failing component.
    pub fn start(&mut self) -> Result<(), EngineError> {
        for index in 0..self.components.len() {
            let component = &mut self.components[index];
            info!(component = %component.name, "Starting component");
            match (component.start)() {
                Ok(()) => self.started.push(index),
                Err(source) => {
                    let name = self.components[index].name.clone();
                    error!(component = %name, error = %source, "Component start failed, rolling back");
                    self.rollback();
                    return Err(EngineError::ComponentStart { name, source });
                }
            }
        }
        info!(count = self.started.len(), "All components started");
        Ok(())
    }

    /// Stops started components in reverse order. Errors are logged and
    /// never abort the remainder. A no-op before a completed start.
    pub fn stop(&mut self) {
        for index in std::mem::take(&mut self.started).into_iter().rev() {
            let component = &mut self.components[index];
            info!(component = %component.name, "Stopping component");
            if let Err(err) = (component.stop)() {
                error!(component = %component.name, error = %err, "Component stop failed");
            }
        }
    }

    fn rollback(&mut self) {
        for index in std::mem::take(&mut self.started).into_iter().rev() {
            let component = &mut self.components[index];
            if let Err(err) = (component.stop)() {
                error!(component = %component.name, error = %err, "Rollback stop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn ok_component(name: &str, log: &CallLog) -> Component {
        let start_log = Arc::clone(log);
        let stop_log = Arc::clone(log);
        let start_name = format!("start:{name}");
        let stop_name = format!("stop:{name}");
        Component::new(
            name,
            move || {
                start_log.lock().push(start_name.clone());
                Ok(())
            },
            move || {
                stop_log.lock().push(stop_name.clone());
                Ok(())
            },
        )
    }

    fn failing_component(name: &str, log: &CallLog) -> Component {
        let start_log = Arc::clone(log);
        let start_name = format!("start:{name}");
        Component::new(
            name,
            move || {
                start_log.lock().push(start_name.clone());
                Err("boom".into())
            },
            || Ok(()),
        )
    }

    #[test]
    fn starts_in_registration_order() {
        let log: CallLog = Arc::default();
        let mut orchestrator = StartupOrchestrator::new();
        orchestrator.register_component(ok_component("a", &log)).unwrap();
        orchestrator.register_component(ok_component("b", &log)).unwrap();
        orchestrator.start().unwrap();
        assert_eq!(*log.lock(), vec!["start:a", "start:b"]);
        assert_eq!(orchestrator.started_components(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let log: CallLog = Arc::default();
        let mut orchestrator = StartupOrchestrator::new();
        orchestrator.register_component(ok_component("a", &log)).unwrap();
        assert!(matches!(
            orchestrator.register_component(ok_component("a", &log)),
            Err(EngineError::DuplicateComponent(_))
        ));
    }

    #[test]
    fn failure_rolls_back_in_reverse_and_names_component() {
        let log: CallLog = Arc::default();
        let mut orchestrator = StartupOrchestrator::new();
        orchestrator.register_component(ok_component("a", &log)).unwrap();
        orchestrator.register_component(ok_component("b", &log)).unwrap();
        orchestrator.register_component(failing_component("c", &log)).unwrap();

        let err = orchestrator.start().unwrap_err();
        match err {
            EngineError::ComponentStart { name, .. } => assert_eq!(name, "c"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            *log.lock(),
            vec!["start:a", "start:b", "start:c", "stop:b", "stop:a"]
        );
        assert!(orchestrator.started_components().is_empty());
    }

    #[test]
    fn rollback_error_does_not_mask_original() {
        let log: CallLog = Arc::default();
        let mut orchestrator = StartupOrchestrator::new();
        let stop_log = Arc::clone(&log);
        orchestrator
            .register_component(Component::new(
                "fragile",
                || Ok(()),
                move || {
                    stop_log.lock().push("stop:fragile".into());
                    Err("stop failed".into())
                },
            ))
            .unwrap();
        orchestrator.register_component(failing_component("broken", &log)).unwrap();

        let err = orchestrator.start().unwrap_err();
        assert!(matches!(err, EngineError::ComponentStart { name, .. } if name == "broken"));
        // The fragile stop ran and its failure was swallowed.
        assert!(log.lock().contains(&"stop:fragile".to_string()));
    }

    #[test]
    fn stop_runs_in_reverse_and_is_idempotent() {
        let log: CallLog = Arc::default();
        let mut orchestrator = StartupOrchestrator::new();
        orchestrator.register_component(ok_component("a", &log)).unwrap();
        orchestrator.register_component(ok_component("b", &log)).unwrap();
        orchestrator.start().unwrap();
        orchestrator.stop();
        orchestrator.stop();
        assert_eq!(
            *log.lock(),
            vec!["start:a", "start:b", "stop:b", "stop:a"]
        );
    }

    #[test]
    fn stop_before_start_is_noop() {
        let log: CallLog = Arc::default();
        let mut orchestrator = StartupOrchestrator::new();
        orchestrator.register_component(ok_component("a", &log)).unwrap();
        orchestrator.stop();
        assert!(log.lock().is_empty());
    }
}
