use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Liveness accounting for a daemon's long-running loops.
///
/// Each loop registers itself and receives a [`HealthHandle`] it must ping
/// more often than its deadline. The process is healthy only while every
/// registered component has reported recently: a component that never
/// reported is `Starting`, one whose deadline lapsed is `Stalled`, and either
/// fails the probe.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    Starting,
    HealthyUntil(Instant),
    Unhealthy,
    Stalled,
}

#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Report as healthy until the component's deadline from now.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            Err(_) => warn!("poisoned health registry lock"),
        }
    }
}

impl HealthRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a component; the returned handle reports its health.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Overall process status, usable directly as an axum handler response.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components,
            Err(_) => {
                warn!("poisoned health registry lock");
                return HealthStatus::default();
            }
        };

        let now = Instant::now();
        let mut status = HealthStatus {
            // Unhealthy until at least one component has registered.
            healthy: !components.is_empty(),
            components: HashMap::new(),
        };
        for (name, component) in components.iter() {
            let reported = match component {
                ComponentStatus::HealthyUntil(until) if *until > now => component.clone(),
                ComponentStatus::HealthyUntil(_) => {
                    status.healthy = false;
                    ComponentStatus::Stalled
                }
                other => {
                    status.healthy = false;
                    other.clone()
                }
            };
            status.components.insert(name.clone(), reported);
        }

        if !status.healthy {
            warn!("{} health check failed: {:?}", self.name, status.components);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn component_lifecycle() {
        let registry = HealthRegistry::new("liveness");

        let handle = registry.register("one", Duration::from_secs(30));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components.get("one"), Some(&ComponentStatus::Starting));

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("one"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn stalled_components_fail_the_probe() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("one", Duration::from_secs(30));

        handle.report_status(ComponentStatus::HealthyUntil(Instant::now()));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components.get("one"), Some(&ComponentStatus::Stalled));
    }

    #[test]
    fn every_component_must_be_healthy() {
        let registry = HealthRegistry::new("liveness");
        let one = registry.register("one", Duration::from_secs(30));
        let two = registry.register("two", Duration::from_secs(30));

        one.report_healthy();
        assert!(!registry.get_status().healthy);

        two.report_healthy();
        assert!(registry.get_status().healthy);
    }

    #[test]
    fn into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: HashMap::new(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
