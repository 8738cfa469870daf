//! Cluster routing context derived from the web console route.

use serde::{Deserialize, Serialize};

use crate::error::WorkshopError;
use crate::resource::{ManagedResource, ObjectRef};

pub const CONSOLE_ROUTE_NAMESPACE: &str = "openshift-console";
pub const CONSOLE_ROUTE_NAME: &str = "console";
const CONSOLE_HOST_PREFIX: &str = "console-openshift-console.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Wildcard application domain, e.g. `apps.cluster.example.com`.
    pub apps_suffix: String,
    /// `https://<console host>`.
    pub console_url: String,
}

impl RoutingContext {
    pub fn console_route_ref() -> ObjectRef {
        ObjectRef::namespaced(
            "route.openshift.io/v1",
            "Route",
            CONSOLE_ROUTE_NAMESPACE,
            CONSOLE_ROUTE_NAME,
        )
    }

    pub fn from_console_host(host: &str) -> Result<Self, WorkshopError> {
        let suffix = host
            .strip_prefix(CONSOLE_HOST_PREFIX)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WorkshopError::InvalidConsoleHost {
                host: host.to_string(),
            })?;
        Ok(Self {
            apps_suffix: suffix.to_string(),
            console_url: format!("https://{host}"),
        })
    }

    pub fn from_console_route(route: &ManagedResource) -> Result<Self, WorkshopError> {
        let host = route
            .pointer_str("/spec/host")
            .ok_or(WorkshopError::MissingConsoleHost)?;
        Self::from_console_host(host)
    }

    /// `<name>.<apps_suffix>`: the default host for an application route.
    pub fn app_host(&self, name: &str) -> String {
        format!("{name}.{}", self.apps_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_suffix_and_console_url() {
        let ctx =
            RoutingContext::from_console_host("console-openshift-console.apps.lab.example.com")
                .expect("routing");
        assert_eq!(ctx.apps_suffix, "apps.lab.example.com");
        assert_eq!(
            ctx.console_url,
            "https://console-openshift-console.apps.lab.example.com"
        );
        assert_eq!(ctx.app_host("portal"), "portal.apps.lab.example.com");
    }

    #[test]
    fn rejects_host_without_console_prefix() {
        let err = RoutingContext::from_console_host("console.example.com").unwrap_err();
        assert!(matches!(err, WorkshopError::InvalidConsoleHost { .. }));
        assert!(RoutingContext::from_console_host("console-openshift-console.").is_err());
    }

    #[test]
    fn reads_host_from_route_resource() {
        let mut route = ManagedResource::new(
            "route.openshift.io/v1",
            "Route",
            CONSOLE_ROUTE_NAME,
            Some(CONSOLE_ROUTE_NAMESPACE),
        );
        assert!(matches!(
            RoutingContext::from_console_route(&route),
            Err(WorkshopError::MissingConsoleHost)
        ));
        route.set_pointer("/spec/host", json!("console-openshift-console.apps.x"));
        let ctx = RoutingContext::from_console_route(&route).expect("routing");
        assert_eq!(ctx.apps_suffix, "apps.x");
    }
}
