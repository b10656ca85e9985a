//! # Platform Collaborator Layer
//!
//! This module defines the narrow interface through which the measurement
//! engine reads the serving platform. The engine never constructs clients
//! itself; it receives an `Arc<dyn Platform>` and issues single snapshot reads.
//!
//! ## Object Model
//!
//! Each platform object exposes only what the resolver chain needs:
//! a creation timestamp and a set of named condition transition times.
//! Conditions are modelled as a map from a closed enumeration of condition
//! kinds to a timestamp, so an absent condition is a first-class `None`
//! rather than a zero timestamp that would silently produce a huge duration.
//!
//! ## Error Model
//!
//! All lookups return `PlatformError`. The resolver classifies targets by
//! matching on its variants, never on error message text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod snapshot;

pub use snapshot::{PlatformSnapshot, SnapshotPlatform};

/// Point in time reported by the platform.
pub type Timestamp = DateTime<Utc>;

/// Label that selects the pods belonging to a revision.
pub const REVISION_LABEL: &str = "serving.knative.dev/revision";

/// Name of the sidecar container injected into every revision pod.
pub const QUEUE_PROXY_CONTAINER: &str = "queue-proxy";

/// Name of the container running the user's workload.
pub const USER_CONTAINER: &str = "user-container";

/// Build the label selector used to list the pods of a revision.
pub fn revision_selector(revision: &str) -> String {
    format!("{}={}", REVISION_LABEL, revision)
}

/// Name of the deployment the platform creates for a revision.
pub fn deployment_name(revision: &str) -> String {
    format!("{}-deployment", revision)
}

/// Kinds of platform objects read during a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Service,
    Configuration,
    Revision,
    Pod,
    Deployment,
    PodAutoscaler,
    ServerlessService,
    Ingress,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Service => write!(f, "Service"),
            ObjectKind::Configuration => write!(f, "Configuration"),
            ObjectKind::Revision => write!(f, "Revision"),
            ObjectKind::Pod => write!(f, "Pod"),
            ObjectKind::Deployment => write!(f, "Deployment"),
            ObjectKind::PodAutoscaler => write!(f, "PodAutoscaler"),
            ObjectKind::ServerlessService => write!(f, "ServerlessService"),
            ObjectKind::Ingress => write!(f, "Ingress"),
        }
    }
}

/// Errors returned by platform lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The requested object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ObjectKind,
        namespace: String,
        name: String,
    },

    /// The lookup did not complete within the configured limit
    #[error("lookup of {kind} {namespace}/{name} timed out after {after:?}")]
    Timeout {
        kind: ObjectKind,
        namespace: String,
        name: String,
        after: Duration,
    },

    /// Any other failure reported by the platform
    #[error("request for {kind} {namespace}/{name} failed: {message}")]
    Request {
        kind: ObjectKind,
        namespace: String,
        name: String,
        message: String,
    },
}

impl PlatformError {
    pub fn not_found(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        PlatformError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn timeout(kind: ObjectKind, namespace: &str, name: &str, after: Duration) -> Self {
        PlatformError::Timeout {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            after,
        }
    }

    pub fn request(
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        message: impl Into<String>,
    ) -> Self {
        PlatformError::Request {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Whether the error means the object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}

/// Condition kinds carried by a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceCondition {
    Ready,
    ConfigurationsReady,
    RoutesReady,
}

/// Condition kinds carried by a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RevisionCondition {
    Ready,
}

/// Condition kinds carried by a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PodCondition {
    PodScheduled,
    Initialized,
    ContainersReady,
    Ready,
}

/// Condition kinds carried by a pod autoscaler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AutoscalerCondition {
    Ready,
    Active,
}

/// Condition kinds carried by a serverless service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServerlessServiceCondition {
    Ready,
    ActivatorEndpointsPopulated,
    EndpointsPopulated,
}

/// Condition kinds carried by an ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IngressCondition {
    Ready,
    NetworkConfigured,
    LoadBalancerReady,
}

/// Last transition time per condition kind.
///
/// Serialized as a JSON object keyed by the condition type name, e.g.
/// `{"RoutesReady": "2024-05-01T10:00:05Z"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[serde(bound(
    serialize = "K: Serialize + Ord",
    deserialize = "K: Deserialize<'de> + Ord"
))]
pub struct Conditions<K: Ord>(BTreeMap<K, Timestamp>);

impl<K: Ord> Default for Conditions<K> {
    fn default() -> Self {
        Conditions(BTreeMap::new())
    }
}

impl<K: Ord> Conditions<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition time of `kind`, or `None` when the condition is absent
    pub fn get(&self, kind: K) -> Option<Timestamp> {
        self.0.get(&kind).copied()
    }

    pub fn set(&mut self, kind: K, at: Timestamp) {
        self.0.insert(kind, at);
    }

    pub fn with(mut self, kind: K, at: Timestamp) -> Self {
        self.set(kind, at);
        self
    }
}

/// Identity and creation time shared by every object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub creation_timestamp: Timestamp,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(name: &str, namespace: &str, creation_timestamp: Timestamp) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            creation_timestamp,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// Top-level workload service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    /// Readiness predicate as evaluated by the platform
    pub ready: bool,
    #[serde(default)]
    pub conditions: Conditions<ServiceCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub latest_ready_revision_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub conditions: Conditions<RevisionCondition>,
}

/// Status of one container inside a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    /// Start time of the running state, absent while waiting or terminated
    #[serde(default)]
    pub running_started_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub conditions: Conditions<PodCondition>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl Pod {
    /// Running start time of the named container
    pub fn container_started(&self, name: &str) -> Option<Timestamp> {
        self.container_statuses
            .iter()
            .find(|status| status.name == name)
            .and_then(|status| status.running_started_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodAutoscaler {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub conditions: Conditions<AutoscalerCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerlessService {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub conditions: Conditions<ServerlessServiceCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub conditions: Conditions<IngressCondition>,
}

/// Versions of the platform components, reported alongside the results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub serving_version: String,
    pub eventing_version: String,
    pub ingress_controller: String,
    pub ingress_version: String,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self {
            serving_version: "Unknown".to_string(),
            eventing_version: "Unknown".to_string(),
            ingress_controller: "Unknown".to_string(),
            ingress_version: "Unknown".to_string(),
        }
    }
}

/// Read-only access to the serving platform
///
/// Every method performs one snapshot read. Implementations must be safe to
/// call from many worker tasks at once.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, PlatformError>;

    async fn get_configuration(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Configuration, PlatformError>;

    async fn get_revision(&self, name: &str, namespace: &str) -> Result<Revision, PlatformError>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, PlatformError>;

    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Deployment, PlatformError>;

    async fn get_pod_autoscaler(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<PodAutoscaler, PlatformError>;

    async fn get_serverless_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ServerlessService, PlatformError>;

    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Ingress, PlatformError>;

    /// List the services of a namespace; used only by target discovery
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, PlatformError>;

    /// Component versions; unknown values are reported as "Unknown"
    async fn platform_info(&self) -> PlatformInfo {
        PlatformInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_conditions_absent_is_none() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let conditions = Conditions::new().with(ServiceCondition::RoutesReady, at);

        assert_eq!(conditions.get(ServiceCondition::RoutesReady), Some(at));
        assert_eq!(conditions.get(ServiceCondition::ConfigurationsReady), None);
        assert_eq!(conditions.get(ServiceCondition::Ready), None);
    }

    #[test]
    fn test_conditions_deserialize_by_type_name() {
        let json = r#"{
            "PodScheduled": "2024-05-01T10:00:01Z",
            "ContainersReady": "2024-05-01T10:00:04Z"
        }"#;
        let conditions: Conditions<PodCondition> = serde_json::from_str(json).unwrap();

        assert_eq!(
            conditions.get(PodCondition::ContainersReady),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 4).unwrap())
        );
        assert!(conditions.get(PodCondition::Ready).is_none());
    }

    #[test]
    fn test_unknown_condition_type_is_rejected() {
        let json = r#"{"Bogus": "2024-05-01T10:00:01Z"}"#;
        assert!(serde_json::from_str::<Conditions<PodCondition>>(json).is_err());
    }

    #[test]
    fn test_container_started_lookup() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 3).unwrap();
        let pod = Pod {
            metadata: ObjectMeta::new("p", "ns", at),
            conditions: Conditions::new(),
            container_statuses: vec![
                ContainerStatus {
                    name: QUEUE_PROXY_CONTAINER.to_string(),
                    running_started_at: Some(at),
                },
                ContainerStatus {
                    name: USER_CONTAINER.to_string(),
                    running_started_at: None,
                },
            ],
        };

        assert_eq!(pod.container_started(QUEUE_PROXY_CONTAINER), Some(at));
        assert_eq!(pod.container_started(USER_CONTAINER), None);
        assert_eq!(pod.container_started("sidecar"), None);
    }

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::not_found(ObjectKind::Service, "ns", "svc-1");
        assert_eq!(err.to_string(), "Service ns/svc-1 not found");
        assert!(err.is_not_found());

        let err = PlatformError::request(ObjectKind::Ingress, "ns", "svc-1", "connection refused");
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_derived_names() {
        assert_eq!(revision_selector("svc-1-00001"), "serving.knative.dev/revision=svc-1-00001");
        assert_eq!(deployment_name("svc-1-00001"), "svc-1-00001-deployment");
    }
}
