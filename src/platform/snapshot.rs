//! In-memory platform backed by a JSON snapshot of serving objects.
//!
//! The snapshot mirrors the object dumps of the serving API: one array per
//! object kind plus component versions. Lookups are answered from indexed
//! copies of those arrays. Every call is counted per object kind, and
//! individual lookups can be made to fail with an injected request error,
//! which lets a recorded cluster state be replayed with partial outages.

use super::{
    Configuration, Deployment, Ingress, ObjectKind, Platform, PlatformError, PlatformInfo, Pod,
    PodAutoscaler, Revision, ServerlessService, Service,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Wildcard name used to inject a failure into `list_services`.
pub const ANY_NAME: &str = "*";

/// A failure returned instead of the stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFailure {
    pub kind: ObjectKind,
    pub namespace: String,
    /// Object name, the label selector for pod listings, or `*` for service listings
    pub name: String,
    pub message: String,
}

/// Serializable cluster state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    #[serde(default)]
    pub info: PlatformInfo,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
    #[serde(default)]
    pub revisions: Vec<Revision>,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    #[serde(default)]
    pub pod_autoscalers: Vec<PodAutoscaler>,
    #[serde(default)]
    pub serverless_services: Vec<ServerlessService>,
    #[serde(default)]
    pub ingresses: Vec<Ingress>,
    #[serde(default)]
    pub failures: Vec<InjectedFailure>,
}

type ObjectKey = (String, String);

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn index<T>(
    kind: ObjectKind,
    items: Vec<T>,
    meta: impl Fn(&T) -> &super::ObjectMeta,
) -> HashMap<ObjectKey, T> {
    let mut indexed = HashMap::with_capacity(items.len());
    for item in items {
        let m = meta(&item);
        let k = key(&m.namespace, &m.name);
        if indexed.contains_key(&k) {
            warn!("Duplicate {} {}/{} in snapshot, keeping the last one", kind, k.0, k.1);
        }
        indexed.insert(k, item);
    }
    indexed
}

/// Platform implementation answering lookups from a `PlatformSnapshot`
#[derive(Debug)]
pub struct SnapshotPlatform {
    info: PlatformInfo,
    services: HashMap<ObjectKey, Service>,
    configurations: HashMap<ObjectKey, Configuration>,
    revisions: HashMap<ObjectKey, Revision>,
    pods: Vec<Pod>,
    deployments: HashMap<ObjectKey, Deployment>,
    pod_autoscalers: HashMap<ObjectKey, PodAutoscaler>,
    serverless_services: HashMap<ObjectKey, ServerlessService>,
    ingresses: HashMap<ObjectKey, Ingress>,
    failures: HashMap<(ObjectKind, String, String), String>,
    calls: Mutex<BTreeMap<ObjectKind, usize>>,
}

impl SnapshotPlatform {
    /// Index a snapshot for lookups
    pub fn new(snapshot: PlatformSnapshot) -> Self {
        let failures = snapshot
            .failures
            .into_iter()
            .map(|f| ((f.kind, f.namespace, f.name), f.message))
            .collect();

        Self {
            info: snapshot.info,
            services: index(ObjectKind::Service, snapshot.services, |o| &o.metadata),
            configurations: index(ObjectKind::Configuration, snapshot.configurations, |o| {
                &o.metadata
            }),
            revisions: index(ObjectKind::Revision, snapshot.revisions, |o| &o.metadata),
            pods: snapshot.pods,
            deployments: index(ObjectKind::Deployment, snapshot.deployments, |o| &o.metadata),
            pod_autoscalers: index(ObjectKind::PodAutoscaler, snapshot.pod_autoscalers, |o| {
                &o.metadata
            }),
            serverless_services: index(
                ObjectKind::ServerlessService,
                snapshot.serverless_services,
                |o| &o.metadata,
            ),
            ingresses: index(ObjectKind::Ingress, snapshot.ingresses, |o| &o.metadata),
            failures,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load a snapshot file written as JSON
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read platform snapshot {}", path.display()))?;
        let snapshot: PlatformSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse platform snapshot {}", path.display()))?;
        debug!(
            "Loaded snapshot {} with {} services and {} pods",
            path.display(),
            snapshot.services.len(),
            snapshot.pods.len()
        );
        Ok(Self::new(snapshot))
    }

    /// Make a lookup fail with a request error
    pub fn inject_failure(&mut self, kind: ObjectKind, namespace: &str, name: &str, message: &str) {
        self.failures.insert(
            (kind, namespace.to_string(), name.to_string()),
            message.to_string(),
        );
    }

    /// Number of lookups issued for one object kind
    pub fn calls_for(&self, kind: ObjectKind) -> usize {
        self.calls.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Number of lookups issued across all kinds
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn record_call(&self, kind: ObjectKind) {
        *self.calls.lock().entry(kind).or_insert(0) += 1;
    }

    fn check_injected(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        match self
            .failures
            .get(&(kind, namespace.to_string(), name.to_string()))
        {
            Some(message) => Err(PlatformError::request(kind, namespace, name, message.clone())),
            None => Ok(()),
        }
    }

    fn get<T: Clone>(
        &self,
        objects: &HashMap<ObjectKey, T>,
        kind: ObjectKind,
        name: &str,
        namespace: &str,
    ) -> Result<T, PlatformError> {
        self.record_call(kind);
        self.check_injected(kind, namespace, name)?;
        objects
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| PlatformError::not_found(kind, namespace, name))
    }
}

/// Parse an equality-based selector such as `a=b,c=d`
fn parse_selector(selector: &str) -> Option<Vec<(&str, &str)>> {
    selector
        .split(',')
        .map(|term| {
            let (k, v) = term.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                None
            } else {
                Some((k, v.trim()))
            }
        })
        .collect()
}

#[async_trait]
impl Platform for SnapshotPlatform {
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, PlatformError> {
        self.get(&self.services, ObjectKind::Service, name, namespace)
    }

    async fn get_configuration(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Configuration, PlatformError> {
        self.get(&self.configurations, ObjectKind::Configuration, name, namespace)
    }

    async fn get_revision(&self, name: &str, namespace: &str) -> Result<Revision, PlatformError> {
        self.get(&self.revisions, ObjectKind::Revision, name, namespace)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, PlatformError> {
        self.record_call(ObjectKind::Pod);
        self.check_injected(ObjectKind::Pod, namespace, label_selector)?;

        let terms = parse_selector(label_selector).ok_or_else(|| {
            PlatformError::request(
                ObjectKind::Pod,
                namespace,
                label_selector,
                "invalid label selector",
            )
        })?;

        Ok(self
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace == namespace)
            .filter(|pod| {
                terms
                    .iter()
                    .all(|(k, v)| pod.metadata.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, PlatformError> {
        self.get(&self.deployments, ObjectKind::Deployment, name, namespace)
    }

    async fn get_pod_autoscaler(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<PodAutoscaler, PlatformError> {
        self.get(&self.pod_autoscalers, ObjectKind::PodAutoscaler, name, namespace)
    }

    async fn get_serverless_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ServerlessService, PlatformError> {
        self.get(
            &self.serverless_services,
            ObjectKind::ServerlessService,
            name,
            namespace,
        )
    }

    async fn get_ingress(&self, name: &str, namespace: &str) -> Result<Ingress, PlatformError> {
        self.get(&self.ingresses, ObjectKind::Ingress, name, namespace)
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, PlatformError> {
        self.record_call(ObjectKind::Service);
        self.check_injected(ObjectKind::Service, namespace, ANY_NAME)?;

        let mut services: Vec<Service> = self
            .services
            .values()
            .filter(|svc| svc.metadata.namespace == namespace)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(services)
    }

    async fn platform_info(&self) -> PlatformInfo {
        self.info.clone()
    }
}

/// Builders for complete readiness chains used by unit tests
#[cfg(test)]
pub(crate) mod fixtures {
    use super::PlatformSnapshot;
    use crate::platform::*;
    use chrono::{Duration, TimeZone, Utc};

    pub fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    /// Offsets in seconds from the service creation time
    #[derive(Debug, Clone)]
    pub struct ChainTimes {
        pub configurations_ready: i64,
        pub routes_ready: i64,
        pub revision_created: i64,
        pub revision_ready: i64,
        pub deployment_created: i64,
        pub pod: Option<PodTimes>,
        pub kpa_created: i64,
        pub kpa_active: i64,
        pub sks_created: i64,
        pub sks_ready: i64,
        pub sks_activator_endpoints: i64,
        pub sks_endpoints: i64,
        pub ingress_created: i64,
        pub ingress_network_configured: i64,
        pub ingress_load_balancer_ready: i64,
    }

    #[derive(Debug, Clone)]
    pub struct PodTimes {
        pub created: i64,
        pub scheduled: i64,
        pub containers_ready: i64,
        pub queue_proxy_started: i64,
        pub user_container_started: i64,
    }

    impl ChainTimes {
        /// Distinct offsets so every derived duration is identifiable
        pub fn staged() -> Self {
            Self {
                configurations_ready: 9,
                routes_ready: 20,
                revision_created: 1,
                revision_ready: 8,
                deployment_created: 2,
                pod: Some(PodTimes {
                    created: 3,
                    scheduled: 4,
                    containers_ready: 7,
                    queue_proxy_started: 5,
                    user_container_started: 6,
                }),
                kpa_created: 2,
                kpa_active: 10,
                sks_created: 2,
                sks_ready: 11,
                sks_activator_endpoints: 4,
                sks_endpoints: 9,
                ingress_created: 12,
                ingress_network_configured: 15,
                ingress_load_balancer_ready: 19,
            }
        }

        /// Every transition at `overall` seconds, every creation at zero
        pub fn uniform(overall: i64) -> Self {
            Self {
                configurations_ready: overall,
                routes_ready: overall,
                revision_created: 0,
                revision_ready: overall,
                deployment_created: 0,
                pod: Some(PodTimes {
                    created: 0,
                    scheduled: overall,
                    containers_ready: overall,
                    queue_proxy_started: overall,
                    user_container_started: overall,
                }),
                kpa_created: 0,
                kpa_active: overall,
                sks_created: 0,
                sks_ready: overall,
                sks_activator_endpoints: overall,
                sks_endpoints: overall,
                ingress_created: 0,
                ingress_network_configured: overall,
                ingress_load_balancer_ready: overall,
            }
        }
    }

    pub fn revision_of(name: &str) -> String {
        format!("{}-00001", name)
    }

    pub fn insert_chain(
        snapshot: &mut PlatformSnapshot,
        name: &str,
        namespace: &str,
        base: Timestamp,
        times: &ChainTimes,
    ) {
        let at = |offset: i64| base + Duration::seconds(offset);
        let revision = revision_of(name);

        snapshot.services.push(Service {
            metadata: ObjectMeta::new(name, namespace, base),
            ready: true,
            conditions: Conditions::new()
                .with(ServiceCondition::Ready, at(times.routes_ready))
                .with(ServiceCondition::ConfigurationsReady, at(times.configurations_ready))
                .with(ServiceCondition::RoutesReady, at(times.routes_ready)),
        });
        snapshot.configurations.push(Configuration {
            metadata: ObjectMeta::new(name, namespace, base),
            latest_ready_revision_name: Some(revision.clone()),
        });
        snapshot.revisions.push(Revision {
            metadata: ObjectMeta::new(&revision, namespace, at(times.revision_created)),
            conditions: Conditions::new().with(RevisionCondition::Ready, at(times.revision_ready)),
        });
        snapshot.deployments.push(Deployment {
            metadata: ObjectMeta::new(
                &deployment_name(&revision),
                namespace,
                at(times.deployment_created),
            ),
        });
        if let Some(pod) = &times.pod {
            snapshot.pods.push(Pod {
                metadata: ObjectMeta::new(&format!("{}-pod", revision), namespace, at(pod.created))
                    .with_label(REVISION_LABEL, &revision),
                conditions: Conditions::new()
                    .with(PodCondition::PodScheduled, at(pod.scheduled))
                    .with(PodCondition::ContainersReady, at(pod.containers_ready)),
                container_statuses: vec![
                    ContainerStatus {
                        name: QUEUE_PROXY_CONTAINER.to_string(),
                        running_started_at: Some(at(pod.queue_proxy_started)),
                    },
                    ContainerStatus {
                        name: USER_CONTAINER.to_string(),
                        running_started_at: Some(at(pod.user_container_started)),
                    },
                ],
            });
        }
        snapshot.pod_autoscalers.push(PodAutoscaler {
            metadata: ObjectMeta::new(&revision, namespace, at(times.kpa_created)),
            conditions: Conditions::new().with(AutoscalerCondition::Active, at(times.kpa_active)),
        });
        snapshot.serverless_services.push(ServerlessService {
            metadata: ObjectMeta::new(&revision, namespace, at(times.sks_created)),
            conditions: Conditions::new()
                .with(ServerlessServiceCondition::Ready, at(times.sks_ready))
                .with(
                    ServerlessServiceCondition::ActivatorEndpointsPopulated,
                    at(times.sks_activator_endpoints),
                )
                .with(ServerlessServiceCondition::EndpointsPopulated, at(times.sks_endpoints)),
        });
        snapshot.ingresses.push(Ingress {
            metadata: ObjectMeta::new(name, namespace, at(times.ingress_created)),
            conditions: Conditions::new()
                .with(
                    IngressCondition::NetworkConfigured,
                    at(times.ingress_network_configured),
                )
                .with(
                    IngressCondition::LoadBalancerReady,
                    at(times.ingress_load_balancer_ready),
                ),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::platform::revision_selector;

    fn platform_with(names: &[&str]) -> SnapshotPlatform {
        let mut snapshot = PlatformSnapshot::default();
        for name in names {
            insert_chain(&mut snapshot, name, "ns", t0(), &ChainTimes::uniform(2));
        }
        SnapshotPlatform::new(snapshot)
    }

    #[tokio::test]
    async fn test_get_and_not_found() {
        let platform = platform_with(&["svc-1"]);

        let svc = platform.get_service("svc-1", "ns").await.unwrap();
        assert_eq!(svc.metadata.name, "svc-1");

        let err = platform.get_service("svc-2", "ns").await.unwrap_err();
        assert!(err.is_not_found());

        let err = platform.get_service("svc-1", "other").await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(platform.calls_for(ObjectKind::Service), 3);
        assert_eq!(platform.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_list_pods_by_selector() {
        let platform = platform_with(&["svc-1", "svc-2"]);

        let pods = platform
            .list_pods("ns", &revision_selector(&revision_of("svc-2")))
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name, "svc-2-00001-pod");

        let pods = platform
            .list_pods("ns", &revision_selector("missing"))
            .await
            .unwrap();
        assert!(pods.is_empty());

        assert!(platform.list_pods("ns", "no-equals-sign").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut platform = platform_with(&["svc-1"]);
        platform.inject_failure(ObjectKind::Ingress, "ns", "svc-1", "connection reset");

        let err = platform.get_ingress("svc-1", "ns").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_list_services_sorted_and_scoped() {
        let mut snapshot = PlatformSnapshot::default();
        insert_chain(&mut snapshot, "svc-2", "ns-1", t0(), &ChainTimes::uniform(1));
        insert_chain(&mut snapshot, "svc-1", "ns-1", t0(), &ChainTimes::uniform(1));
        insert_chain(&mut snapshot, "svc-3", "ns-2", t0(), &ChainTimes::uniform(1));
        let platform = SnapshotPlatform::new(snapshot);

        let names: Vec<String> = platform
            .list_services("ns-1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.metadata.name)
            .collect();
        assert_eq!(names, vec!["svc-1", "svc-2"]);
    }

    #[test]
    fn test_snapshot_json_round_trip_through_file() {
        let mut snapshot = PlatformSnapshot::default();
        insert_chain(&mut snapshot, "svc-1", "ns", t0(), &ChainTimes::staged());
        snapshot.info.serving_version = "v1.14.0".to_string();

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();

        let platform = SnapshotPlatform::from_path(file.path()).unwrap();
        assert_eq!(platform.info.serving_version, "v1.14.0");
        assert_eq!(platform.services.len(), 1);
        assert_eq!(platform.pods.len(), 1);
    }

    #[test]
    fn test_from_path_reports_parse_errors() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{ not json").unwrap();

        let err = SnapshotPlatform::from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse platform snapshot"));
    }
}
