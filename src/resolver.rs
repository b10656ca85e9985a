//! # Resolver Chain
//!
//! Reconstructs the latency tree of one target from a single snapshot read
//! of every object in its readiness chain:
//!
//! ```text
//! service → configuration → revision → pods + deployment
//!         → pod autoscaler → serverless service → ingress
//! ```
//!
//! The chain is a strict short-circuit sequence. The first lookup that fails,
//! or the first object that has not converged, ends resolution for the target
//! with a terminal `Classification`. Nothing is retried and nothing is polled.
//!
//! ## Classification Policy
//!
//! | Step | Failure | Classification |
//! |------|---------|----------------|
//! | service lookup | not found | `NotFound` |
//! | service lookup | any other error | `Fail` |
//! | service | readiness predicate false | `NotReady` |
//! | every later step | lookup error or absent condition | `NotReady` |
//!
//! ## Timestamp Precision
//!
//! Timestamps are truncated to whole seconds before subtraction, so every
//! duration is an exact number of seconds. Report rows truncate to integer
//! seconds and statistics use the same value as `f64`.

use crate::platform::{
    deployment_name, revision_selector, AutoscalerCondition, IngressCondition, ObjectKind,
    Platform, PlatformError, PodCondition, RevisionCondition, ServerlessServiceCondition,
    ServiceCondition, Timestamp, QUEUE_PROXY_CONTAINER, USER_CONTAINER,
};
use chrono::SubsecRound;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One service instance to measure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub namespace: String,
}

impl Target {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Terminal outcome bucket of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Ready,
    NotReady,
    NotFound,
    Fail,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Ready => write!(f, "Ready"),
            Classification::NotReady => write!(f, "NotReady"),
            Classification::NotFound => write!(f, "NotFound"),
            Classification::Fail => write!(f, "Fail"),
        }
    }
}

/// Named intervals of the latency tree, in report column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    ConfigurationReady,
    RevisionReady,
    DeploymentCreated,
    PodScheduled,
    ContainersReady,
    QueueProxyStarted,
    UserContainerStarted,
    RouteReady,
    AutoscalerActive,
    MeshReady,
    MeshActivatorEndpointsPopulated,
    MeshEndpointsPopulated,
    IngressReady,
    IngressNetworkConfigured,
    IngressLoadBalancerReady,
    OverallReady,
}

impl Stage {
    pub const COUNT: usize = 16;

    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::ConfigurationReady,
        Stage::RevisionReady,
        Stage::DeploymentCreated,
        Stage::PodScheduled,
        Stage::ContainersReady,
        Stage::QueueProxyStarted,
        Stage::UserContainerStarted,
        Stage::RouteReady,
        Stage::AutoscalerActive,
        Stage::MeshReady,
        Stage::MeshActivatorEndpointsPopulated,
        Stage::MeshEndpointsPopulated,
        Stage::IngressReady,
        Stage::IngressNetworkConfigured,
        Stage::IngressLoadBalancerReady,
        Stage::OverallReady,
    ];

    /// Position of the stage in `ALL`
    pub fn index(self) -> usize {
        self as usize
    }

    /// Column name used in the durations table and JSON output
    pub fn column(self) -> &'static str {
        match self {
            Stage::ConfigurationReady => "configuration_ready",
            Stage::RevisionReady => "revision_ready",
            Stage::DeploymentCreated => "deployment_created",
            Stage::PodScheduled => "pod_scheduled",
            Stage::ContainersReady => "containers_ready",
            Stage::QueueProxyStarted => "queue-proxy_started",
            Stage::UserContainerStarted => "user-container_started",
            Stage::RouteReady => "route_ready",
            Stage::AutoscalerActive => "kpa_active",
            Stage::MeshReady => "sks_ready",
            Stage::MeshActivatorEndpointsPopulated => "sks_activator_endpoints_populated",
            Stage::MeshEndpointsPopulated => "sks_endpoints_populated",
            Stage::IngressReady => "ingress_ready",
            Stage::IngressNetworkConfigured => "ingress_config_ready",
            Stage::IngressLoadBalancerReady => "ingress_lb_ready",
            Stage::OverallReady => "overall_ready",
        }
    }

    /// Human-readable label used in console output
    pub fn label(self) -> &'static str {
        match self {
            Stage::ConfigurationReady => "Service Configuration Ready",
            Stage::RevisionReady => "Service Revision Ready",
            Stage::DeploymentCreated => "Service Deployment Created",
            Stage::PodScheduled => "Service Pod Scheduled",
            Stage::ContainersReady => "Service Pod Containers Ready",
            Stage::QueueProxyStarted => "Service Pod queue-proxy Started",
            Stage::UserContainerStarted => "Service Pod user-container Started",
            Stage::RouteReady => "Service Route Ready",
            Stage::AutoscalerActive => "Service PodAutoscaler Active",
            Stage::MeshReady => "Service ServerlessService Ready",
            Stage::MeshActivatorEndpointsPopulated => {
                "Service ServerlessService ActivatorEndpointsPopulated"
            }
            Stage::MeshEndpointsPopulated => "Service ServerlessService EndpointsPopulated",
            Stage::IngressReady => "Service Ingress Ready",
            Stage::IngressNetworkConfigured => "Service Ingress Network Configured",
            Stage::IngressLoadBalancerReady => "Service Ingress LoadBalancer Ready",
            Stage::OverallReady => "Overall Service Ready",
        }
    }

    /// Nesting depth in the latency tree, zero for top-level stages
    pub fn depth(self) -> usize {
        match self {
            Stage::ConfigurationReady | Stage::RouteReady | Stage::OverallReady => 0,
            Stage::RevisionReady | Stage::IngressReady => 1,
            Stage::DeploymentCreated
            | Stage::AutoscalerActive
            | Stage::IngressNetworkConfigured
            | Stage::IngressLoadBalancerReady => 2,
            Stage::PodScheduled | Stage::ContainersReady | Stage::MeshReady => 3,
            Stage::QueueProxyStarted
            | Stage::UserContainerStarted
            | Stage::MeshActivatorEndpointsPopulated
            | Stage::MeshEndpointsPopulated => 4,
        }
    }

    /// Whether the stage is derived from the first pod of the revision
    pub fn is_pod_derived(self) -> bool {
        matches!(
            self,
            Stage::PodScheduled
                | Stage::ContainersReady
                | Stage::QueueProxyStarted
                | Stage::UserContainerStarted
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Durations of every stage for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyChain {
    durations: [chrono::Duration; Stage::COUNT],
}

impl Default for LatencyChain {
    fn default() -> Self {
        Self {
            durations: [chrono::Duration::zero(); Stage::COUNT],
        }
    }
}

impl LatencyChain {
    pub fn get(&self, stage: Stage) -> chrono::Duration {
        self.durations[stage.index()]
    }

    pub fn set(&mut self, stage: Stage, duration: chrono::Duration) {
        self.durations[stage.index()] = duration;
    }

    /// Whole seconds, truncated toward zero
    pub fn whole_seconds(&self, stage: Stage) -> i64 {
        self.get(stage).num_seconds()
    }

    /// Seconds as floating point, used for sums and statistics
    pub fn seconds(&self, stage: Stage) -> f64 {
        self.get(stage).num_milliseconds() as f64 / 1000.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, chrono::Duration)> + '_ {
        Stage::ALL.iter().map(move |&stage| (stage, self.get(stage)))
    }
}

/// Timestamps read from the first pod of the revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTimestamps {
    pub created: Timestamp,
    pub scheduled: Timestamp,
    pub containers_ready: Timestamp,
    pub queue_proxy_started: Timestamp,
    pub user_container_started: Timestamp,
}

/// Every raw timestamp used to derive a `LatencyChain`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTimestamps {
    pub service_created: Timestamp,
    pub configurations_ready: Timestamp,
    pub routes_ready: Timestamp,
    pub revision_created: Timestamp,
    pub revision_ready: Timestamp,
    pub deployment_created: Timestamp,
    pub pod: Option<PodTimestamps>,
    pub autoscaler_created: Timestamp,
    pub autoscaler_active: Timestamp,
    pub mesh_created: Timestamp,
    pub mesh_ready: Timestamp,
    pub mesh_activator_endpoints_populated: Timestamp,
    pub mesh_endpoints_populated: Timestamp,
    pub ingress_created: Timestamp,
    pub ingress_network_configured: Timestamp,
    pub ingress_load_balancer_ready: Timestamp,
}

impl RawTimestamps {
    /// Derive every stage duration from the timestamp pairs
    pub fn latency_chain(&self) -> LatencyChain {
        let mut chain = LatencyChain::default();

        chain.set(
            Stage::ConfigurationReady,
            self.configurations_ready - self.service_created,
        );
        chain.set(Stage::RevisionReady, self.revision_ready - self.revision_created);
        chain.set(
            Stage::DeploymentCreated,
            self.deployment_created - self.revision_created,
        );

        // Pod-derived stages stay at zero when no pod was listed.
        if let Some(pod) = &self.pod {
            chain.set(Stage::PodScheduled, pod.scheduled - pod.created);
            chain.set(Stage::ContainersReady, pod.containers_ready - pod.created);
            chain.set(Stage::QueueProxyStarted, pod.queue_proxy_started - pod.created);
            chain.set(
                Stage::UserContainerStarted,
                pod.user_container_started - pod.created,
            );
        }

        chain.set(Stage::RouteReady, self.routes_ready - self.service_created);
        chain.set(
            Stage::AutoscalerActive,
            self.autoscaler_active - self.autoscaler_created,
        );
        chain.set(Stage::MeshReady, self.mesh_ready - self.mesh_created);
        chain.set(
            Stage::MeshActivatorEndpointsPopulated,
            self.mesh_activator_endpoints_populated - self.mesh_created,
        );
        chain.set(
            Stage::MeshEndpointsPopulated,
            self.mesh_endpoints_populated - self.mesh_created,
        );
        chain.set(
            Stage::IngressReady,
            self.ingress_load_balancer_ready - self.ingress_created,
        );
        chain.set(
            Stage::IngressNetworkConfigured,
            self.ingress_network_configured - self.ingress_created,
        );
        // Measured from network-configured, not from ingress creation.
        chain.set(
            Stage::IngressLoadBalancerReady,
            self.ingress_load_balancer_ready - self.ingress_network_configured,
        );
        chain.set(Stage::OverallReady, self.routes_ready - self.service_created);

        chain
    }
}

/// Measurement of one `Ready` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub durations: LatencyChain,
    pub timestamps: RawTimestamps,
}

impl Sample {
    pub fn from_timestamps(timestamps: RawTimestamps) -> Self {
        Self {
            durations: timestamps.latency_chain(),
            timestamps,
        }
    }

    /// False when the revision had no pod, leaving pod stages at zero
    pub fn pod_observed(&self) -> bool {
        self.timestamps.pod.is_some()
    }
}

/// Outcome of resolving one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(Box<Sample>),
    NotReady { reason: String },
    NotFound { reason: String },
    Fail { reason: String },
}

impl Resolution {
    pub fn classification(&self) -> Classification {
        match self {
            Resolution::Ready(_) => Classification::Ready,
            Resolution::NotReady { .. } => Classification::NotReady,
            Resolution::NotFound { .. } => Classification::NotFound,
            Resolution::Fail { .. } => Classification::Fail,
        }
    }

    fn not_ready(reason: impl Into<String>) -> Self {
        Resolution::NotReady {
            reason: reason.into(),
        }
    }
}

fn not_ready_after(step: &str, err: PlatformError) -> Resolution {
    Resolution::not_ready(format!("failed to get {} and skip measuring: {}", step, err))
}

fn missing(what: &str) -> Resolution {
    Resolution::not_ready(format!("failed to find {} and skip measuring", what))
}

fn secs(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(0)
}

/// Resolves targets against a platform
#[derive(Clone)]
pub struct Resolver {
    platform: Arc<dyn Platform>,
    lookup_timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(platform: Arc<dyn Platform>, lookup_timeout: Option<Duration>) -> Self {
        Self {
            platform,
            lookup_timeout,
        }
    }

    /// Run the readiness chain for one target
    pub async fn resolve(&self, target: &Target) -> Resolution {
        match self.resolve_chain(target).await {
            Ok(sample) => Resolution::Ready(Box::new(sample)),
            Err(resolution) => resolution,
        }
    }

    /// Bound one lookup by the configured timeout
    async fn lookup<T, F>(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: &str,
        request: F,
    ) -> Result<T, PlatformError>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        match self.lookup_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .unwrap_or_else(|_| Err(PlatformError::timeout(kind, namespace, name, limit))),
            None => request.await,
        }
    }

    async fn resolve_chain(&self, target: &Target) -> Result<Sample, Resolution> {
        let platform = self.platform.as_ref();
        let (name, ns) = (target.name.as_str(), target.namespace.as_str());

        // 1. Service
        let service = self
            .lookup(ObjectKind::Service, name, ns, platform.get_service(name, ns))
            .await
            .map_err(|err| {
                let reason = format!("failed to get Knative Service: {}", err);
                if err.is_not_found() {
                    Resolution::NotFound { reason }
                } else {
                    Resolution::Fail { reason }
                }
            })?;
        if !service.ready {
            return Err(Resolution::not_ready(format!(
                "service {} not ready and skip measuring",
                target
            )));
        }
        let service_created = secs(service.metadata.creation_timestamp);
        let configurations_ready = service
            .conditions
            .get(ServiceCondition::ConfigurationsReady)
            .map(secs)
            .ok_or_else(|| missing("Service Condition ConfigurationsReady"))?;
        let routes_ready = service
            .conditions
            .get(ServiceCondition::RoutesReady)
            .map(secs)
            .ok_or_else(|| missing("Service Condition RoutesReady"))?;

        // 2. Configuration
        let configuration = self
            .lookup(
                ObjectKind::Configuration,
                name,
                ns,
                platform.get_configuration(name, ns),
            )
            .await
            .map_err(|err| not_ready_after("Configuration", err))?;

        // 3. Revision
        let revision_name = configuration
            .latest_ready_revision_name
            .filter(|revision| !revision.is_empty())
            .ok_or_else(|| missing("latest ready Revision"))?;
        let revision = self
            .lookup(
                ObjectKind::Revision,
                &revision_name,
                ns,
                platform.get_revision(&revision_name, ns),
            )
            .await
            .map_err(|err| not_ready_after("Revision", err))?;
        let revision_created = secs(revision.metadata.creation_timestamp);
        let revision_ready = revision
            .conditions
            .get(RevisionCondition::Ready)
            .map(secs)
            .ok_or_else(|| missing("Revision Condition Ready"))?;

        // 4. Pods and deployment
        let selector = revision_selector(&revision_name);
        let pods = self
            .lookup(
                ObjectKind::Pod,
                &selector,
                ns,
                platform.list_pods(ns, &selector),
            )
            .await
            .map_err(|err| not_ready_after("Pods of revision", err))?;
        let deployment = deployment_name(&revision_name);
        let deployment = self
            .lookup(
                ObjectKind::Deployment,
                &deployment,
                ns,
                platform.get_deployment(&deployment, ns),
            )
            .await
            .map_err(|err| not_ready_after("Deployment of revision", err))?;
        let deployment_created = secs(deployment.metadata.creation_timestamp);

        // 5. First pod, when the revision has one
        let pod = match pods.first() {
            Some(pod) => Some(PodTimestamps {
                created: secs(pod.metadata.creation_timestamp),
                scheduled: pod
                    .conditions
                    .get(PodCondition::PodScheduled)
                    .map(secs)
                    .ok_or_else(|| missing("Pod Condition PodScheduled"))?,
                containers_ready: pod
                    .conditions
                    .get(PodCondition::ContainersReady)
                    .map(secs)
                    .ok_or_else(|| missing("Pod Condition ContainersReady"))?,
                queue_proxy_started: pod
                    .container_started(QUEUE_PROXY_CONTAINER)
                    .map(secs)
                    .ok_or_else(|| missing("queue-proxy container status"))?,
                user_container_started: pod
                    .container_started(USER_CONTAINER)
                    .map(secs)
                    .ok_or_else(|| missing("user-container container status"))?,
            }),
            None => None,
        };

        // 6. Pod autoscaler
        let autoscaler = self
            .lookup(
                ObjectKind::PodAutoscaler,
                &revision_name,
                ns,
                platform.get_pod_autoscaler(&revision_name, ns),
            )
            .await
            .map_err(|err| not_ready_after("PodAutoscaler", err))?;
        let autoscaler_active = autoscaler
            .conditions
            .get(AutoscalerCondition::Active)
            .map(secs)
            .ok_or_else(|| missing("PodAutoscaler Condition Active"))?;

        // 7. Serverless service
        let mesh = self
            .lookup(
                ObjectKind::ServerlessService,
                &revision_name,
                ns,
                platform.get_serverless_service(&revision_name, ns),
            )
            .await
            .map_err(|err| not_ready_after("ServerlessService", err))?;
        let mesh_condition = |kind: ServerlessServiceCondition, what: &str| {
            mesh.conditions
                .get(kind)
                .map(secs)
                .ok_or_else(|| missing(what))
        };
        let mesh_ready = mesh_condition(
            ServerlessServiceCondition::Ready,
            "ServerlessService Condition Ready",
        )?;
        let mesh_activator_endpoints_populated = mesh_condition(
            ServerlessServiceCondition::ActivatorEndpointsPopulated,
            "ServerlessService Condition ActivatorEndpointsPopulated",
        )?;
        let mesh_endpoints_populated = mesh_condition(
            ServerlessServiceCondition::EndpointsPopulated,
            "ServerlessService Condition EndpointsPopulated",
        )?;

        // 8. Ingress, keyed by the service name
        let ingress = self
            .lookup(ObjectKind::Ingress, name, ns, platform.get_ingress(name, ns))
            .await
            .map_err(|err| not_ready_after("Ingress", err))?;
        let ingress_network_configured = ingress
            .conditions
            .get(IngressCondition::NetworkConfigured)
            .map(secs)
            .ok_or_else(|| missing("Ingress Condition NetworkConfigured"))?;
        let ingress_load_balancer_ready = ingress
            .conditions
            .get(IngressCondition::LoadBalancerReady)
            .map(secs)
            .ok_or_else(|| missing("Ingress Condition LoadBalancerReady"))?;

        // 9. Durations
        Ok(Sample::from_timestamps(RawTimestamps {
            service_created,
            configurations_ready,
            routes_ready,
            revision_created,
            revision_ready,
            deployment_created,
            pod,
            autoscaler_created: secs(autoscaler.metadata.creation_timestamp),
            autoscaler_active,
            mesh_created: secs(mesh.metadata.creation_timestamp),
            mesh_ready,
            mesh_activator_endpoints_populated,
            mesh_endpoints_populated,
            ingress_created: secs(ingress.metadata.creation_timestamp),
            ingress_network_configured,
            ingress_load_balancer_ready,
        }))
    }
}
