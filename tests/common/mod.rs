//! Snapshot builders shared by the integration tests

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use service_measure::platform::*;

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Add a converged readiness chain where every transition lands `overall`
/// seconds after its object was created
pub fn ready_chain(snapshot: &mut PlatformSnapshot, name: &str, namespace: &str, overall: i64) {
    let base = t0();
    let done = base + Duration::seconds(overall);
    let revision = format!("{}-00001", name);

    snapshot.services.push(Service {
        metadata: ObjectMeta::new(name, namespace, base),
        ready: true,
        conditions: Conditions::new()
            .with(ServiceCondition::Ready, done)
            .with(ServiceCondition::ConfigurationsReady, done)
            .with(ServiceCondition::RoutesReady, done),
    });
    snapshot.configurations.push(Configuration {
        metadata: ObjectMeta::new(name, namespace, base),
        latest_ready_revision_name: Some(revision.clone()),
    });
    snapshot.revisions.push(Revision {
        metadata: ObjectMeta::new(&revision, namespace, base),
        conditions: Conditions::new().with(RevisionCondition::Ready, done),
    });
    snapshot.deployments.push(Deployment {
        metadata: ObjectMeta::new(&deployment_name(&revision), namespace, base),
    });
    snapshot.pods.push(Pod {
        metadata: ObjectMeta::new(&format!("{}-pod", revision), namespace, base)
            .with_label(REVISION_LABEL, &revision),
        conditions: Conditions::new()
            .with(PodCondition::PodScheduled, done)
            .with(PodCondition::ContainersReady, done),
        container_statuses: vec![
            ContainerStatus {
                name: QUEUE_PROXY_CONTAINER.to_string(),
                running_started_at: Some(done),
            },
            ContainerStatus {
                name: USER_CONTAINER.to_string(),
                running_started_at: Some(done),
            },
        ],
    });
    snapshot.pod_autoscalers.push(PodAutoscaler {
        metadata: ObjectMeta::new(&revision, namespace, base),
        conditions: Conditions::new().with(AutoscalerCondition::Active, done),
    });
    snapshot.serverless_services.push(ServerlessService {
        metadata: ObjectMeta::new(&revision, namespace, base),
        conditions: Conditions::new()
            .with(ServerlessServiceCondition::Ready, done)
            .with(ServerlessServiceCondition::ActivatorEndpointsPopulated, done)
            .with(ServerlessServiceCondition::EndpointsPopulated, done),
    });
    snapshot.ingresses.push(Ingress {
        metadata: ObjectMeta::new(name, namespace, base),
        conditions: Conditions::new()
            .with(IngressCondition::NetworkConfigured, done)
            .with(IngressCondition::LoadBalancerReady, done),
    });
}
