//! # Target Enumeration
//!
//! Produces the ordered list of services to measure. Two sources exist and
//! may be combined, explicit targets first:
//!
//! - **Explicit range**: `<prefix>-<i>` for every `i` in an inclusive range,
//!   all in one namespace
//! - **Namespace discovery**: every service whose name starts with the
//!   service prefix, listed from each namespace `<namespace-prefix>-<i>`

use crate::platform::Platform;
use crate::resolver::Target;
use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Inclusive numeric range written as `start,end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub start: i64,
    pub end: i64,
}

impl IndexRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> {
        self.start..=self.end
    }
}

impl FromStr for IndexRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 2 {
            anyhow::bail!("expected range like 1,500, given {}", s);
        }
        let start = parts[0]
            .trim()
            .parse::<i64>()
            .with_context(|| format!("invalid range start in {}", s))?;
        let end = parts[1]
            .trim()
            .parse::<i64>()
            .with_context(|| format!("invalid range end in {}", s))?;
        if start > end {
            anyhow::bail!("range start {} is greater than range end {}", start, end);
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.end)
    }
}

/// Services named `<prefix>-<i>` in one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitTargets {
    pub namespace: String,
    pub service_prefix: String,
    pub range: IndexRange,
}

impl ExplicitTargets {
    pub fn expand(&self) -> Vec<Target> {
        self.range
            .iter()
            .map(|i| Target::new(format!("{}-{}", self.service_prefix, i), &self.namespace))
            .collect()
    }
}

/// Services listed from namespaces `<namespace_prefix>-<i>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDiscovery {
    pub namespace_prefix: String,
    pub range: IndexRange,
    /// Only names starting with this prefix are kept; empty keeps all
    pub service_prefix: String,
}

impl NamespaceDiscovery {
    pub fn namespaces(&self) -> impl Iterator<Item = String> + '_ {
        self.range
            .iter()
            .map(move |i| format!("{}-{}", self.namespace_prefix, i))
    }

    /// List every namespace in the range
    ///
    /// A listing error ends enumeration; an empty namespace is skipped.
    pub async fn discover(&self, platform: &dyn Platform) -> Result<Vec<Target>> {
        let mut targets = Vec::new();
        for namespace in self.namespaces() {
            let services = platform
                .list_services(&namespace)
                .await
                .with_context(|| format!("failed to list service under namespace {}", namespace))?;

            if services.is_empty() {
                info!("no service found under namespace {} and skip", namespace);
                continue;
            }

            let before = targets.len();
            targets.extend(
                services
                    .into_iter()
                    .filter(|svc| svc.metadata.name.starts_with(&self.service_prefix))
                    .map(|svc| Target::new(svc.metadata.name, namespace.as_str())),
            );
            debug!(
                "Discovered {} services under namespace {}",
                targets.len() - before,
                namespace
            );
        }
        Ok(targets)
    }
}

/// Every configured target source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSources {
    pub explicit: Option<ExplicitTargets>,
    pub discovery: Option<NamespaceDiscovery>,
}

impl TargetSources {
    pub fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.discovery.is_none()
    }
}

/// Build the ordered target list from all sources
pub async fn enumerate_targets(
    platform: &dyn Platform,
    sources: &TargetSources,
) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    if let Some(explicit) = &sources.explicit {
        targets.extend(explicit.expand());
    }
    if let Some(discovery) = &sources.discovery {
        targets.extend(discovery.discover(platform).await?);
    }
    info!("Enumerated {} services to measure", targets.len());
    Ok(targets)
}
