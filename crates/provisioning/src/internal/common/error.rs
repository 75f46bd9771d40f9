use std::fmt::{Display, Formatter};

use itertools::Itertools;
use thiserror::Error;

use crate::internal::common::ids::ApplicationId;
use crate::internal::common::resources::NodeResources;
use crate::internal::model::cluster::ClusterSpec;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0}")]
    NodeAllocation(#[from] NodeAllocationError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Host provisioning failed: {0:#}")]
    Provisioning(#[source] anyhow::Error),
    #[error("Timed out waiting for {0}")]
    LockTimeout(String),
    #[error("Repository error: {0}")]
    Repository(String),
}

impl ProvisionError {
    /// Returns true if the error describes missing capacity, as opposed to a broken request
    /// or a failing collaborator.
    pub fn is_capacity_failure(&self) -> bool {
        matches!(self, ProvisionError::NodeAllocation(_))
    }
}

impl From<anyhow::Error> for ProvisionError {
    fn from(error: anyhow::Error) -> Self {
        Self::Provisioning(error)
    }
}

/// Why a candidate (or the request as a whole) could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShortageReason {
    /// Not enough nodes were found; `missing` nodes with `resources` are lacking.
    InsufficientNodes {
        missing: u32,
        resources: NodeResources,
    },
    IncompatibleResources,
    InsufficientHostCapacity,
    SpareCapacity,
    HostExclusivity,
    CloudAccount,
    WantToRetire,
    RetiredJustNow,
}

impl ShortageReason {
    fn describe(&self) -> &'static str {
        match self {
            ShortageReason::InsufficientNodes { .. } => "insufficient nodes",
            ShortageReason::IncompatibleResources => "incompatible resources",
            ShortageReason::InsufficientHostCapacity => "insufficient capacity on hosts",
            ShortageReason::SpareCapacity => "hosts kept as spare capacity",
            ShortageReason::HostExclusivity => "host exclusivity constraints",
            ShortageReason::CloudAccount => "cloud account mismatch",
            ShortageReason::WantToRetire => "nodes wanting to retire",
            ShortageReason::RetiredJustNow => "retirement of allocated nodes",
        }
    }
}

/// A single rejected or excluded candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub hostname: String,
    pub reason: ShortageReason,
}

impl Rejection {
    pub fn new(hostname: impl Into<String>, reason: ShortageReason) -> Self {
        Rejection {
            hostname: hostname.into(),
            reason,
        }
    }
}

/// Capacity allocation failure. Carries every reason found while offering candidates,
/// always including the node shortfall itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAllocationError {
    pub application: ApplicationId,
    pub cluster: ClusterSpec,
    pub requested: u32,
    pub accepted: u32,
    pub rejections: Vec<Rejection>,
    pub reasons: Vec<ShortageReason>,
}

impl NodeAllocationError {
    pub fn missing(&self) -> u32 {
        self.requested.saturating_sub(self.accepted)
    }

    /// Number of hosts rejected for the given reason.
    pub fn count(&self, reason: &ShortageReason) -> usize {
        self.rejections.iter().filter(|r| &r.reason == reason).count()
    }
}

impl Display for NodeAllocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Could not satisfy request for {} nodes in {} {}: {} accepted",
            self.requested, self.application, self.cluster, self.accepted
        )?;
        for reason in &self.reasons {
            if let ShortageReason::InsufficientNodes { missing, resources } = reason {
                write!(f, ", missing {missing} node(s) with {resources}")?;
            }
        }
        let counts = self
            .rejections
            .iter()
            .map(|r| &r.reason)
            .counts()
            .into_iter()
            .sorted()
            .map(|(reason, count)| format!("{} ({count})", reason.describe()))
            .collect::<Vec<_>>();
        if !counts.is_empty() {
            write!(
                f,
                ". Not enough suitable nodes available due to {}",
                counts.join(", ")
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for NodeAllocationError {}
