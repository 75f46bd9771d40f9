pub mod internal;

pub use crate::internal::common::utils::{format_comma_delimited, trailing_index};
pub use crate::internal::common::{Map, Set};

pub use crate::internal::common::error::{NodeAllocationError, Rejection, ShortageReason};
pub use crate::internal::common::ids::{Agent, ApplicationId, CloudAccount};
pub use crate::internal::common::version::Version;

pub use crate::internal::model::cluster::{ClusterId, ClusterMembership, ClusterSpec, ClusterType};
pub use crate::internal::model::node::{
    Allocation, DeprovisionMark, Node, NodeBuilder, NodeState, NodeStatus, NodeType,
};
pub use crate::internal::model::nodelist::NodeList;
pub use crate::internal::model::nodespec::{
    CountNodeSpec, CountNodeSpecBuilder, NodeSpec, TypeNodeSpec,
};

pub type Error = internal::common::error::ProvisionError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod resources {
    pub use crate::internal::common::resources::amount::FRACTIONS_PER_UNIT;
    pub use crate::internal::common::resources::{
        DiskSpeed, NodeResources, ResourceAmount, ResourceFractions, ResourceUnits, StorageType,
    };
}

pub mod allocation {
    pub use crate::internal::allocation::candidate::{CandidateSource, NodeCandidate};
    pub use crate::internal::allocation::indices::{Committing, IndexSupply, NodeIndices, Probing};
    pub use crate::internal::allocation::nodeallocation::{
        HostDeficit, NodeAllocation, ProvisionIndices,
    };
    pub use crate::internal::allocation::prioritizer::{NodePrioritizer, Prioritized};
}

pub mod repository {
    pub use crate::internal::repository::{
        ApplicationLock, Held, NodeRepository, UnallocatedLock,
    };
}

pub mod preparer {
    pub use crate::internal::preparer::group::{GroupPreparer, PreparerConfig};
    pub use crate::internal::preparer::groups::Preparer;
    pub use crate::internal::preparer::request::{
        HostProvisionRequest, HostProvisioner, HostSharing, ProvisionCallback, ProvisionedHost,
    };
}
