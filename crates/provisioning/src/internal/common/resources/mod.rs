pub mod amount;
pub mod node_resources;

pub use amount::{ResourceAmount, ResourceFractions, ResourceUnits};
pub use node_resources::{DiskSpeed, NodeResources, StorageType};
