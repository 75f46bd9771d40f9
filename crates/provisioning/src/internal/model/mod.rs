pub mod cluster;
pub mod node;
pub mod nodelist;
pub mod nodespec;
