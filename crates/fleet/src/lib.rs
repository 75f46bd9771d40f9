pub mod common;
pub mod config;
pub mod images;
pub mod os;
pub mod provisioner;
pub mod repository;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::FleetError;
pub type Result<T> = std::result::Result<T, Error>;

// Reexports
pub use common::setup::setup_logging;
pub use provisioning;
