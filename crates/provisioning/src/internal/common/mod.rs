pub(crate) mod data_structures;
pub(crate) mod error;
pub(crate) mod ids;
pub mod resources;
pub(crate) mod utils;
pub(crate) mod version;

pub use data_structures::{Map, Set};
