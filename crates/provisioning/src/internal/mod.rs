pub(crate) mod common;
pub mod allocation;
pub mod model;
pub mod preparer;
pub mod repository;

#[cfg(test)]
pub mod tests;
