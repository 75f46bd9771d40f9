#[cfg(test)]
pub mod utils;
