pub mod candidate;
pub mod capacity;
pub mod indices;
pub mod nodeallocation;
pub mod prioritizer;
