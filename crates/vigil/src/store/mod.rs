//! Shared state of the engine: check definitions in, results out.
//!
//! Both stores are traits so the surrounding layers can swap in their own
//! backing; the in-memory implementations are what the engine ships with.

mod descriptors;
mod results;

pub use descriptors::{DescriptorStore, InMemoryDescriptorStore};
pub use results::{DEFAULT_CAPACITY_PER_CHECK, InMemoryResultStore, ResultStore};
