//! Tracing subscriber setup shared by the vigil binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing};
