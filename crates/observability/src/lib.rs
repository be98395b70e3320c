//! Process-wide tracing setup.

pub mod logging;

pub use logging::{init, init_with, LogFormat};
