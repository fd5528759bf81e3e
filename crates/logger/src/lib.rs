//! Process-wide `tracing` subscriber setup

mod subscriber;

pub use subscriber::{LogFormat, LogOptions, init, init_tracing};
