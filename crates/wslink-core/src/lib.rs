//! wslink-core — wire format, envelope model, codec, and configuration.
//! All other wslink crates depend on this one.

pub mod codec;
pub mod config;
pub mod envelope;
pub mod wire;

pub use config::{ReassemblyPolicy, WslinkConfig};
pub use envelope::{codes, Envelope};
