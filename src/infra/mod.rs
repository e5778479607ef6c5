//! Infrastructure adapters: built-in renderer backends, subprocess and HTTP
//! plumbing, telemetry bootstrap.

pub mod error;
pub mod http_client;
pub mod process;
pub mod renderers;
pub mod telemetry;
