//! Application services: renderer contract and registry, validation, error
//! classification, orchestration and output safety.

pub mod classify;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod renderer;
pub mod runtime;
pub mod safety;
pub mod validation;
