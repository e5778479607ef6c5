pub mod capability;
pub mod config_schema;
pub mod diagram;
pub mod error;
pub mod outcome;
pub mod request;

pub use capability::{Capability, OutputFormat, RendererDescriptor};
pub use config_schema::{ConfigField, ConfigSchema, FieldKind, RendererSettings};
pub use diagram::DiagramType;
pub use error::DomainError;
pub use outcome::{RenderContent, RenderOutcome};
pub use request::{RenderRequest, Theme};
