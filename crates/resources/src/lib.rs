//! In-memory resource back-ends for the action executor.

pub mod memory;
pub mod paths;

pub use memory::{
    standard_registry, InMemoryBackend, InMemoryDocumentHandler, InMemoryGatewayConfigHandler,
    InMemoryTagHandler, GATEWAY_ROOT,
};
pub use paths::{document_key, PathError, TagPath, DEFAULT_PROVIDER};
