//! Dynamic client registration lifecycle: create, read, update and delete of
//! OAuth clients paired with their service providers.

pub mod assembler;
pub mod attributes;
pub mod registration;
pub mod saga;
pub mod service;
pub mod software_statement;
pub mod types;
pub mod update;
pub mod validators;

// Re-export frequently used items from each module
pub use assembler::assemble;
pub use attributes::{AdditionalAttributeFilter, Attributes, KeyListAttributeFilter};
pub use saga::{Saga, SagaStep};
pub use service::{DcrmService, ServiceSettings};
pub use software_statement::{
    JwksCacheConfig, JwksSoftwareStatementVerifier, SoftwareStatementVerifier,
    verify_software_statement,
};
pub use types::{
    Application, ClientMetadata, ConsumerApplication, DcrConfiguration, RegistrationRequest,
    RequestContext, ServiceProvider, UpdateRequest,
};
pub use validators::{NamingRules, build_callback_url, callback_url_matches};
