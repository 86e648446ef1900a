//! IdP-side orchestration.
//!
//! Turns validated requests into signed/encrypted responses: assertion
//! consumer endpoint selection, NameID policy, audience and condition
//! computation, attribute encoding, and logout fan-out. Metadata, session
//! associations and suspended flow state are consumed through provider
//! traits; their storage belongs to the host application.

mod assertion_builder;
mod endpoint;
mod logout;
mod providers;
mod sso;

pub use assertion_builder::build_assertion;
pub use endpoint::{select_acs_endpoint, EndpointFilter};
pub use logout::{LogoutDispatch, LogoutHandler};
pub use providers::{
    Association, AssociationStore, AttributeEncoding, AuthnState, Endpoint, FlowCursor,
    FlowStateStore, IdpConfig, InMemoryAssociationStore, InMemoryFlowStateStore,
    InMemoryMetadataProvider, MetadataProvider, RequestContext, SpConfig,
};
pub use sso::{handle_artifact_resolve, SsoHandler, SsoOutcome, SSO_AUTHN_STAGE};
