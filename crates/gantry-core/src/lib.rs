//! Types shared by every gantry crate: session identifiers, the gateway
//! error taxonomy, the shared-secret credential, and the capability traits
//! the protocol core is driven through.

pub mod errors;
pub mod ids;
pub mod protocol;
pub mod security;

pub use errors::{CoreError, GatewayError};
pub use ids::SessionId;
pub use protocol::{Ack, Connection, ProtocolCore, PushError, PushSink, QueueSink};
pub use security::Credential;
