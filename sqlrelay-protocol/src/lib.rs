pub mod codec;
pub mod constant;
pub mod engine;
pub mod framing;
pub mod packet;
pub mod payload;
pub mod session;
pub mod state;

pub use constant::CapabilityFlags;
pub use session::{ConnectionSession, CredentialStore};
pub use state::ConnectionState;
