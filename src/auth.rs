//! Caller identities, the published access tokens that resolve to them, and the key the proxy
//! presents upstream.

pub mod id;
pub mod secret;
pub mod token;

pub use id::*;
pub use secret::*;
pub use token::*;
