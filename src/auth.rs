//! Token material: the redacted secret wrapper, unverified claim decoding, and login grants.

pub mod codec;
pub mod grant;
pub mod secret;

pub use codec::*;
pub use grant::*;
pub use secret::*;
