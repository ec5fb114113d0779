//! Auth-domain identifiers, accounts, scope sets, and secrets.

pub mod account;
pub mod claims;
pub mod id;
pub mod scope;
pub mod secret;

pub use account::*;
pub use claims::*;
pub use id::*;
pub use scope::*;
pub use secret::*;
