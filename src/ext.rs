//! Collaborator contracts the engine consumes but does not implement.
//!
//! Client assertions (certificate signing) and interactive sign-in are platform concerns, so the
//! crate only defines the seams; callers plug in their own signer or browser integration.

pub mod assertion;
pub mod interactive;

pub use assertion::*;
pub use interactive::*;
