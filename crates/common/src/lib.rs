//! Types shared across the image builder workspace.

pub mod error;
pub mod identity;

pub use error::{Error, Result};
pub use identity::{Identity, IdentityError, IDENTITY_HEADER};
