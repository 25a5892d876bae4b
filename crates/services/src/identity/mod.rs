pub mod ports;
pub mod service;

pub use ports::{AuthenticatedUser, IdentityError, IdentityVerifier};
pub use service::GoTrueVerifier;
