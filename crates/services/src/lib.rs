pub mod billing;
pub mod identity;
pub mod types;

pub use types::UserId;
