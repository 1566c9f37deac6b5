pub mod client;
pub mod token;
pub mod types;

pub use client::{DirectoryClient, DirectoryError};
pub use token::{TokenContext, TokenError};
pub use types::{EntityId, EntityKind, EntityRef, GrantRequest, GrantResult};
