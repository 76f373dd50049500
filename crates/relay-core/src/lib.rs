#![allow(clippy::must_use_candidate)]

mod error;
mod identity;

pub use error::HttpError;
pub use identity::{DEFAULT_GROUP, GROUP_HEADER, TENANT_HEADER, TenantIdentity};
