//! Typed query modules, one per entity.
//!
//! Functions take a `&Connection` (or transaction) so callers control
//! transaction scope; the session engine wraps a whole reconciliation
//! cycle in one transaction.

pub mod auth_users;
pub mod history;
pub mod image_cache;
pub mod media_users;
pub mod refresh_tokens;
pub mod servers;
pub mod sessions;
pub mod settings;
