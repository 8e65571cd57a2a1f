//! opsdec-core: shared types for the opsdec activity monitor.
//!
//! Contains the unified error type, typed entity IDs, the normalized
//! playback-session types that all components exchange, and the
//! environment-driven configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::{AuthUserId, HistoryId, ServerId, SessionId, TokenId};
pub use types::{ActiveSession, MediaKind, PlaybackState, ServerKind, UpstreamSession};
