//! Core type definitions for the Vaultkit state store.
//!
//! This crate defines the fundamental, client-agnostic types shared by the
//! storage and state layers:
//! - Account identifiers (UUID)
//! - Lifecycle clear events (lock, logout)
//! - Storage tiers and client kinds
//!
//! All domain-specific state shapes (settings, vault metadata, session
//! secrets) belong to the consuming application, not here.

mod client;
mod event;
mod ids;
mod tier;

pub use client::ClientKind;
pub use event::ClearEvent;
pub use ids::UserId;
pub use tier::StorageTier;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown variant: {0}")]
    UnknownVariant(String),
}
