//! # courier-types
//!
//! Shared types for the courier store-and-forward relay.
//!
//! This crate provides the foundational types used across all courier crates:
//! - [`Identity`], [`UserId`] - Addressing types for the relay and key directory
//! - [`PublicKey`], [`SignatureBytes`] - Fixed-length key material with hex codecs
//! - [`UploadBundle`], [`PrekeyBundle`] - Key directory JSON documents
//! - [`wire`] - Binary relay protocol (REGISTER / SEND / FETCH)
//! - [`ValidationError`], [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bundle;
mod error;
mod ids;
pub mod wire;

pub use bundle::{
    ErrorBody, OneTimeKeyCount, PrekeyBundle, PublicKey, SignatureBytes, UploadBundle,
    UploadReceipt, ValidatedUpload,
};
pub use error::{ValidationError, WireError};
pub use ids::{Identity, UserId};
pub use wire::{Command, Envelope, FetchReply};
