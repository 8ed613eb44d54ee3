//! StripeFS Common - Shared types and utilities
//!
//! This crate provides the types, error definitions, configuration and
//! checksum framing shared by the StripeFS storage-node components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::{ChecksumDescriptor, ChecksumKind};
pub use config::ReconstructionConfig;
pub use error::{Error, Result};
pub use types::*;
