//! # sync-types
//!
//! Wire format types for the otpsync vault sync service.
//!
//! This crate provides the types shared by the server and its clients:
//! - [`AccountId`], [`RecordId`] - Identity types
//! - [`EncryptedData`], [`RecordPayload`] - Opaque vault records
//! - [`SyncOperation`] - Batch mutations submitted to `/sync`
//! - [`LoginRequest`], [`CreateAccountRequest`], [`AccountSummary`] - Account bodies
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::WireError;
pub use ids::{AccountId, RecordId};
pub use messages::{
    AccountSummary, CreateAccountRequest, EncryptedData, ErrorBody, LoginRequest,
    LoginResponse, RecordPayload, RecordRef, SyncOperation,
};
