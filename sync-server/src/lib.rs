//! # otpsync-server
//!
//! Identity-gated sync server for encrypted two-factor vault records.
//!
//! This crate implements a server that:
//! - Exchanges identity + password for a signed, self-contained bearer token
//! - Gates every sync and admin request on that token
//! - Applies each client batch of upserts and deletes atomically
//! - Answers every batch with the caller's full, authoritative record set
//! - Never inspects record payloads (they are encrypted on the client)
//!
//! ## Architecture
//!
//! ```text
//! Client ──► HTTP (axum) ──► gate ──► reconcile ──► storage (SQLite)
//!                  │            │
//!                  │            └── token (HS256)
//!                  └── limits (governor)
//! ```
//!
//! ## Routes
//!
//! - `POST /api/v1/login` → `{token}`
//! - `POST /api/v1/sync` (bearer) → full record set
//! - `GET|POST /admin/users`, `DELETE /admin/users/:id` (bearer, admin)
//! - `GET /health`, `GET /metrics`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod limits;
pub mod password;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod token;
