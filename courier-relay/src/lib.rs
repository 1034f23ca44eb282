//! # courier-relay
//!
//! Store-and-forward server for courier.
//!
//! This crate implements:
//! - A mailbox relay: clients register a 32-byte identity over TCP, deposit
//!   opaque ciphertext for other identities, and drain their own mailbox
//! - A prekey directory over HTTP: trust-on-first-use identity pinning and a
//!   pool of single-use one-time prekeys, persisted in SQLite
//! - A request perimeter: size cap, JSON content-type check, per-source
//!   sliding-window rate limiting and hardening headers
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐   TCP (register/send/fetch)   ┌── Client B
//!            ├──────────────────────────────►│
//!        ┌───┴───────────────────────────────┴───┐
//!        │             courier-relay             │
//!        │  ┌───────────────┐ ┌───────────────┐  │
//!        │  │  Mailboxes    │ │ KeyDirectory  │  │
//!        │  │  (in memory)  │ │   (SQLite)    │  │
//!        │  └───────────────┘ └───────────────┘  │
//!        └───────────────────────────────────────┘
//!                      ▲ HTTP /keys/*
//! ```
//!
//! Mailbox contents are never persisted; payloads are never inspected.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod limits;
pub mod mailbox;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
