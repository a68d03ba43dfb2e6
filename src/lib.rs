// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OMR Core - owner-mediated records over a transactional ledger
//!
//! Every record is encrypted under its own key. Who may read what is decided
//! by a graph of encrypted key edges: a caller can open an asset when a path
//! of edges leads from its key pair to the asset key. Consents, enrollments,
//! contracts and audit permissions are expressed as edges in that graph.
//!
//! ## Modules
//!
//! - `crypto` - keys, AES-256-GCM, ECIES over secp256k1, log-key derivation
//! - `ledger` - ledger stub, key/value stores, cached stub, local host
//! - `keygraph` - key ids, edges, path traversal and canonical path patterns
//! - `assets` - encrypted asset records and secondary indices
//! - `models` - entity types stored as assets
//! - `engine` - transaction context and one engine per concern
//! - `dispatch` - invocation table and argument codec
//! - `config`, `error`, `telemetry` - runtime configuration, errors, tracing

pub mod assets;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod keygraph;
pub mod ledger;
pub mod models;
pub mod telemetry;

pub use config::Config;
pub use dispatch::Node;
pub use engine::Caller;
pub use error::{OmrError, OmrResult};
