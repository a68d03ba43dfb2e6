// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `omr-ledger`: local harness over a redb ledger.
//!
//! Reads one JSON invocation per line from stdin,
//! `{"caller": "...", "keypair": "<b64>", "function": "...", "args": [...]}`,
//! and writes one result envelope per line to stdout.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use omr_core::dispatch::{Invocation, Outcome};
use omr_core::error::OmrError;
use omr_core::ledger::RedbStore;
use omr_core::telemetry::init_tracing;
use omr_core::{Config, Node};

fn main() -> ExitCode {
    init_tracing();
    let config = Config::from_env();
    let path = config.ledger_path();

    let store = match RedbStore::open(&path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to open ledger");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(path = %path.display(), "omr-ledger ready");
    let node = Node::new(Arc::new(store), config);

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to read stdin");
                return ExitCode::FAILURE;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<Invocation>(&line) {
            Ok(invocation) => node.handle(&invocation),
            Err(e) => {
                let error = OmrError::validation(format!("invalid invocation: {e}"));
                Outcome::Err(error.to_body())
            }
        };
        let written = serde_json::to_string(&outcome)
            .map_err(io::Error::other)
            .and_then(|json| writeln!(stdout, "{json}"));
        if let Err(e) = written {
            tracing::error!(error = %e, "failed to write result");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
