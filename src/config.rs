// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`Config`] loaded from
//! them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the redb ledger file | `/data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//! | `OMR_TIME_WINDOW_SECS` | Allowed skew of caller timestamps | `600` |
//! | `OMR_DEFAULT_MAX_NUM` | Result count used when `maxNum` is 0 | `20` |
//! | `OMR_TOKEN_SECRET` | Base64 32-byte secret sealing consent tokens | development seed |
//! | `OMR_STUB_CACHE_CAPACITY` | Read-cache entries per transaction | `1024` |

use std::env;
use std::path::PathBuf;

use crate::crypto::{self, derive::sha256};

/// Environment variable name for the ledger data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "/data";

/// File name of the redb ledger inside `DATA_DIR`.
pub const LEDGER_FILE: &str = "ledger.redb";

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const TIME_WINDOW_ENV: &str = "OMR_TIME_WINDOW_SECS";

/// Caller timestamps must fall within this many seconds of the tx time.
pub const DEFAULT_TIME_WINDOW_SECS: i64 = 600;

pub const DEFAULT_MAX_NUM_ENV: &str = "OMR_DEFAULT_MAX_NUM";

/// Number of records returned when a query passes `maxNum == 0`.
pub const DEFAULT_MAX_NUM: usize = 20;

pub const TOKEN_SECRET_ENV: &str = "OMR_TOKEN_SECRET";

pub const STUB_CACHE_CAPACITY_ENV: &str = "OMR_STUB_CACHE_CAPACITY";

pub const DEFAULT_STUB_CACHE_CAPACITY: usize = 1024;

// Only used when OMR_TOKEN_SECRET is unset.
const DEV_TOKEN_SEED: &[u8] = b"omr-core development consent token seed";

/// Engine configuration.
#[derive(Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub time_window_secs: i64,
    pub default_max_num: usize,
    pub token_secret: Vec<u8>,
    pub stub_cache_capacity: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("time_window_secs", &self.time_window_secs)
            .field("default_max_num", &self.default_max_num)
            .field("token_secret", &"<redacted>")
            .field("stub_cache_capacity", &self.stub_cache_capacity)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            time_window_secs: DEFAULT_TIME_WINDOW_SECS,
            default_max_num: DEFAULT_MAX_NUM,
            token_secret: sha256(&[DEV_TOKEN_SEED]),
            stub_cache_capacity: DEFAULT_STUB_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Malformed values are logged and replaced by their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let token_secret = match env::var(TOKEN_SECRET_ENV) {
            Ok(value) => match crypto::decode_b64(&value) {
                Ok(bytes) if bytes.len() == 32 => bytes,
                _ => {
                    tracing::warn!(var = TOKEN_SECRET_ENV, "ignoring malformed token secret");
                    defaults.token_secret.clone()
                }
            },
            Err(_) => {
                tracing::warn!("{TOKEN_SECRET_ENV} not set, using development token secret");
                defaults.token_secret.clone()
            }
        };

        Self {
            data_dir: env::var(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            time_window_secs: parse_var(TIME_WINDOW_ENV, defaults.time_window_secs),
            default_max_num: parse_var(DEFAULT_MAX_NUM_ENV, defaults.default_max_num),
            token_secret,
            stub_cache_capacity: parse_var(STUB_CACHE_CAPACITY_ENV, defaults.stub_cache_capacity),
        }
    }

    /// Full path of the ledger database file.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    /// Resolve a caller-supplied `maxNum`; 0 means the default.
    pub fn max_num(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_max_num
        } else {
            requested
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "ignoring malformed value");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.time_window_secs, 600);
        assert_eq!(config.default_max_num, 20);
        assert_eq!(config.token_secret.len(), 32);
        assert_eq!(config.ledger_path(), PathBuf::from("/data/ledger.redb"));
    }

    #[test]
    fn zero_max_num_uses_default() {
        let config = Config::default();
        assert_eq!(config.max_num(0), 20);
        assert_eq!(config.max_num(5), 5);
    }

    #[test]
    fn debug_hides_token_secret() {
        let rendered = format!("{:?}", Config::default());
        assert!(rendered.contains("redacted"));
    }
}
