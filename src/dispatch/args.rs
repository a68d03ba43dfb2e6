// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Positional string arguments of an invocation.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{OmrError, OmrResult};

/// Arguments as passed on the wire: every value is a string, structured
/// payloads are JSON, keys are base64 and integers are base-10.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [String],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [String]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fail unless at least `min` arguments were passed.
    pub fn expect_at_least(&self, min: usize) -> OmrResult<()> {
        if self.values.len() < min {
            return Err(OmrError::validation(format!(
                "expected at least {min} arguments, got {}",
                self.values.len()
            )));
        }
        Ok(())
    }

    pub fn required(&self, i: usize, name: &str) -> OmrResult<&'a str> {
        self.values
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| OmrError::validation(format!("missing argument {name}")))
    }

    /// Optional trailing argument; an empty string counts as absent.
    pub fn optional(&self, i: usize) -> Option<&'a str> {
        self.values
            .get(i)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn json<T: DeserializeOwned>(&self, i: usize, name: &str) -> OmrResult<T> {
        let raw = self.required(i, name)?;
        serde_json::from_str(raw).map_err(|e| OmrError::validation(format!("invalid {name}: {e}")))
    }

    /// JSON value where an empty string means `null`.
    pub fn json_or_null(&self, i: usize, name: &str) -> OmrResult<Value> {
        match self.optional(i) {
            Some(_) => self.json(i, name),
            None => Ok(Value::Null),
        }
    }

    pub fn bool(&self, i: usize, name: &str) -> OmrResult<bool> {
        match self.required(i, name)?.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(OmrError::validation(format!("invalid {name}: {other}"))),
        }
    }

    pub fn i64(&self, i: usize, name: &str) -> OmrResult<i64> {
        let raw = self.required(i, name)?;
        raw.trim()
            .parse()
            .map_err(|_| OmrError::validation(format!("invalid {name}: {raw}")))
    }

    pub fn usize(&self, i: usize, name: &str) -> OmrResult<usize> {
        let raw = self.required(i, name)?;
        raw.trim()
            .parse()
            .map_err(|_| OmrError::validation(format!("invalid {name}: {raw}")))
    }

    pub fn u32(&self, i: usize, name: &str) -> OmrResult<u32> {
        let raw = self.required(i, name)?;
        raw.trim()
            .parse()
            .map_err(|_| OmrError::validation(format!("invalid {name}: {raw}")))
    }

    /// Optional enum argument spelled as its JSON string form.
    pub fn optional_enum<T: DeserializeOwned>(&self, i: usize, name: &str) -> OmrResult<Option<T>> {
        match self.optional(i) {
            Some(raw) => serde_json::from_value(Value::String(raw.to_string()))
                .map(Some)
                .map_err(|_| OmrError::validation(format!("invalid {name}: {raw}"))),
            None => Ok(None),
        }
    }
}
