// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ordered secondary indexes.
//!
//! Every index row lives at `index/{table}/{index}/{sort_key}` and points at
//! an asset id. The sort key concatenates the indexed field values of the
//! asset's public data followed by the asset id.
//!
//! ## Sort key encoding
//!
//! - strings: raw text followed by `\0`
//! - integers: `value ^ i64::MIN` as 16 hex digits followed by `\0`
//! - booleans: `0` / `1` followed by `\0`
//! - null / missing: just `\0`
//!
//! Ids never contain `\0`, so the encoding is prefix-free and byte order
//! equals tuple order, negative integers included.

use serde_json::Value;

use crate::ledger::paths::LedgerPaths;
use crate::ledger::{KeyRange, PREFIX_END};

#[derive(Debug)]
pub struct IndexDef {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub namespace: &'static str,
    pub indexes: &'static [IndexDef],
}

// =============================================================================
// Table Definitions
// =============================================================================

pub const PRINCIPALS: TableDef = TableDef {
    name: "principals",
    namespace: "principal",
    indexes: &[
        IndexDef { name: "by_role", fields: &["role", "id"] },
        IndexDef { name: "by_org", fields: &["org_id", "id"] },
    ],
};

pub const DATATYPES: TableDef = TableDef {
    name: "datatypes",
    namespace: "datatype",
    indexes: &[IndexDef { name: "by_id", fields: &["datatype_id"] }],
};

pub const ENROLLMENTS: TableDef = TableDef {
    name: "enrollments",
    namespace: "enrollment",
    indexes: &[
        IndexDef { name: "by_user", fields: &["user_id", "service_id"] },
        IndexDef { name: "by_service", fields: &["service_id", "user_id"] },
    ],
};

pub const CONSENTS: TableDef = TableDef {
    name: "consents",
    namespace: "consent",
    indexes: &[
        IndexDef { name: "by_owner", fields: &["owner_id", "target_id", "datatype_id"] },
        IndexDef { name: "by_target", fields: &["target_id", "owner_id", "datatype_id"] },
    ],
};

pub const CONTRACTS: TableDef = TableDef {
    name: "contracts",
    namespace: "contract",
    indexes: &[
        IndexDef { name: "by_owner", fields: &["owner_service", "contract_id"] },
        IndexDef { name: "by_requester", fields: &["requester_service", "contract_id"] },
    ],
};

pub const AUDIT_PERMISSIONS: TableDef = TableDef {
    name: "audit_permissions",
    namespace: "audit_permission",
    indexes: &[
        IndexDef { name: "by_service", fields: &["service_id", "auditor_id"] },
        IndexDef { name: "by_auditor", fields: &["auditor_id", "service_id"] },
    ],
};

pub const USER_DATA: TableDef = TableDef {
    name: "user_data",
    namespace: "user_data",
    indexes: &[IndexDef { name: "by_owner", fields: &["owner_id", "datatype_id", "timestamp"] }],
};

pub const OWNER_DATA: TableDef = TableDef {
    name: "owner_data",
    namespace: "owner_data",
    indexes: &[IndexDef { name: "by_owner", fields: &["owner_id", "datatype_id", "timestamp"] }],
};

pub const LOGS: TableDef = TableDef {
    name: "logs",
    namespace: "log",
    indexes: &[IndexDef { name: "by_time", fields: &["timestamp"] }],
};

pub const ALL_TABLES: &[&TableDef] = &[
    &PRINCIPALS,
    &DATATYPES,
    &ENROLLMENTS,
    &CONSENTS,
    &CONTRACTS,
    &AUDIT_PERMISSIONS,
    &USER_DATA,
    &OWNER_DATA,
    &LOGS,
];

pub fn table(name: &str) -> Option<&'static TableDef> {
    ALL_TABLES.iter().copied().find(|t| t.name == name)
}

impl TableDef {
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Ledger keys of every index row for an asset.
    pub fn rows(&self, asset_id: &str, public: &Value) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                let mut values: Vec<&Value> = index
                    .fields
                    .iter()
                    .map(|f| public.get(*f).unwrap_or(&Value::Null))
                    .collect();
                let id = Value::String(asset_id.to_string());
                values.push(&id);
                LedgerPaths::index_row(self.name, index.name, &sort_key(values))
            })
            .collect()
    }

    /// Range covering rows whose leading fields lie in `[start, end]`.
    ///
    /// Both bounds may name fewer fields than the index holds; a shorter end
    /// bound matches every row sharing that prefix.
    pub fn range(
        &self,
        index: &IndexDef,
        start: &[Value],
        end: &[Value],
        ascending: bool,
    ) -> KeyRange {
        let prefix = LedgerPaths::index_prefix(self.name, index.name);
        KeyRange::new(
            format!("{prefix}{}", sort_key(start.iter())),
            format!("{prefix}{}{PREFIX_END}", sort_key(end.iter())),
            ascending,
        )
    }
}

fn encode_field(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push(if *b { '1' } else { '0' }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => out.push_str(&format!("{:016x}", (i ^ i64::MIN) as u64)),
            None => out.push_str(&n.to_string()),
        },
        other => out.push_str(&other.to_string()),
    }
    out.push('\0');
}

/// Encode field values into a sort key.
pub fn sort_key<'v, I>(values: I) -> String
where
    I: IntoIterator<Item = &'v Value>,
{
    let mut out = String::new();
    for value in values {
        encode_field(value, &mut out);
    }
    out
}
