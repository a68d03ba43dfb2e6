// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Timestamped data payloads.
//!
//! Patient data (`UserData`) and service-owned data (`OwnerData`) share one
//! record shape and differ only in table and id prefix. Each
//! `(owner, datatype)` pair also has a latest alias stored under the
//! reserved timestamp `-1`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::index::{TableDef, OWNER_DATA, USER_DATA};
use crate::assets::AssetRecord;
use crate::keygraph::ids;

/// Timestamp reserved for the latest alias.
pub const LATEST_TIMESTAMP: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    User,
    Owner,
}

impl DataKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DataKind::User => "UserData",
            DataKind::Owner => "OwnerData",
        }
    }

    pub fn table(&self) -> &'static TableDef {
        match self {
            DataKind::User => &USER_DATA,
            DataKind::Owner => &OWNER_DATA,
        }
    }

    /// `{UserData|OwnerData}-{owner}-{datatype}-{timestamp}`.
    pub fn asset_id(&self, owner: &str, datatype: &str, timestamp: i64) -> String {
        format!("{}-{owner}-{datatype}-{timestamp}", self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    #[serde(alias = "owner")]
    pub owner_id: String,
    #[serde(alias = "datatype")]
    pub datatype_id: String,
    pub timestamp: i64,
    /// Service that produced patient data.
    #[serde(default, alias = "service", skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub uploaded_by: String,
    /// On the alias: timestamp of the record it mirrors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

impl DataRecord {
    pub fn data_key_id(&self) -> String {
        ids::datakey(&self.datatype_id, &self.owner_id)
    }

    /// Latest alias mirroring this record.
    pub fn to_alias(&self) -> DataRecord {
        DataRecord {
            timestamp: LATEST_TIMESTAMP,
            source_timestamp: Some(self.timestamp),
            ..self.clone()
        }
    }

    /// Record as returned to callers: the alias reports the mirrored timestamp.
    pub fn into_view(mut self) -> DataRecord {
        if let Some(source) = self.source_timestamp.take() {
            self.timestamp = source;
        }
        self
    }
}

macro_rules! data_asset {
    ($name:ident, $kind:expr, $table:expr) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub DataRecord);

        impl AssetRecord for $name {
            const TABLE: &'static TableDef = $table;
            const PRIVATE_FIELDS: &'static [&'static str] = &["data"];

            fn asset_id(&self) -> String {
                $kind.asset_id(&self.0.owner_id, &self.0.datatype_id, self.0.timestamp)
            }

            fn asset_key_id(&self) -> String {
                self.0.data_key_id()
            }

            fn owner_ids(&self) -> Vec<String> {
                vec![self.0.owner_id.clone()]
            }

            fn datatypes(&self) -> Vec<String> {
                vec![self.0.datatype_id.clone()]
            }
        }
    };
}

data_asset!(UserData, DataKind::User, &USER_DATA);
data_asset!(OwnerData, DataKind::Owner, &OWNER_DATA);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(ts: i64) -> DataRecord {
        serde_json::from_value(json!({
            "owner": "pat1", "datatype": "heart", "service": "svc1",
            "timestamp": ts, "data": {"bpm": 72}
        }))
        .unwrap()
    }

    #[test]
    fn canonical_ids() {
        let r = record(100);
        assert_eq!(UserData(r.clone()).asset_id(), "UserData-pat1-heart-100");
        assert_eq!(OwnerData(r.clone()).asset_id(), "OwnerData-pat1-heart-100");
        assert_eq!(UserData(r.to_alias()).asset_id(), "UserData-pat1-heart--1");
        assert_eq!(UserData(r).asset_key_id(), "datakey(heart,pat1)");
    }

    #[test]
    fn alias_view_reports_source_timestamp() {
        let alias = record(100).to_alias();
        assert_eq!(alias.timestamp, LATEST_TIMESTAMP);
        let view = alias.into_view();
        assert_eq!(view.timestamp, 100);
        assert_eq!(view.source_timestamp, None);
    }

    #[test]
    fn payload_is_private() {
        let asset = UserData(record(100)).convert_to_asset().unwrap();
        assert!(asset.public_data.get("data").is_none());
        assert_eq!(asset.public_data["timestamp"], json!(100));
        assert_eq!(asset.index_table.as_deref(), Some("user_data"));
    }
}
