// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use serde::{Deserialize, Serialize};

use crate::assets::index::{TableDef, AUDIT_PERMISSIONS};
use crate::assets::AssetRecord;
use crate::keygraph::ids;

/// Grants an auditor the log key of a service while active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPermission {
    #[serde(alias = "auditor")]
    pub auditor_id: String,
    #[serde(alias = "service")]
    pub service_id: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub timestamp: i64,
}

impl AuditPermission {
    pub fn id(&self) -> String {
        ids::audit_permission_asset(&self.auditor_id, &self.service_id)
    }
}

impl AssetRecord for AuditPermission {
    const TABLE: &'static TableDef = &AUDIT_PERMISSIONS;

    fn asset_id(&self) -> String {
        self.id()
    }

    fn asset_key_id(&self) -> String {
        ids::sym(&self.id())
    }

    fn owner_ids(&self) -> Vec<String> {
        vec![self.service_id.clone()]
    }
}
