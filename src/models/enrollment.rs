// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Patient ↔ service enrollments.

use serde::{Deserialize, Serialize};

use crate::assets::index::{TableDef, ENROLLMENTS};
use crate::assets::AssetRecord;
use crate::keygraph::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(alias = "user")]
    pub user_id: String,
    #[serde(alias = "service")]
    pub service_id: String,
    #[serde(default)]
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub enroll_date: i64,
}

impl Enrollment {
    pub fn id(&self) -> String {
        ids::enrollment_asset(&self.user_id, &self.service_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

impl AssetRecord for Enrollment {
    const TABLE: &'static TableDef = &ENROLLMENTS;

    fn asset_id(&self) -> String {
        self.id()
    }

    fn asset_key_id(&self) -> String {
        ids::sym(&self.id())
    }

    fn owner_ids(&self) -> Vec<String> {
        vec![self.user_id.clone(), self.service_id.clone()]
    }
}
