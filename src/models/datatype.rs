// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Datatypes form a hierarchy through `parent_datatype_id`.

use serde::{Deserialize, Serialize};

use crate::assets::index::{TableDef, DATATYPES};
use crate::assets::AssetRecord;
use crate::keygraph::ids;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datatype {
    #[serde(alias = "id")]
    pub datatype_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "parent", skip_serializing_if = "Option::is_none")]
    pub parent_datatype_id: Option<String>,
    /// Principal that registered the datatype.
    #[serde(default)]
    pub owner_id: String,
}

impl AssetRecord for Datatype {
    const TABLE: &'static TableDef = &DATATYPES;

    fn asset_id(&self) -> String {
        self.datatype_id.clone()
    }

    fn asset_key_id(&self) -> String {
        ids::sym(&self.owner_id)
    }

    fn owner_ids(&self) -> Vec<String> {
        vec![self.owner_id.clone()]
    }
}
