// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Conversion between typed entities and generic assets.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::index::TableDef;
use super::{Asset, PrivateData};
use crate::error::OmrResult;

/// An entity persisted as an asset.
///
/// The public projection is the serialized entity minus
/// [`AssetRecord::PRIVATE_FIELDS`]; the private payload is the whole entity.
/// Private fields must deserialize with a default so that a record can be
/// rebuilt from public data alone.
pub trait AssetRecord: Serialize + DeserializeOwned {
    const TABLE: &'static TableDef;

    const PRIVATE_FIELDS: &'static [&'static str] = &[];

    fn asset_id(&self) -> String;

    fn asset_key_id(&self) -> String;

    fn owner_ids(&self) -> Vec<String>;

    fn datatypes(&self) -> Vec<String> {
        Vec::new()
    }

    /// `convertToAsset`.
    fn convert_to_asset(&self) -> OmrResult<Asset> {
        let full = serde_json::to_value(self)?;
        let mut public = full.clone();
        if let Value::Object(map) = &mut public {
            for field in Self::PRIVATE_FIELDS {
                map.remove(*field);
            }
        }
        Ok(Asset {
            asset_id: self.asset_id(),
            namespace: Self::TABLE.namespace.to_string(),
            owner_ids: self.owner_ids(),
            datatypes: self.datatypes(),
            public_data: public,
            private_data: PrivateData::Plain(full),
            asset_key_id: self.asset_key_id(),
            index_table: Some(Self::TABLE.name.to_string()),
            connection_id: None,
        })
    }

    /// `convertFromAsset`. Uses the private payload when it was decrypted.
    fn convert_from_asset(asset: &Asset) -> OmrResult<Self> {
        let source = match &asset.private_data {
            PrivateData::Plain(full) => full.clone(),
            PrivateData::Encrypted => asset.public_data.clone(),
        };
        Ok(serde_json::from_value(source)?)
    }
}
