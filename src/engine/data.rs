// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Data upload and download.
//!
//! Records of `(owner, datatype)` are encrypted under `datakey(d,o)`, which
//! hangs off `datatype(d,o)`. Every upload also rewrites the `-1` alias so
//! it mirrors the record with the largest timestamp.
//!
//! Downloads never fail for lack of consent: an unreachable data key
//! yields an empty result.

use serde::Serialize;
use serde_json::json;

use super::consent::ConsentEngine;
use super::contract::ContractEngine;
use super::datatypes::DatatypeEngine;
use super::enrollment::EnrollmentEngine;
use super::logs::LogEngine;
use super::{EffectivePrincipal, TxContext};
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::{encode_b64, parse_sym_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::{datatype_paths, extend};
use crate::keygraph::{ids, PrincipalRef};
use crate::models::{
    Access, ContractState, DataKind, DataRecord, LogContext, LogScope, OwnerData, PrincipalRole,
    UserData, LATEST_TIMESTAMP,
};

const NEGATIVE_TIMESTAMP: &str = "Invalid timestamp, data timestamp must not be negative";

/// Selection shared by every download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataRange {
    /// Only the latest record, ignoring the bounds.
    pub latest_only: bool,
    pub start: i64,
    /// 0 means no upper bound.
    pub end: i64,
    /// 0 means the configured default.
    pub max_num: usize,
}

/// Result of `downloadOwnerDataAsRequester`.
#[derive(Debug, Clone, Serialize)]
pub struct RequesterDownload {
    /// Contract sealed under its own key, posted back to record the download.
    pub contract_snapshot: String,
    pub data: Vec<DataRecord>,
}

pub struct DataEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> DataEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    // ========== Storage helpers ==========

    fn load(
        &self,
        kind: DataKind,
        asset_id: &str,
        key: Option<&Key>,
    ) -> OmrResult<Option<(DataRecord, bool)>> {
        Ok(match kind {
            DataKind::User => self
                .ctx
                .load_record::<UserData>(asset_id, key)?
                .map(|(r, d)| (r.0, d)),
            DataKind::Owner => self
                .ctx
                .load_record::<OwnerData>(asset_id, key)?
                .map(|(r, d)| (r.0, d)),
        })
    }

    fn add(&self, kind: DataKind, record: DataRecord, key: &Key) -> OmrResult<()> {
        match kind {
            DataKind::User => self.ctx.add_record(&UserData(record), key),
            DataKind::Owner => self.ctx.add_record(&OwnerData(record), key),
        }
    }

    fn update(&self, kind: DataKind, record: DataRecord, key: &Key) -> OmrResult<()> {
        match kind {
            DataKind::User => self.ctx.update_record(&UserData(record), key),
            DataKind::Owner => self.ctx.update_record(&OwnerData(record), key),
        }
    }

    fn convert(kind: DataKind, asset: &Asset) -> OmrResult<DataRecord> {
        Ok(match kind {
            DataKind::User => UserData::convert_from_asset(asset)?.0,
            DataKind::Owner => OwnerData::convert_from_asset(asset)?.0,
        })
    }

    /// Point the alias at `record` unless it already mirrors a newer one.
    fn refresh_alias(&self, kind: DataKind, record: &DataRecord, key: &Key) -> OmrResult<()> {
        let alias_id = kind.asset_id(&record.owner_id, &record.datatype_id, LATEST_TIMESTAMP);
        match self.load(kind, &alias_id, None)? {
            None => self.add(kind, record.to_alias(), key),
            Some((alias, _)) if alias.source_timestamp.is_none_or(|ts| record.timestamp >= ts) => {
                self.update(kind, record.to_alias(), key)
            }
            Some(_) => Ok(()),
        }
    }

    /// Records of `(owner, datatype)` readable with `key`.
    fn read(
        &self,
        kind: DataKind,
        owner_id: &str,
        datatype_id: &str,
        key: &Key,
        range: DataRange,
    ) -> OmrResult<Vec<DataRecord>> {
        if range.latest_only {
            let alias_id = kind.asset_id(owner_id, datatype_id, LATEST_TIMESTAMP);
            return Ok(match self.load(kind, &alias_id, Some(key))? {
                Some((alias, true)) => vec![alias.into_view()],
                _ => Vec::new(),
            });
        }

        let end = if range.end == 0 { i64::MAX } else { range.end };
        let query = AssetQuery {
            start: vec![json!(owner_id), json!(datatype_id), json!(range.start.max(0))],
            end: vec![json!(owner_id), json!(datatype_id), json!(end)],
            ..AssetQuery::prefix(kind.table(), "by_owner", Vec::new())
        }
        .descending()
        .limit(self.ctx.config.max_num(range.max_num));
        let resolver = |_: &Asset| -> OmrResult<Option<Key>> { Ok(Some(key.clone())) };
        let page = self.ctx.assets.iter(&query, &resolver, None)?;
        page.assets.iter().map(|a| Self::convert(kind, a)).collect()
    }

    /// `datakey(d,o)` reached on behalf of `target`, through the owner's own
    /// chain, a consent or a contract grant.
    fn data_key_via(
        &self,
        target: &PrincipalRef,
        owner_id: &str,
        lineage: &[String],
    ) -> OmrResult<Option<Key>> {
        let data_key_id = ids::datakey(&lineage[0], owner_id);
        self.ctx.resolve(&extend(
            datatype_paths(&self.ctx.caller.id, target, owner_id, lineage),
            &[data_key_id],
        ))
    }

    // ========== Upload ==========

    /// `uploadUserData` / `uploadOwnerData`.
    ///
    /// The first upload of `(owner, datatype)` needs `data_key_b64`; later
    /// uploads reuse the data key already linked to the datatype key.
    pub fn upload(
        &self,
        mut record: DataRecord,
        data_key_b64: Option<&str>,
        kind: DataKind,
    ) -> OmrResult<DataRecord> {
        if record.timestamp < 0 {
            return Err(OmrError::validation(NEGATIVE_TIMESTAMP));
        }
        self.ctx.validate_timestamp(record.timestamp, "timestamp")?;
        let datatypes = DatatypeEngine::new(self.ctx);
        let lineage = datatypes.lineage(&record.datatype_id)?;
        let owner = self.ctx.require_principal(&record.owner_id)?;
        record.uploaded_by = self.ctx.caller.id.clone();
        record.source_timestamp = None;

        // Datatype key and the principal whose scope records the upload.
        let (datatype_key, acting) = match kind {
            DataKind::User => {
                if owner.role != PrincipalRole::Patient {
                    return Err(OmrError::validation(format!("{} is not a patient", owner.id)));
                }
                match self.ctx.try_act_as(&owner.id)? {
                    Some(acting) => {
                        let key = datatypes.ensure_key(
                            &record.datatype_id,
                            &owner.id,
                            &acting.keypair,
                        )?;
                        (key, acting)
                    }
                    None => self.service_datatype_key(&record, &lineage)?,
                }
            }
            DataKind::Owner => {
                if owner.role != PrincipalRole::Service {
                    return Err(OmrError::validation(format!("{} is not a service", owner.id)));
                }
                let acting = self.ctx.act_as(&owner.id)?;
                let key = datatypes.ensure_key(&record.datatype_id, &owner.id, &acting.keypair)?;
                (key, acting)
            }
        };

        let data_key_id = record.data_key_id();
        let data_key = match self
            .ctx
            .graph
            .traverse(&datatype_key, &[datatype_key.id.clone(), data_key_id.clone()])?
        {
            Some(key) => key,
            None => {
                let b64 = data_key_b64
                    .ok_or_else(|| OmrError::validation("data key required for first upload"))?;
                let key = parse_sym_b64(data_key_id.clone(), b64)?;
                self.ctx.graph.add_edge(&datatype_key, &key)?;
                key
            }
        };

        let asset_id = kind.asset_id(&record.owner_id, &record.datatype_id, record.timestamp);
        if self.ctx.assets.exists(kind.table().namespace, &asset_id)? {
            return Err(OmrError::state(format!("data record {asset_id} already exists")));
        }
        self.add(kind, record.clone(), &data_key)?;
        self.refresh_alias(kind, &record, &data_key)?;
        tracing::info!(%asset_id, uploaded_by = %record.uploaded_by, "data uploaded");

        let service = match kind {
            DataKind::User => record.service_id.clone(),
            DataKind::Owner => Some(owner.id.clone()),
        };
        let data = LogContext {
            owner: Some(owner.id.clone()),
            user: (kind == DataKind::User).then(|| owner.id.clone()),
            service: service.clone(),
            datatype: Some(record.datatype_id.clone()),
            details: json!({"timestamp": record.timestamp, "kind": kind.prefix()}),
            ..Default::default()
        };
        let enrollment_key = match (kind, service.as_deref()) {
            (DataKind::User, Some(service_id)) => self.enrollment_key(&owner.id, service_id)?,
            _ => None,
        };
        let logs = LogEngine::new(self.ctx);
        match (enrollment_key, service) {
            (Some(parent), Some(service_id)) => logs.emit(
                LogScope::Enrollment {
                    user_id: owner.id.clone(),
                    service_id,
                },
                &parent,
                "data",
                data,
            )?,
            _ => logs.emit_principal(&acting.id, &acting.keypair, "data", data)?,
        };
        Ok(record)
    }

    fn enrollment_key(&self, user_id: &str, service_id: &str) -> OmrResult<Option<Key>> {
        let enrollments = EnrollmentEngine::new(self.ctx);
        if enrollments.get(user_id, service_id)?.is_none() {
            return Ok(None);
        }
        enrollments.key(user_id, service_id)
    }

    /// Datatype key of a patient reached by a service holding a write consent.
    fn service_datatype_key(
        &self,
        record: &DataRecord,
        lineage: &[String],
    ) -> OmrResult<(Key, EffectivePrincipal)> {
        let service_id = record
            .service_id
            .as_deref()
            .ok_or_else(|| OmrError::denied(format!("data of {}", record.owner_id)))?;
        let acting = self.ctx.act_as(service_id)?;
        if !EnrollmentEngine::new(self.ctx).is_active(&record.owner_id, service_id)? {
            return Err(OmrError::state(format!(
                "{} is not enrolled in {service_id}",
                record.owner_id
            )));
        }
        let writable = ConsentEngine::new(self.ctx)
            .effective(&record.owner_id, service_id, lineage)?
            .is_some_and(|(consent, _)| consent.allows(Access::Write, self.ctx.now()));
        if !writable {
            return Err(OmrError::denied(format!(
                "{} data of {}",
                record.datatype_id, record.owner_id
            )));
        }
        let target = self.ctx.principal_ref(service_id)?;
        let paths = datatype_paths(&self.ctx.caller.id, &target, &record.owner_id, lineage);
        let key_id = ids::datatype(&record.datatype_id, &record.owner_id);
        let key = self
            .ctx
            .resolve(&paths)?
            .ok_or_else(|| OmrError::denied(format!("key {key_id}")))?;
        Ok((key, acting))
    }

    // ========== Download ==========

    /// `downloadUserData`: the patient and its admins read directly, a
    /// service reads through a read consent.
    pub fn download_user(
        &self,
        service_id: &str,
        user_id: &str,
        datatype_id: &str,
        range: DataRange,
        timestamp: i64,
    ) -> OmrResult<Vec<DataRecord>> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        let lineage = DatatypeEngine::new(self.ctx).lineage(datatype_id)?;
        let user = self.ctx.principal_ref(user_id)?;

        let key = if self.ctx.try_act_as(user_id)?.is_some() {
            self.data_key_via(&user, user_id, &lineage)?
        } else {
            self.ctx.act_as(service_id)?;
            let readable = ConsentEngine::new(self.ctx)
                .effective(user_id, service_id, &lineage)?
                .is_some_and(|(consent, _)| consent.allows(Access::Read, self.ctx.now()));
            if !readable {
                tracing::debug!(user_id, service_id, datatype_id, "no read consent");
                return Ok(Vec::new());
            }
            self.data_key_via(&self.ctx.principal_ref(service_id)?, user_id, &lineage)?
        };
        match key {
            Some(key) => self.read(DataKind::User, user_id, datatype_id, &key, range),
            None => Ok(Vec::new()),
        }
    }

    /// `downloadUserDataConsentToken` / `downloadOwnerDataConsentToken`.
    pub fn download_with_token(
        &self,
        token_b64: &str,
        kind: DataKind,
        range: DataRange,
        timestamp: i64,
    ) -> OmrResult<Vec<DataRecord>> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        let (token, consent_key) = ConsentEngine::new(self.ctx).redeem_token(token_b64)?;
        let path = vec![
            consent_key.id.clone(),
            ids::datatype(&token.datatype_id, &token.owner_id),
            ids::datakey(&token.datatype_id, &token.owner_id),
        ];
        match self.ctx.graph.traverse(&consent_key, &path)? {
            Some(key) => self.read(kind, &token.owner_id, &token.datatype_id, &key, range),
            None => Ok(Vec::new()),
        }
    }

    /// `deleteUserData`: removes one record and re-points the alias.
    pub fn delete_user(
        &self,
        user_id: &str,
        datatype_id: &str,
        record_timestamp: i64,
        timestamp: i64,
    ) -> OmrResult<DataRecord> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        if record_timestamp < 0 {
            return Err(OmrError::validation(NEGATIVE_TIMESTAMP));
        }
        let acting = self.ctx.act_as(user_id)?;
        let lineage = DatatypeEngine::new(self.ctx).lineage(datatype_id)?;
        let key = self
            .data_key_via(&self.ctx.principal_ref(user_id)?, user_id, &lineage)?
            .ok_or_else(|| {
                OmrError::denied(format!("key {}", ids::datakey(datatype_id, user_id)))
            })?;

        let kind = DataKind::User;
        let asset_id = kind.asset_id(user_id, datatype_id, record_timestamp);
        let (record, _) = self
            .load(kind, &asset_id, Some(&key))?
            .ok_or_else(|| OmrError::not_found(format!("data record {asset_id}")))?;
        self.ctx.assets.delete(kind.table().namespace, &asset_id)?;

        let alias_id = kind.asset_id(user_id, datatype_id, LATEST_TIMESTAMP);
        if let Some((alias, _)) = self.load(kind, &alias_id, None)? {
            if alias.source_timestamp == Some(record_timestamp) {
                let newest = self.read(
                    kind,
                    user_id,
                    datatype_id,
                    &key,
                    DataRange {
                        max_num: 1,
                        ..Default::default()
                    },
                )?;
                match newest.first() {
                    Some(next) => self.update(kind, next.to_alias(), &key)?,
                    None => {
                        self.ctx.assets.delete(kind.table().namespace, &alias_id)?;
                    }
                }
            }
        }
        tracing::info!(%asset_id, "data deleted");

        LogEngine::new(self.ctx).emit_principal(
            &acting.id,
            &acting.keypair,
            "data",
            LogContext {
                owner: Some(user_id.to_string()),
                user: Some(user_id.to_string()),
                datatype: Some(datatype_id.to_string()),
                details: json!({"deleted": record_timestamp}),
                ..Default::default()
            },
        )?;
        Ok(record)
    }

    /// `downloadOwnerDataAsOwner`.
    pub fn download_owner(
        &self,
        service_id: &str,
        datatype_id: &str,
        range: DataRange,
        timestamp: i64,
    ) -> OmrResult<Vec<DataRecord>> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        self.ctx.act_as(service_id)?;
        let lineage = DatatypeEngine::new(self.ctx).lineage(datatype_id)?;
        match self.data_key_via(&self.ctx.principal_ref(service_id)?, service_id, &lineage)? {
            Some(key) => self.read(DataKind::Owner, service_id, datatype_id, &key, range),
            None => Ok(Vec::new()),
        }
    }

    /// `downloadOwnerDataWithConsent`.
    pub fn download_owner_with_consent(
        &self,
        target_service_id: &str,
        owner_service_id: &str,
        datatype_id: &str,
        range: DataRange,
        timestamp: i64,
    ) -> OmrResult<Vec<DataRecord>> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        self.ctx.act_as(target_service_id)?;
        self.ctx.require_principal(owner_service_id)?;
        let lineage = DatatypeEngine::new(self.ctx).lineage(datatype_id)?;
        let readable = ConsentEngine::new(self.ctx)
            .effective(owner_service_id, target_service_id, &lineage)?
            .is_some_and(|(consent, _)| consent.allows(Access::Read, self.ctx.now()));
        if !readable {
            return Ok(Vec::new());
        }
        let target = self.ctx.principal_ref(target_service_id)?;
        match self.data_key_via(&target, owner_service_id, &lineage)? {
            Some(key) => self.read(DataKind::Owner, owner_service_id, datatype_id, &key, range),
            None => Ok(Vec::new()),
        }
    }

    /// `downloadOwnerDataAsRequester`: data granted by a contract, with a
    /// snapshot the requester posts back through `addContractDetailDownload`.
    pub fn download_owner_as_requester(
        &self,
        contract_id: &str,
        datatype_id: &str,
        range: DataRange,
        timestamp: i64,
    ) -> OmrResult<RequesterDownload> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        let (contract, contract_key) = ContractEngine::new(self.ctx).open(contract_id)?;
        self.ctx.act_as(&contract.requester_service)?;

        if contract.state == ContractState::DownloadDone {
            return Ok(RequesterDownload {
                contract_snapshot: String::new(),
                data: Vec::new(),
            });
        }
        if contract.state != ContractState::DownloadReady
            || contract.num_download >= contract.max_num_download
        {
            return Err(OmrError::state(format!(
                "contract {contract_id} is not ready for download in state {}",
                contract.state
            )));
        }
        if !contract.permitted_datatypes.iter().any(|d| d == datatype_id) {
            return Err(OmrError::denied(format!(
                "datatype {datatype_id} of contract {contract_id}"
            )));
        }

        let lineage = DatatypeEngine::new(self.ctx).lineage(datatype_id)?;
        let requester = self.ctx.principal_ref(&contract.requester_service)?;
        let data = match self.data_key_via(&requester, &contract.owner_service, &lineage)? {
            Some(key) => {
                self.read(DataKind::Owner, &contract.owner_service, datatype_id, &key, range)?
            }
            None => Vec::new(),
        };
        let snapshot = contract_key.encrypt(&serde_json::to_vec(&contract)?)?;
        Ok(RequesterDownload {
            contract_snapshot: encode_b64(&snapshot),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::consent::tests::{consent, enrolled_patient};
    use crate::engine::consent::ConsentKind;
    use crate::engine::testing::{Fixture, NOW};
    use crate::engine::Caller;
    use crate::models::ConsentOption;

    fn record(owner: &str, service: Option<&str>, datatype: &str, ts: i64, bpm: i64) -> DataRecord {
        DataRecord {
            owner_id: owner.into(),
            datatype_id: datatype.into(),
            timestamp: ts,
            service_id: service.map(str::to_string),
            uploaded_by: String::new(),
            source_timestamp: None,
            data: json!({"bpm": bpm}),
        }
    }

    fn data_key() -> String {
        encode_b64(&[9u8; 32])
    }

    fn all() -> DataRange {
        DataRange::default()
    }

    fn latest() -> DataRange {
        DataRange {
            latest_only: true,
            ..Default::default()
        }
    }

    fn grant(fx: &Fixture, pat: &Caller, option: Vec<ConsentOption>) {
        fx.run(pat, |ctx| {
            let heart = consent("pat1", "svc1", "heart", option, 0);
            ConsentEngine::new(ctx).put(heart, None, ConsentKind::Patient)
        })
        .unwrap();
    }

    /// pat1's heart record at `ts`, uploaded by `who`.
    fn upload_heart(
        fx: &Fixture,
        who: &Caller,
        service: Option<&str>,
        ts: i64,
        bpm: i64,
        key: Option<&str>,
    ) -> OmrResult<DataRecord> {
        let rec = record("pat1", service, "heart", ts, bpm);
        fx.run(who, |ctx| DataEngine::new(ctx).upload(rec, key, DataKind::User))
    }

    /// pat1's heart records as read by `who` on behalf of svc1.
    fn heart_records(fx: &Fixture, who: &Caller, range: DataRange) -> Vec<DataRecord> {
        fx.run(who, |ctx| {
            DataEngine::new(ctx).download_user("svc1", "pat1", "heart", range, NOW)
        })
        .unwrap()
    }

    #[test]
    fn first_upload_needs_data_key() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let err = upload_heart(&fx, &pat, Some("svc1"), NOW, 70, None).unwrap_err();
        assert_eq!(err.to_string(), "data key required for first upload");

        let k = data_key();
        upload_heart(&fx, &pat, Some("svc1"), NOW, 70, Some(&k)).unwrap();
        upload_heart(&fx, &pat, Some("svc1"), NOW - 10, 60, None).unwrap();

        let dup = upload_heart(&fx, &pat, Some("svc1"), NOW, 71, None);
        assert!(matches!(dup, Err(OmrError::State(_))));
    }

    #[test]
    fn alias_tracks_largest_timestamp() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let k = data_key();
        fx.run(&pat, |ctx| {
            let data = DataEngine::new(ctx);
            data.upload(record("pat1", None, "heart", NOW, 70), Some(&k), DataKind::User)?;
            data.upload(record("pat1", None, "heart", NOW - 30, 50), None, DataKind::User)?;
            Ok(())
        })
        .unwrap();

        let newest = heart_records(&fx, &pat, latest());
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].timestamp, NOW);
        assert_eq!(newest[0].data, json!({"bpm": 70}));

        let every = heart_records(&fx, &pat, all());
        let stamps: Vec<_> = every.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![NOW, NOW - 30]);

        fx.run(&pat, |ctx| DataEngine::new(ctx).delete_user("pat1", "heart", NOW, NOW))
            .unwrap();
        let after = heart_records(&fx, &pat, latest());
        assert_eq!(after[0].timestamp, NOW - 30);
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let k = data_key();
        let err = upload_heart(&fx, &pat, None, LATEST_TIMESTAMP, 1, Some(&k)).unwrap_err();
        assert!(matches!(err, OmrError::Validation(_)));
    }

    #[test]
    fn service_reads_only_with_consent() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        let k = data_key();
        upload_heart(&fx, &pat, Some("svc1"), NOW, 72, Some(&k)).unwrap();

        assert!(heart_records(&fx, &admin, all()).is_empty());

        grant(&fx, &pat, vec![ConsentOption::Read]);
        assert_eq!(heart_records(&fx, &admin, all()).len(), 1);

        grant(&fx, &pat, vec![ConsentOption::Deny]);
        assert!(heart_records(&fx, &admin, all()).is_empty());
    }

    #[test]
    fn service_uploads_with_write_consent() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        let k = data_key();
        let upload = |fx: &Fixture| upload_heart(fx, &admin, Some("svc1"), NOW, 80, Some(&k));
        assert!(matches!(upload(&fx), Err(OmrError::PermissionDenied(_))));

        grant(&fx, &pat, vec![ConsentOption::Write]);
        let stored = upload(&fx).unwrap();
        assert_eq!(stored.uploaded_by, "alice");

        assert_eq!(heart_records(&fx, &pat, all()).len(), 1);
    }

    #[test]
    fn token_download_follows_consent_edge() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        let k = data_key();
        upload_heart(&fx, &pat, None, NOW, 72, Some(&k)).unwrap();
        grant(&fx, &pat, vec![ConsentOption::Read]);

        let token = fx
            .run(&admin, |ctx| {
                ConsentEngine::new(ctx).validate("pat1", "svc1", "heart", Access::Read, NOW)
            })
            .unwrap()
            .token
            .unwrap();
        let stranger = Caller::generate("mallory").unwrap();
        let redeem = |fx: &Fixture| {
            fx.run(&stranger, |ctx| {
                DataEngine::new(ctx).download_with_token(&token, DataKind::User, all(), NOW)
            })
            .unwrap()
        };
        assert_eq!(redeem(&fx).len(), 1);

        grant(&fx, &pat, vec![ConsentOption::Deny]);
        assert!(redeem(&fx).is_empty());
    }

    #[test]
    fn owner_data_round_trip_for_service() {
        let fx = Fixture::new();
        let (admin, _) = enrolled_patient(&fx);
        let k = data_key();
        fx.run(&admin, |ctx| {
            let data = DataEngine::new(ctx);
            data.upload(record("svc1", None, "heart", NOW, 1), Some(&k), DataKind::Owner)?;
            data.upload(record("svc1", None, "heart", NOW + 1, 2), None, DataKind::Owner)?;
            let limited = data.download_owner(
                "svc1",
                "heart",
                DataRange {
                    max_num: 1,
                    ..Default::default()
                },
                NOW,
            )?;
            assert_eq!(limited.len(), 1);
            assert_eq!(limited[0].timestamp, NOW + 1);
            Ok(())
        })
        .unwrap();
    }
}
