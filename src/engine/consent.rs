// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consents and consent tokens.
//!
//! The consent key `consent(d,t,o)` is held by owner and target. While the
//! consent grants read or write, `consent(d,t,o) → datatype(d,o)` lets the
//! target reach the owner's data key.

use serde_json::json;

use super::datatypes::DatatypeEngine;
use super::enrollment::EnrollmentEngine;
use super::logs::LogEngine;
use super::TxContext;
use crate::assets::index::CONSENTS;
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::{decode_b64, encode_b64, parse_sym_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::shared_asset_paths;
use crate::keygraph::ids;
use crate::models::{
    Access, Consent, ConsentRequest, ConsentToken, ConsentValidation, EnrollmentStatus,
    LogContext, LogScope, PrincipalRole,
};

/// Default lifetime of a token for a consent without expiration.
const TOKEN_TTL_SECS: i64 = 86_400;

/// Whose data a consent covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentKind {
    /// A patient's data, granted to a service it is enrolled in.
    Patient,
    /// A service's own data, granted to another principal.
    Owner,
}

pub struct ConsentEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> ConsentEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    fn paths_for(&self, owner_id: &str, target_id: &str, key_id: &str) -> OmrResult<Option<Key>> {
        let holders = [
            self.ctx.principal_ref(owner_id)?,
            self.ctx.principal_ref(target_id)?,
        ];
        self.ctx
            .resolve(&shared_asset_paths(&self.ctx.caller.id, &holders, key_id))
    }

    /// `putConsentPatientData` / `putConsentOwnerData`.
    ///
    /// Repeating the current grant changes nothing.
    pub fn put(
        &self,
        mut consent: Consent,
        key_b64: Option<&str>,
        kind: ConsentKind,
    ) -> OmrResult<Consent> {
        let now = self.ctx.now();
        if consent.timestamp == 0 {
            consent.timestamp = now;
        } else {
            self.ctx.validate_timestamp(consent.timestamp, "consent timestamp")?;
        }
        if consent.owner_id == consent.target_id {
            return Err(OmrError::validation("consent owner and target must differ"));
        }
        consent.normalize_options();
        consent.validate_options()?;
        if consent.expiration != 0 && consent.expiration < now {
            return Err(OmrError::validation("consent expiration is in the past"));
        }

        let datatypes = DatatypeEngine::new(self.ctx);
        datatypes.require(&consent.datatype_id)?;
        let owner = self.ctx.require_principal(&consent.owner_id)?;
        let target = self.ctx.require_principal(&consent.target_id)?;
        let acting = self.ctx.act_as(&owner.id)?;

        let enrollment_key = match kind {
            ConsentKind::Patient => {
                if owner.role != PrincipalRole::Patient {
                    return Err(OmrError::validation(format!("{} is not a patient", owner.id)));
                }
                if target.role != PrincipalRole::Service {
                    return Err(OmrError::validation(format!("{} is not a service", target.id)));
                }
                let enrollments = EnrollmentEngine::new(self.ctx);
                if !enrollments.is_active(&owner.id, &target.id)? {
                    return Err(OmrError::state(format!(
                        "{} is not enrolled in {}",
                        owner.id, target.id
                    )));
                }
                if !target.has_datatype(&consent.datatype_id) {
                    return Err(OmrError::validation(format!(
                        "service {} does not use datatype {}",
                        target.id, consent.datatype_id
                    )));
                }
                let enrollment_id = ids::enrollment_asset(&owner.id, &target.id);
                Some(
                    enrollments
                        .key(&owner.id, &target.id)?
                        .ok_or_else(|| OmrError::denied(format!("enrollment {enrollment_id}")))?,
                )
            }
            ConsentKind::Owner => {
                if owner.role != PrincipalRole::Service {
                    return Err(OmrError::validation(format!("{} is not a service", owner.id)));
                }
                None
            }
        };

        let key_id = consent.key_id();
        let existing_key = self.ctx.key_from(&acting, &key_id)?;
        let existing = match &existing_key {
            Some(key) => self
                .ctx
                .load_record::<Consent>(&consent.id(), Some(key))?
                .filter(|(_, decrypted)| *decrypted)
                .map(|(record, _)| record),
            None => None,
        };
        if let Some(current) = &existing {
            if current.same_grant(&consent) {
                tracing::debug!(consent_id = %consent.id(), "consent unchanged");
                return Ok(current.clone());
            }
        }

        let key = match (existing_key, key_b64) {
            (Some(key), _) => key,
            (None, Some(b64)) => parse_sym_b64(key_id.clone(), b64)?,
            (None, None) => Key::generate_sym(key_id.clone())?,
        };
        if existing.is_some() {
            self.ctx.update_record(&consent, &key)?;
        } else {
            self.ctx.add_record(&consent, &key)?;
        }
        self.ctx.graph.add_edge(&acting.public_key()?, &key)?;
        self.ctx.graph.add_edge(&self.ctx.public_key_of(&target)?, &key)?;

        let datatype_key = datatypes.ensure_key(&consent.datatype_id, &owner.id, &acting.keypair)?;
        if consent.grants_any() {
            self.ctx.graph.add_edge(&key, &datatype_key)?;
        } else {
            self.ctx.graph.remove_edge(&key.id, &datatype_key.id)?;
        }

        tracing::info!(consent_id = %consent.id(), options = ?consent.option, "consent updated");
        let data = LogContext {
            owner: Some(owner.id.clone()),
            target: Some(target.id.clone()),
            service: (target.role == PrincipalRole::Service).then(|| target.id.clone()),
            datatype: Some(consent.datatype_id.clone()),
            details: json!({"option": consent.option, "expiration": consent.expiration}),
            ..Default::default()
        };
        let logs = LogEngine::new(self.ctx);
        match enrollment_key {
            Some(parent) => logs.emit(
                LogScope::Enrollment {
                    user_id: owner.id.clone(),
                    service_id: target.id.clone(),
                },
                &parent,
                "consent",
                data,
            )?,
            None => logs.emit_principal(&owner.id, &acting.keypair, "consent", data)?,
        };
        Ok(consent)
    }

    /// `getConsent`: `None` when absent or unreadable by the caller.
    pub fn get(
        &self,
        datatype_id: &str,
        target_id: &str,
        owner_id: &str,
    ) -> OmrResult<Option<Consent>> {
        if self.ctx.principal(owner_id)?.is_none() || self.ctx.principal(target_id)?.is_none() {
            return Ok(None);
        }
        let key_id = ids::consent(datatype_id, target_id, owner_id);
        let Some(key) = self.paths_for(owner_id, target_id, &key_id)? else {
            return Ok(None);
        };
        let asset_id = ids::consent_asset(owner_id, target_id, datatype_id);
        Ok(self
            .ctx
            .load_record::<Consent>(&asset_id, Some(&key))?
            .filter(|(_, decrypted)| *decrypted)
            .map(|(record, _)| record))
    }

    /// `getConsentsWithOwnerID`.
    pub fn by_owner(&self, owner_id: &str) -> OmrResult<Vec<Consent>> {
        self.list("by_owner", vec![json!(owner_id)])
    }

    /// `getConsentsWithTargetID`.
    pub fn by_target(&self, target_id: &str) -> OmrResult<Vec<Consent>> {
        self.list("by_target", vec![json!(target_id)])
    }

    /// `getConsents`: consents of one owner given to one service.
    pub fn between(&self, service_id: &str, owner_id: &str) -> OmrResult<Vec<Consent>> {
        self.list("by_target", vec![json!(service_id), json!(owner_id)])
    }

    fn list(&self, index: &str, prefix: Vec<serde_json::Value>) -> OmrResult<Vec<Consent>> {
        let resolver = |asset: &Asset| -> OmrResult<Option<Key>> {
            let public = Consent::convert_from_asset(asset)?;
            self.paths_for(&public.owner_id, &public.target_id, &asset.asset_key_id)
        };
        let query = AssetQuery::prefix(&CONSENTS, index, prefix);
        let page = self.ctx.assets.iter(&query, &resolver, None)?;
        page.assets.iter().map(Consent::convert_from_asset).collect()
    }

    /// Consent of `owner_id` to `target_id` governing `lineage[0]`: the one
    /// on the datatype itself, else on its nearest ancestor. Read through
    /// the target side.
    pub fn effective(
        &self,
        owner_id: &str,
        target_id: &str,
        lineage: &[String],
    ) -> OmrResult<Option<(Consent, Key)>> {
        let target = self.ctx.principal_ref(target_id)?;
        for datatype_id in lineage {
            let key_id = ids::consent(datatype_id, target_id, owner_id);
            let paths = shared_asset_paths(
                &self.ctx.caller.id,
                std::slice::from_ref(&target),
                &key_id,
            );
            let Some(key) = self.ctx.resolve(&paths)? else {
                continue;
            };
            let asset_id = ids::consent_asset(owner_id, target_id, datatype_id);
            if let Some((consent, true)) = self.ctx.load_record::<Consent>(&asset_id, Some(&key))? {
                return Ok(Some((consent, key)));
            }
        }
        Ok(None)
    }

    /// `validateConsent`: checks the target's consent and, when granted,
    /// issues a token redeemable for downloads. An expired consent loses
    /// its edge to the datatype key here.
    pub fn validate(
        &self,
        owner_id: &str,
        target_id: &str,
        datatype_id: &str,
        access: Access,
        timestamp: i64,
    ) -> OmrResult<ConsentValidation> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        self.ctx.act_as(target_id)?;
        self.ctx.require_principal(owner_id)?;
        let lineage = DatatypeEngine::new(self.ctx).lineage(datatype_id)?;

        let denied = |message: String| ConsentValidation {
            permission_granted: false,
            message,
            token: None,
        };
        let Some((consent, key)) = self.effective(owner_id, target_id, &lineage)? else {
            return Ok(denied(format!("no consent from {owner_id} for {datatype_id}")));
        };

        let now = self.ctx.now();
        if consent.is_expired(now) {
            let datatype_key = ids::datatype(&consent.datatype_id, owner_id);
            if self.ctx.graph.remove_edge(&key.id, &datatype_key)? {
                tracing::info!(consent_id = %consent.id(), "expired consent edge removed");
            }
            return Ok(denied("consent expired".to_string()));
        }
        if !consent.allows(access, now) {
            return Ok(denied(format!("consent does not allow {access:?}").to_lowercase()));
        }

        let token = ConsentToken {
            owner_id: owner_id.to_string(),
            target_id: target_id.to_string(),
            datatype_id: consent.datatype_id.clone(),
            consent_key: key.material_b64(),
            expiry: if consent.expiration != 0 {
                consent.expiration
            } else {
                now + TOKEN_TTL_SECS
            },
        };
        Ok(ConsentValidation {
            permission_granted: true,
            message: "permission granted".to_string(),
            token: Some(self.seal_token(&token)?),
        })
    }

    fn token_key(&self) -> Key {
        Key::sym("token", self.ctx.config.token_secret.clone())
    }

    fn seal_token(&self, token: &ConsentToken) -> OmrResult<String> {
        let plain = serde_json::to_vec(token)?;
        Ok(encode_b64(&self.token_key().encrypt(&plain)?))
    }

    /// Open a token issued by [`Self::validate`]. Returns the token and the
    /// consent key it carries.
    pub fn redeem_token(&self, token_b64: &str) -> OmrResult<(ConsentToken, Key)> {
        let invalid = || OmrError::validation("invalid consent token");
        let sealed = decode_b64(token_b64).map_err(|_| invalid())?;
        let plain = self.token_key().decrypt(&sealed).map_err(|_| invalid())?;
        let token: ConsentToken = serde_json::from_slice(&plain).map_err(|_| invalid())?;
        if token.expiry < self.ctx.now() {
            return Err(OmrError::validation("consent token expired"));
        }
        let key = parse_sym_b64(
            ids::consent(&token.datatype_id, &token.target_id, &token.owner_id),
            &token.consent_key,
        )?;
        Ok((token, key))
    }

    /// `getConsentRequests`: the current option of every active patient of
    /// the service for each of its datatypes, empty when never consented.
    pub fn requests(
        &self,
        service_id: &str,
        user_id: Option<&str>,
    ) -> OmrResult<Vec<ConsentRequest>> {
        let service = self.ctx.require_principal(service_id)?;
        let acting = self.ctx.act_as(service_id)?;
        let enrollments = EnrollmentEngine::new(self.ctx)
            .by_service(service_id, Some(EnrollmentStatus::Active))?;

        let mut out = Vec::new();
        for enrollment in enrollments {
            if user_id.is_some_and(|u| u != enrollment.user_id) {
                continue;
            }
            for datatype_id in &service.datatypes {
                let key_id = ids::consent(datatype_id, service_id, &enrollment.user_id);
                let current = match self.ctx.key_from(&acting, &key_id)? {
                    Some(key) => self
                        .ctx
                        .load_record::<Consent>(
                            &ids::consent_asset(&enrollment.user_id, service_id, datatype_id),
                            Some(&key),
                        )?
                        .filter(|(_, decrypted)| *decrypted)
                        .map(|(record, _)| record),
                    None => None,
                };
                out.push(ConsentRequest {
                    user_id: enrollment.user_id.clone(),
                    service_id: service_id.to_string(),
                    datatype_id: datatype_id.clone(),
                    option: current.as_ref().map(|c| c.option.clone()).unwrap_or_default(),
                    expiration: current.map(|c| c.expiration).unwrap_or(0),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::enrollment::tests::enroll;
    use crate::engine::principals::tests::{org_with_service, register_self};
    use crate::engine::testing::{Fixture, NOW};
    use crate::engine::Caller;
    use crate::engine::data::{DataEngine, DataRange};
    use crate::models::{ConsentOption, DataKind, DataRecord, Datatype};

    pub(crate) fn consent(
        owner: &str,
        target: &str,
        datatype: &str,
        option: Vec<ConsentOption>,
        expiration: i64,
    ) -> Consent {
        Consent {
            owner_id: owner.into(),
            target_id: target.into(),
            datatype_id: datatype.into(),
            option,
            expiration,
            timestamp: NOW,
        }
    }

    /// alice administers org1/svc1 (heart); pat1 is enrolled in svc1.
    pub(crate) fn enrolled_patient(fx: &Fixture) -> (Caller, Caller) {
        let admin = register_self(fx, "alice", PrincipalRole::Patient);
        let pat = register_self(fx, "pat1", PrincipalRole::Patient);
        org_with_service(fx, &admin, "org1", "svc1", &["heart"]);
        enroll(fx, &admin, "pat1", "svc1");
        (admin, pat)
    }

    fn put(fx: &Fixture, who: &Caller, c: Consent) -> OmrResult<Consent> {
        fx.run(who, |ctx| ConsentEngine::new(ctx).put(c, None, ConsentKind::Patient))
    }

    /// pat1's consent to svc1 on heart.
    fn heart(option: Vec<ConsentOption>, expiration: i64) -> Consent {
        consent("pat1", "svc1", "heart", option, expiration)
    }

    fn check(fx: &Fixture, who: &Caller, access: Access) -> OmrResult<ConsentValidation> {
        fx.run(who, |ctx| {
            ConsentEngine::new(ctx).validate("pat1", "svc1", "heart", access, NOW)
        })
    }

    #[test]
    fn grant_and_deny_toggle_datatype_edge() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let edge = |fx: &Fixture| {
            fx.run(&pat, |ctx| {
                ctx.graph
                    .edge_exists("consent(heart,svc1,pat1)", "datatype(heart,pat1)")
            })
            .unwrap()
        };

        let read_write = vec![ConsentOption::Read, ConsentOption::Write];
        put(&fx, &pat, heart(read_write, 0)).unwrap();
        assert!(edge(&fx));
        put(&fx, &pat, heart(vec![ConsentOption::Deny], 0)).unwrap();
        assert!(!edge(&fx));

        let stored = fx
            .run(&pat, |ctx| ConsentEngine::new(ctx).get("heart", "svc1", "pat1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.option, vec![ConsentOption::Deny]);
    }

    #[test]
    fn repeated_grant_writes_nothing() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let grant = consent("pat1", "svc1", "heart", vec![ConsentOption::Read], 0);
        put(&fx, &pat, grant.clone()).unwrap();

        let logs_before = fx
            .run(&pat, |ctx| LogEngine::new(ctx).get_logs(&crate::models::LogQuery::default()))
            .unwrap()
            .len();
        put(&fx, &pat, grant).unwrap();
        let logs_after = fx
            .run(&pat, |ctx| LogEngine::new(ctx).get_logs(&crate::models::LogQuery::default()))
            .unwrap()
            .len();
        assert_eq!(logs_before, logs_after);
    }

    #[test]
    fn scattered_duplicate_options_collapse() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let options = vec![ConsentOption::Read, ConsentOption::Write, ConsentOption::Read];
        let stored = put(&fx, &pat, consent("pat1", "svc1", "heart", options, 0)).unwrap();
        assert_eq!(stored.option, vec![ConsentOption::Read, ConsentOption::Write]);

        let count = |fx: &Fixture| {
            fx.run(&pat, |ctx| {
                LogEngine::new(ctx).get_logs(&crate::models::LogQuery::default())
            })
            .unwrap()
            .len()
        };
        let before = count(&fx);
        let reordered = vec![ConsentOption::Write, ConsentOption::Read];
        put(&fx, &pat, consent("pat1", "svc1", "heart", reordered, 0)).unwrap();
        assert_eq!(count(&fx), before);
    }

    #[test]
    fn expired_consent_loses_datatype_edge() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        let edge = |fx: &Fixture| {
            fx.run(&pat, |ctx| {
                ctx.graph
                    .edge_exists("consent(heart,svc1,pat1)", "datatype(heart,pat1)")
            })
            .unwrap()
        };
        let read = vec![ConsentOption::Read];
        put(&fx, &pat, consent("pat1", "svc1", "heart", read, NOW + 10)).unwrap();
        assert!(edge(&fx));

        let later = NOW + 20;
        let checked = fx
            .run_at(&admin, later, |ctx| {
                ConsentEngine::new(ctx).validate("pat1", "svc1", "heart", Access::Read, later)
            })
            .unwrap();
        assert!(!checked.permission_granted);
        assert_eq!(checked.message, "consent expired");
        assert!(checked.token.is_none());
        assert!(!edge(&fx));
    }

    #[test]
    fn parent_consent_covers_child_datatype() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        fx.run(&admin, |ctx| {
            DatatypeEngine::new(ctx).register(Datatype {
                datatype_id: "heart.rate".into(),
                description: String::new(),
                parent_datatype_id: Some("heart".into()),
                owner_id: String::new(),
            })
        })
        .unwrap();
        put(&fx, &pat, consent("pat1", "svc1", "heart", vec![ConsentOption::Read], 0)).unwrap();

        let k = encode_b64(&[7u8; 32]);
        let record = DataRecord {
            owner_id: "pat1".into(),
            datatype_id: "heart.rate".into(),
            timestamp: NOW,
            service_id: Some("svc1".into()),
            uploaded_by: String::new(),
            source_timestamp: None,
            data: json!({"bpm": 64}),
        };
        fx.run(&pat, |ctx| DataEngine::new(ctx).upload(record, Some(&k), DataKind::User))
            .unwrap();

        let checked = fx
            .run(&admin, |ctx| {
                ConsentEngine::new(ctx).validate("pat1", "svc1", "heart.rate", Access::Read, NOW)
            })
            .unwrap();
        assert!(checked.permission_granted);

        let rows = fx
            .run(&admin, |ctx| {
                DataEngine::new(ctx).download_user(
                    "svc1",
                    "pat1",
                    "heart.rate",
                    DataRange::default(),
                    NOW,
                )
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, json!({"bpm": 64}));
    }

    #[test]
    fn put_validates_inputs() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);

        let empty = put(&fx, &pat, consent("pat1", "svc1", "heart", vec![], 0)).unwrap_err();
        assert_eq!(empty.to_string(), "invalid consent option");
        let read = || vec![ConsentOption::Read];
        let same = put(&fx, &pat, consent("pat1", "pat1", "heart", read(), 0)).unwrap_err();
        assert!(matches!(same, OmrError::Validation(_)));
        let missing = put(&fx, &pat, consent("pat1", "svc1", "lungs", read(), 0)).unwrap_err();
        assert!(matches!(missing, OmrError::NotFound(_)));
        let past = put(&fx, &pat, heart(read(), NOW - 1)).unwrap_err();
        assert!(matches!(past, OmrError::Validation(_)));

        let mut skewed = consent("pat1", "svc1", "heart", vec![ConsentOption::Read], 0);
        skewed.timestamp = NOW + 601;
        let err = put(&fx, &pat, skewed).unwrap_err();
        assert_eq!(err.to_string(), "Invalid consent timestamp, not within possible time range");
    }

    #[test]
    fn validate_issues_redeemable_token() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        put(&fx, &pat, consent("pat1", "svc1", "heart", vec![ConsentOption::Read], 0)).unwrap();

        let granted = check(&fx, &admin, Access::Read).unwrap();
        assert!(granted.permission_granted);
        let write = check(&fx, &admin, Access::Write).unwrap();
        assert!(!write.permission_granted);

        let token = granted.token.unwrap();
        let (opened, key) = fx
            .run(&admin, |ctx| ConsentEngine::new(ctx).redeem_token(&token))
            .unwrap();
        assert_eq!(opened.expiry, NOW + TOKEN_TTL_SECS);
        assert_eq!(key.id, "consent(heart,svc1,pat1)");

        let forged = fx.run(&admin, |ctx| ConsentEngine::new(ctx).redeem_token("AAAA"));
        assert!(matches!(forged, Err(OmrError::Validation(_))));
    }

    #[test]
    fn validate_requires_acting_as_target() {
        let fx = Fixture::new();
        let (_, pat) = enrolled_patient(&fx);
        let err = check(&fx, &pat, Access::Read).unwrap_err();
        assert!(matches!(err, OmrError::PermissionDenied(_)));
    }

    #[test]
    fn requests_list_every_datatype_of_active_patients() {
        let fx = Fixture::new();
        let (admin, pat) = enrolled_patient(&fx);
        let before = fx
            .run(&admin, |ctx| ConsentEngine::new(ctx).requests("svc1", None))
            .unwrap();
        assert_eq!(before.len(), 1);
        assert!(before[0].option.is_empty());

        put(&fx, &pat, consent("pat1", "svc1", "heart", vec![ConsentOption::Write], 0)).unwrap();
        let after = fx
            .run(&admin, |ctx| ConsentEngine::new(ctx).requests("svc1", Some("pat1")))
            .unwrap();
        assert_eq!(after[0].option, vec![ConsentOption::Write]);

        let listed = fx
            .run(&admin, |ctx| ConsentEngine::new(ctx).by_target("svc1"))
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].option, vec![ConsentOption::Write]);
    }
}
