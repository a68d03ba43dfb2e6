// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Patient enrollment in services.
//!
//! The enrollment key `sym(Enrollment-u-s)` is reachable from both the
//! patient and the service, and the service's log key links to the
//! enrollment log key so that service admins and auditors of the service
//! read the patient's activity under it.

use serde_json::json;

use super::logs::LogEngine;
use super::TxContext;
use crate::assets::index::ENROLLMENTS;
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::{parse_sym_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::shared_asset_paths;
use crate::keygraph::ids;
use crate::models::{Enrollment, EnrollmentStatus, LogContext, LogScope, PrincipalRole};

pub struct EnrollmentEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> EnrollmentEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    /// Public view of the enrollment of `user_id` in `service_id`.
    pub fn get(&self, user_id: &str, service_id: &str) -> OmrResult<Option<Enrollment>> {
        self.ctx
            .public_record::<Enrollment>(&ids::enrollment_asset(user_id, service_id))
    }

    pub fn is_active(&self, user_id: &str, service_id: &str) -> OmrResult<bool> {
        Ok(self
            .get(user_id, service_id)?
            .is_some_and(|e| e.is_active()))
    }

    /// Enrollment key, reachable by the patient, the service and its admins.
    pub fn key(&self, user_id: &str, service_id: &str) -> OmrResult<Option<Key>> {
        let holders = [
            self.ctx.principal_ref(user_id)?,
            self.ctx.principal_ref(service_id)?,
        ];
        let key_id = ids::sym(&ids::enrollment_asset(user_id, service_id));
        self.ctx
            .resolve(&shared_asset_paths(&self.ctx.caller.id, &holders, &key_id))
    }

    /// `enrollPatient`. Re-enrolling an existing pair only sets its status.
    pub fn enroll(&self, mut enrollment: Enrollment, sym_b64: &str) -> OmrResult<Enrollment> {
        self.ctx
            .validate_timestamp(enrollment.enroll_date, "enroll date")?;
        if enrollment.user_id == self.ctx.caller.id {
            return Err(OmrError::validation("a patient cannot enroll itself"));
        }
        let user = self.ctx.require_principal(&enrollment.user_id)?;
        if user.role != PrincipalRole::Patient {
            return Err(OmrError::validation(format!("{} is not a patient", user.id)));
        }
        let service = self.ctx.require_principal(&enrollment.service_id)?;
        if service.role != PrincipalRole::Service {
            return Err(OmrError::validation(format!("{} is not a service", service.id)));
        }
        let acting = self.ctx.act_as(&service.id)?;

        let scope = LogScope::Enrollment {
            user_id: user.id.clone(),
            service_id: service.id.clone(),
        };
        let key = match self.get(&user.id, &service.id)? {
            Some(current) => {
                let key = self.key(&user.id, &service.id)?.ok_or_else(|| {
                    OmrError::denied(format!("enrollment {}", current.id()))
                })?;
                let mut updated = current;
                updated.status = enrollment.status;
                updated.enroll_date = enrollment.enroll_date;
                self.ctx.update_record(&updated, &key)?;
                enrollment = updated;
                key
            }
            None => {
                let key = parse_sym_b64(ids::sym(&enrollment.id()), sym_b64)?;
                self.ctx.add_record(&enrollment, &key)?;
                self.ctx.graph.add_edge(&acting.public_key()?, &key)?;
                self.ctx.graph.add_edge(&self.ctx.public_key_of(&user)?, &key)?;
                self.ctx
                    .graph
                    .add_edge(&acting.keypair.log_key(), &key.log_key())?;
                key
            }
        };

        tracing::info!(
            user_id = %user.id,
            service_id = %service.id,
            status = ?enrollment.status,
            "patient enrolled"
        );
        LogEngine::new(self.ctx).emit(
            scope,
            &key,
            "enrollment",
            LogContext {
                user: Some(user.id.clone()),
                service: Some(service.id.clone()),
                org: service.org_id.clone(),
                details: json!({"status": enrollment.status}),
                ..Default::default()
            },
        )?;
        Ok(enrollment)
    }

    /// `unenrollPatient`: by the service (or its admins) or by the patient.
    /// Edges stay in place so past consents and logs remain readable.
    pub fn unenroll(&self, service_id: &str, user_id: &str) -> OmrResult<Enrollment> {
        let id = ids::enrollment_asset(user_id, service_id);
        let mut enrollment = self
            .get(user_id, service_id)?
            .ok_or_else(|| OmrError::not_found(format!("enrollment {id}")))?;
        if self.ctx.try_act_as(service_id)?.is_none() && self.ctx.try_act_as(user_id)?.is_none() {
            return Err(OmrError::denied(format!("enrollment {}", enrollment.id())));
        }
        let key = self
            .key(user_id, service_id)?
            .ok_or_else(|| OmrError::denied(format!("enrollment {}", enrollment.id())))?;

        enrollment.status = EnrollmentStatus::Inactive;
        self.ctx.update_record(&enrollment, &key)?;
        LogEngine::new(self.ctx).emit(
            LogScope::Enrollment {
                user_id: user_id.to_string(),
                service_id: service_id.to_string(),
            },
            &key,
            "enrollment",
            LogContext {
                user: Some(user_id.to_string()),
                service: Some(service_id.to_string()),
                details: json!({"status": enrollment.status}),
                ..Default::default()
            },
        )?;
        Ok(enrollment)
    }

    /// `getPatientEnrollments`.
    pub fn by_user(
        &self,
        user_id: &str,
        status: Option<EnrollmentStatus>,
    ) -> OmrResult<Vec<Enrollment>> {
        self.list("by_user", user_id, status)
    }

    /// `getServiceEnrollments`.
    pub fn by_service(
        &self,
        service_id: &str,
        status: Option<EnrollmentStatus>,
    ) -> OmrResult<Vec<Enrollment>> {
        self.list("by_service", service_id, status)
    }

    /// Enrollments the caller can open, through either party.
    fn list(
        &self,
        index: &str,
        id: &str,
        status: Option<EnrollmentStatus>,
    ) -> OmrResult<Vec<Enrollment>> {
        let caller = self.ctx.caller.id.as_str();
        let resolver = |asset: &Asset| -> OmrResult<Option<Key>> {
            let holders = asset
                .owner_ids
                .iter()
                .map(|owner| self.ctx.principal_ref(owner))
                .collect::<OmrResult<Vec<_>>>()?;
            self.ctx
                .resolve(&shared_asset_paths(caller, &holders, &asset.asset_key_id))
        };
        let filter = |asset: &Asset| -> bool {
            status.is_none_or(|wanted| {
                Enrollment::convert_from_asset(asset).is_ok_and(|e| e.status == wanted)
            })
        };
        let query = AssetQuery::prefix(&ENROLLMENTS, index, vec![json!(id)]);
        let page = self.ctx.assets.iter(&query, &resolver, Some(&filter))?;
        page.assets
            .iter()
            .map(Enrollment::convert_from_asset)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::encode_b64;
    use crate::engine::principals::tests::{org_with_service, register_self};
    use crate::engine::testing::{Fixture, NOW};
    use crate::engine::{Caller, LogEngine};
    use crate::models::LogQuery;

    pub(crate) fn enrollment(user: &str, service: &str, date: i64) -> Enrollment {
        Enrollment {
            user_id: user.into(),
            service_id: service.into(),
            status: EnrollmentStatus::Active,
            enroll_date: date,
        }
    }

    pub(crate) fn enroll(fx: &Fixture, admin: &Caller, user: &str, service: &str) {
        let key = encode_b64(&[7u8; 32]);
        fx.run(admin, |ctx| {
            EnrollmentEngine::new(ctx).enroll(enrollment(user, service, NOW), &key)
        })
        .unwrap();
    }

    #[test]
    fn enroll_shares_key_with_patient_and_service() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        let pat = register_self(&fx, "pat1", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &["heart"]);
        enroll(&fx, &admin, "pat1", "svc1");

        let mine = fx
            .run(&pat, |ctx| EnrollmentEngine::new(ctx).by_user("pat1", None))
            .unwrap();
        assert_eq!(mine.len(), 1);
        let theirs = fx
            .run(&admin, |ctx| {
                EnrollmentEngine::new(ctx).by_service("svc1", Some(EnrollmentStatus::Active))
            })
            .unwrap();
        assert_eq!(theirs, mine);

        // The enrollment log is readable by the patient.
        let logs = fx
            .run(&pat, |ctx| LogEngine::new(ctx).get_logs(&LogQuery::default()))
            .unwrap();
        assert!(logs.iter().any(|l| l.namespace == "enrollment"));
    }

    #[test]
    fn enroll_rejects_self_and_skewed_dates() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        let pat = register_self(&fx, "pat1", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &[]);
        let key = encode_b64(&[7u8; 32]);

        let err = fx
            .run(&admin, |ctx| {
                EnrollmentEngine::new(ctx).enroll(enrollment("pat1", "svc1", NOW - 601), &key)
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid enroll date, not within possible time range");

        let err = fx
            .run(&pat, |ctx| {
                EnrollmentEngine::new(ctx).enroll(enrollment("pat1", "svc1", NOW), &key)
            })
            .unwrap_err();
        assert!(matches!(err, OmrError::Validation(_)));
    }

    #[test]
    fn unenroll_and_reenroll_toggle_status() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        let pat = register_self(&fx, "pat1", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &[]);
        enroll(&fx, &admin, "pat1", "svc1");

        let out = fx
            .run(&pat, |ctx| EnrollmentEngine::new(ctx).unenroll("svc1", "pat1"))
            .unwrap();
        assert_eq!(out.status, EnrollmentStatus::Inactive);
        let active = fx
            .run(&admin, |ctx| {
                EnrollmentEngine::new(ctx).by_service("svc1", Some(EnrollmentStatus::Active))
            })
            .unwrap();
        assert!(active.is_empty());

        enroll(&fx, &admin, "pat1", "svc1");
        assert!(fx
            .run(&admin, |ctx| EnrollmentEngine::new(ctx).is_active("pat1", "svc1"))
            .unwrap());
    }
}
