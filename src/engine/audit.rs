// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auditor access to a service's logs.
//!
//! An audit permission key `sym(AuditPermission-a-s)` links to the service
//! log key `log(pubprv(s))`, and from there to the enrollment and contract
//! logs the service is part of. Revoking drops only that link.

use serde_json::json;

use super::logs::LogEngine;
use super::TxContext;
use crate::crypto::{parse_sym_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::ids;
use crate::models::{AuditPermission, LogContext, PrincipalRole};

pub struct AuditEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> AuditEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    fn log(&self, permission: &AuditPermission, service_keypair: &Key) -> OmrResult<()> {
        LogEngine::new(self.ctx).emit_principal(
            &permission.service_id,
            service_keypair,
            "audit",
            LogContext {
                service: Some(permission.service_id.clone()),
                user: Some(permission.auditor_id.clone()),
                details: json!({"is_active": permission.is_active}),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// `addPermissionAuditor`, by an admin of the service or its org.
    pub fn add(
        &self,
        auditor_id: &str,
        service_id: &str,
        sym_b64: &str,
        timestamp: Option<i64>,
    ) -> OmrResult<AuditPermission> {
        let timestamp = match timestamp {
            Some(ts) => {
                self.ctx.validate_timestamp(ts, "timestamp")?;
                ts
            }
            None => self.ctx.now(),
        };
        let auditor = self.ctx.require_principal(auditor_id)?;
        if auditor.role != PrincipalRole::Audit {
            return Err(OmrError::validation(format!("{auditor_id} is not an auditor")));
        }
        let service = self.ctx.require_principal(service_id)?;
        if service.role != PrincipalRole::Service {
            return Err(OmrError::validation(format!("{service_id} is not a service")));
        }
        let acting = self.ctx.act_as(service_id)?;
        let service_log = acting.keypair.log_key();

        let id = ids::audit_permission_asset(auditor_id, service_id);
        let permission = match self.ctx.public_record::<AuditPermission>(&id)? {
            Some(current) if current.is_active => return Ok(current),
            Some(mut current) => {
                let key = self
                    .ctx
                    .key_from(&acting, &ids::sym(&id))?
                    .ok_or_else(|| OmrError::denied(format!("audit permission {id}")))?;
                current.is_active = true;
                current.timestamp = timestamp;
                self.ctx.update_record(&current, &key)?;
                self.ctx.graph.add_edge(&key, &service_log)?;
                current
            }
            None => {
                let permission = AuditPermission {
                    auditor_id: auditor_id.to_string(),
                    service_id: service_id.to_string(),
                    is_active: true,
                    timestamp,
                };
                let key = parse_sym_b64(ids::sym(&id), sym_b64)?;
                self.ctx.add_record(&permission, &key)?;
                self.ctx.graph.add_edge(&self.ctx.public_key_of(&auditor)?, &key)?;
                self.ctx.graph.add_edge(&acting.public_key()?, &key)?;
                self.ctx.graph.add_edge(&key, &service_log)?;
                permission
            }
        };

        tracing::info!(auditor_id, service_id, "audit permission granted");
        self.log(&permission, &acting.keypair)?;
        Ok(permission)
    }

    /// `deletePermissionAuditor`: only the link to the service log key is
    /// removed.
    pub fn remove(&self, auditor_id: &str, service_id: &str) -> OmrResult<AuditPermission> {
        let acting = self.ctx.act_as(service_id)?;
        let id = ids::audit_permission_asset(auditor_id, service_id);
        let mut permission = self
            .ctx
            .public_record::<AuditPermission>(&id)?
            .ok_or_else(|| OmrError::not_found(format!("audit permission {id}")))?;
        let key = self
            .ctx
            .key_from(&acting, &ids::sym(&id))?
            .ok_or_else(|| OmrError::denied(format!("audit permission {id}")))?;

        permission.is_active = false;
        permission.timestamp = self.ctx.now();
        self.ctx.update_record(&permission, &key)?;
        self.ctx
            .graph
            .remove_edge(&key.id, &ids::log(&ids::pubprv(service_id)))?;

        tracing::info!(auditor_id, service_id, "audit permission revoked");
        self.log(&permission, &acting.keypair)?;
        Ok(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encode_b64;
    use crate::engine::principals::tests::{org_with_service, register_self};
    use crate::engine::testing::{Fixture, NOW};
    use crate::models::LogQuery;

    #[test]
    fn auditor_reads_service_logs_until_revoked() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        let auditor = register_self(&fx, "aud1", PrincipalRole::Audit);
        org_with_service(&fx, &admin, "org1", "svc1", &["heart"]);
        let key = encode_b64(&[4u8; 32]);
        let query = LogQuery {
            service_id: Some("svc1".into()),
            ..Default::default()
        };

        let before = fx
            .run(&auditor, |ctx| LogEngine::new(ctx).get_logs(&query))
            .unwrap();
        assert!(before.is_empty());

        fx.run(&admin, |ctx| AuditEngine::new(ctx).add("aud1", "svc1", &key, Some(NOW)))
            .unwrap();
        let granted = fx
            .run(&auditor, |ctx| LogEngine::new(ctx).get_logs(&query))
            .unwrap();
        assert!(!granted.is_empty());

        fx.run(&admin, |ctx| AuditEngine::new(ctx).remove("aud1", "svc1"))
            .unwrap();
        let revoked = fx
            .run(&auditor, |ctx| LogEngine::new(ctx).get_logs(&query))
            .unwrap();
        assert!(revoked.is_empty());

        // Reactivation restores the link.
        let again = fx
            .run(&admin, |ctx| AuditEngine::new(ctx).add("aud1", "svc1", &key, None))
            .unwrap();
        assert!(again.is_active);
        let restored = fx
            .run(&auditor, |ctx| LogEngine::new(ctx).get_logs(&query))
            .unwrap();
        assert!(!restored.is_empty());
    }

    #[test]
    fn only_auditors_receive_permissions() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        register_self(&fx, "pat1", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &[]);
        let key = encode_b64(&[4u8; 32]);
        let err = fx
            .run(&admin, |ctx| AuditEngine::new(ctx).add("pat1", "svc1", &key, None))
            .unwrap_err();
        assert!(matches!(err, OmrError::Validation(_)));
    }
}
