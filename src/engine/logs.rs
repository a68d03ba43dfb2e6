// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted transaction logs.
//!
//! Every log is encrypted under the log key derived from its scope's parent
//! key, so anyone who can reach the parent key can read the log. Retrieval
//! walks the log index newest first and silently skips logs whose key the
//! caller cannot reach.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value;

use super::TxContext;
use crate::assets::index::LOGS;
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::Key;
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::{
    contract_log_paths, enrollment_log_paths, principal_log_paths, shared_asset_paths,
};
use crate::keygraph::{ids, PrincipalRef};
use crate::models::{LogContext, LogQuery, LogScope, SolutionLog, TransactionLog};

pub struct LogEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> LogEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    /// Write a log of the current invocation under `scope`.
    ///
    /// `parent_key` is the key the scope's log key derives from: the
    /// principal key pair, the enrollment key or the contract key.
    pub fn emit(
        &self,
        scope: LogScope,
        parent_key: &Key,
        namespace: &str,
        data: LogContext,
    ) -> OmrResult<String> {
        if parent_key.id != scope.parent_key_id() {
            return Err(OmrError::validation(format!(
                "key {} cannot encrypt logs of scope {}",
                parent_key.id,
                scope.log_key_id()
            )));
        }
        let (function, _) = self.ctx.stub.function_and_parameters();
        let log = TransactionLog {
            log_id: format!("Log-{}-{}", self.ctx.tx_id(), self.ctx.next_log_seq()),
            tx_id: self.ctx.tx_id().to_string(),
            namespace: namespace.to_string(),
            function,
            caller: self.ctx.caller.id.clone(),
            timestamp: self.ctx.now(),
            scope,
            data,
            connection_id: None,
        };
        self.ctx.add_record(&log, &parent_key.log_key())?;
        tracing::info!(
            log_id = %log.log_id,
            log_key = %log.scope.log_key_id(),
            "transaction log written"
        );
        Ok(log.log_id)
    }

    /// Shorthand for a log under a principal's own scope.
    pub fn emit_principal(
        &self,
        principal_id: &str,
        keypair: &Key,
        namespace: &str,
        data: LogContext,
    ) -> OmrResult<String> {
        self.emit(
            LogScope::Principal {
                principal_id: principal_id.to_string(),
            },
            keypair,
            namespace,
            data,
        )
    }

    /// `addQueryTransactionLog` / `addValidateConsentQueryLog`.
    pub fn add_solution_log(&self, log: SolutionLog, namespace: &str) -> OmrResult<String> {
        self.ctx.validate_timestamp(log.timestamp, "log timestamp")?;
        let scope = log.scope.unwrap_or_else(|| LogScope::Principal {
            principal_id: self.ctx.caller.id.clone(),
        });
        let parent = self
            .scope_parent_key(&scope)?
            .ok_or_else(|| OmrError::denied(format!("log scope {}", scope.log_key_id())))?;
        self.emit(scope, &parent, namespace, log.data)
    }

    fn scope_parent_key(&self, scope: &LogScope) -> OmrResult<Option<Key>> {
        match scope {
            LogScope::Principal { principal_id } => Ok(self
                .ctx
                .try_act_as(principal_id)?
                .map(|acting| acting.keypair)),
            LogScope::Enrollment {
                user_id,
                service_id,
            } => {
                let holders = [
                    self.ctx.principal_ref(user_id)?,
                    self.ctx.principal_ref(service_id)?,
                ];
                let key_id = ids::sym(&ids::enrollment_asset(user_id, service_id));
                self.ctx
                    .resolve(&shared_asset_paths(&self.ctx.caller.id, &holders, &key_id))
            }
            LogScope::Contract {
                contract_id,
                owner_service,
                requester_service,
            } => {
                let holders = [
                    self.ctx.principal_ref(owner_service)?,
                    self.ctx.principal_ref(requester_service)?,
                ];
                self.ctx.resolve(&shared_asset_paths(
                    &self.ctx.caller.id,
                    &holders,
                    &ids::sym(contract_id),
                ))
            }
        }
    }

    /// `getLogs`: newest first, at most `max_num` (one with `latest_only`).
    pub fn get_logs(&self, query: &LogQuery) -> OmrResult<Vec<TransactionLog>> {
        let predicate = query.predicate();
        let limit = if query.latest_only {
            1
        } else {
            self.ctx.config.max_num(query.max_num)
        };

        let refs: RefCell<HashMap<String, PrincipalRef>> = RefCell::new(HashMap::new());
        let lookup = |id: &str| -> PrincipalRef {
            if let Some(found) = refs.borrow().get(id) {
                return found.clone();
            }
            let found = match self.ctx.principal(id) {
                Ok(Some(p)) => p.as_ref(),
                _ => PrincipalRef::standalone(id),
            };
            refs.borrow_mut().insert(id.to_string(), found.clone());
            found
        };

        let caller = self.ctx.caller.id.as_str();
        let resolver = |asset: &Asset| -> OmrResult<Option<Key>> {
            let scope: LogScope = serde_json::from_value(
                asset.public_data.get("scope").cloned().unwrap_or(Value::Null),
            )?;
            let paths = match &scope {
                LogScope::Principal { principal_id } => {
                    principal_log_paths(caller, &lookup(principal_id))
                }
                LogScope::Enrollment {
                    user_id,
                    service_id,
                } => enrollment_log_paths(caller, &lookup(user_id), &lookup(service_id)),
                LogScope::Contract {
                    contract_id,
                    owner_service,
                    requester_service,
                } => contract_log_paths(
                    caller,
                    contract_id,
                    &[lookup(owner_service), lookup(requester_service)],
                ),
            };
            self.ctx.resolve(&paths)
        };
        let filter = |asset: &Asset| -> bool {
            TransactionLog::convert_from_asset(asset)
                .map(|log| predicate.eval(&log))
                .unwrap_or(false)
        };

        let scan = AssetQuery::prefix(&LOGS, "by_time", Vec::new())
            .descending()
            .limit(limit);
        let page = self.ctx.assets.iter(&scan, &resolver, Some(&filter))?;

        page.assets
            .iter()
            .map(TransactionLog::convert_from_asset)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Fixture, NOW};
    use crate::engine::Caller;

    #[test]
    fn own_logs_are_readable_and_others_are_not() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        let bob = Caller::generate("bob").unwrap();

        fx.run(&alice, |ctx| {
            let logs = LogEngine::new(ctx);
            let data = LogContext {
                owner: Some("alice".into()),
                ..Default::default()
            };
            logs.emit_principal("alice", &ctx.caller.keypair, "test", data)?;
            Ok(())
        })
        .unwrap();

        let mine = fx
            .run(&alice, |ctx| LogEngine::new(ctx).get_logs(&LogQuery::default()))
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].data.owner.as_deref(), Some("alice"));
        assert_eq!(mine[0].timestamp, NOW);

        let theirs = fx
            .run(&bob, |ctx| LogEngine::new(ctx).get_logs(&LogQuery::default()))
            .unwrap();
        assert!(theirs.is_empty());
    }

    #[test]
    fn logs_from_separate_transactions_do_not_collide() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let id = fx
                .run(&alice, |ctx| {
                    LogEngine::new(ctx).emit_principal(
                        "alice",
                        &ctx.caller.keypair,
                        "test",
                        LogContext::default(),
                    )
                })
                .unwrap();
            ids.push(id);
        }
        assert_ne!(ids[0], ids[1]);

        let all = fx
            .run(&alice, |ctx| LogEngine::new(ctx).get_logs(&LogQuery::default()))
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn emit_rejects_foreign_parent_key() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        let err = fx
            .run(&alice, |ctx| {
                LogEngine::new(ctx).emit_principal(
                    "bob",
                    &ctx.caller.keypair,
                    "test",
                    LogContext::default(),
                )
            })
            .unwrap_err();
        assert!(matches!(err, OmrError::Validation(_)));
    }

    #[test]
    fn latest_only_and_max_num_bound_results() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        fx.run(&alice, |ctx| {
            let logs = LogEngine::new(ctx);
            for i in 0..3 {
                let data = LogContext {
                    details: serde_json::json!({"n": i}),
                    ..Default::default()
                };
                logs.emit_principal("alice", &ctx.caller.keypair, "test", data)?;
            }
            Ok(())
        })
        .unwrap();

        let latest = LogQuery {
            latest_only: true,
            ..Default::default()
        };
        let two = LogQuery {
            max_num: 2,
            ..Default::default()
        };
        fx.run(&alice, |ctx| {
            let logs = LogEngine::new(ctx);
            assert_eq!(logs.get_logs(&latest)?.len(), 1);
            assert_eq!(logs.get_logs(&two)?.len(), 2);
            assert_eq!(logs.get_logs(&LogQuery::default())?.len(), 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn solution_log_needs_reachable_scope() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        fx.run(&alice, |ctx| {
            let logs = LogEngine::new(ctx);
            let own = SolutionLog {
                timestamp: NOW,
                scope: None,
                data: LogContext::default(),
            };
            logs.add_solution_log(own, "query")?;

            let stale = SolutionLog {
                timestamp: NOW - 3600,
                scope: None,
                data: LogContext::default(),
            };
            assert!(matches!(logs.add_solution_log(stale, "query"), Err(OmrError::Validation(_))));

            let foreign = SolutionLog {
                timestamp: NOW,
                scope: Some(LogScope::Principal {
                    principal_id: "bob".into(),
                }),
                data: LogContext::default(),
            };
            assert!(matches!(
                logs.add_solution_log(foreign, "query"),
                Err(OmrError::PermissionDenied(_))
            ));
            Ok(())
        })
        .unwrap();
    }
}
