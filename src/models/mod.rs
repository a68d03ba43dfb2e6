// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Entity types persisted as assets.

pub mod audit_permission;
pub mod consent;
pub mod contract;
pub mod data;
pub mod datatype;
pub mod enrollment;
pub mod log;
pub mod principal;

pub use audit_permission::AuditPermission;
pub use consent::{Access, Consent, ConsentOption, ConsentRequest, ConsentToken, ConsentValidation};
pub use contract::{Contract, ContractDetail, ContractState, DetailType, Party};
pub use data::{DataKind, DataRecord, OwnerData, UserData, LATEST_TIMESTAMP};
pub use datatype::Datatype;
pub use enrollment::{Enrollment, EnrollmentStatus};
pub use log::{LogContext, LogQuery, LogScope, Predicate, SolutionLog, TransactionLog};
pub use principal::{Principal, PrincipalRole, PrincipalStatus};
