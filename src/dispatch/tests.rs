// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end invocations through the dispatch table.

use serde_json::{json, Value};

use super::*;
use crate::crypto::encode_b64;

const T: i64 = 1_700_000_000;

struct World {
    node: Node,
    alice: Caller,
    bob: Caller,
    pat1: Caller,
    svc1: Caller,
    svc2: Caller,
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn key(byte: u8) -> String {
    encode_b64(&[byte; 32])
}

impl World {
    fn call(&self, caller: &Caller, function: &str, args: &[&str]) -> OmrResult<Vec<u8>> {
        self.node.invoke_at(caller, function, &strings(args), T)
    }

    fn ok(&self, caller: &Caller, function: &str, args: &[&str]) -> Value {
        let bytes = self
            .call(caller, function, args)
            .unwrap_or_else(|e| panic!("{function} failed: {e}"));
        if bytes.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(&bytes).unwrap()
    }

    /// alice administers org1/svc1 (heart, genome), bob administers
    /// org2/svc2, pat1 is a patient.
    fn new() -> Self {
        let world = World {
            node: Node::in_memory(Config::default()),
            alice: Caller::generate("alice").unwrap(),
            bob: Caller::generate("bob").unwrap(),
            pat1: Caller::generate("pat1").unwrap(),
            svc1: Caller::generate("svc1").unwrap(),
            svc2: Caller::generate("svc2").unwrap(),
        };
        for caller in [&world.alice, &world.bob, &world.pat1] {
            let user = json!({"id": caller.id, "role": "patient"}).to_string();
            world.ok(caller, "registerUser", &[&user]);
        }

        let alice = &world.alice;
        world.ok(alice, "registerOrg", &[r#"{"id":"org1","name":"Org One"}"#]);
        world.ok(alice, "registerDatatype", &[r#"{"id":"heart"}"#]);
        world.ok(alice, "registerDatatype", &[r#"{"id":"genome"}"#]);
        world.ok(
            alice,
            "registerService",
            &[
                r#"{"id":"svc1","org":"org1","datatypes":["heart","genome"]}"#,
                &world.svc1.keypair.material_b64(),
            ],
        );

        let bob = &world.bob;
        world.ok(bob, "registerOrg", &[r#"{"id":"org2"}"#]);
        world.ok(
            bob,
            "registerService",
            &[r#"{"id":"svc2","org":"org2"}"#, &world.svc2.keypair.material_b64()],
        );
        world
    }

    /// S1 up to the first upload.
    fn patient_upload(&self) {
        let enrollment = json!({
            "user": "pat1", "service": "svc1", "status": "active", "enroll_date": T
        });
        self.ok(&self.alice, "enrollPatient", &[&enrollment.to_string(), &key(1)]);

        let consent = json!({
            "owner": "pat1", "target": "svc1", "datatype": "heart",
            "option": ["read", "write"], "expiration": T + 86_400
        });
        self.ok(&self.pat1, "putConsentPatientData", &[&consent.to_string()]);

        let data = json!({
            "owner": "pat1", "service": "svc1", "datatype": "heart",
            "timestamp": T, "data": {"bpm": 72}
        });
        self.ok(&self.pat1, "uploadUserData", &[&data.to_string(), &key(2)]);
    }

    fn download_as_svc1(&self) -> Value {
        let ts = T.to_string();
        self.ok(
            &self.svc1,
            "downloadUserData",
            &["svc1", "pat1", "heart", "true", "0", "0", "10", &ts],
        )
    }
}

#[test]
fn patient_upload_and_download_with_consent() {
    let world = World::new();
    world.patient_upload();

    let records = world.download_as_svc1();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["data"], json!({"bpm": 72}));
    assert_eq!(records[0]["timestamp"], json!(T));
}

#[test]
fn denied_consent_blocks_download() {
    let world = World::new();
    world.patient_upload();

    let deny = json!({
        "owner": "pat1", "target": "svc1", "datatype": "heart",
        "option": ["deny"], "expiration": T + 86_400
    });
    world.ok(&world.pat1, "putConsentPatientData", &[&deny.to_string()]);

    assert_eq!(world.download_as_svc1(), json!([]));
    // The patient still reads its own data.
    let ts = T.to_string();
    let own = world.ok(
        &world.pat1,
        "downloadUserData",
        &["svc1", "pat1", "heart", "true", "0", "0", "10", &ts],
    );
    assert_eq!(own.as_array().map(Vec::len), Some(1));
}

#[test]
fn contract_lifecycle_until_downloads_run_out() {
    let world = World::new();
    let ts = T.to_string();
    let genome = json!({
        "owner": "svc1", "datatype": "genome", "timestamp": T, "data": {"seq": "ACGT"}
    });
    world.ok(&world.alice, "uploadOwnerData", &[&genome.to_string(), &key(5)]);

    let contract = json!({
        "contract_id": "C1", "owner_org": "org1", "owner_service": "svc1",
        "requester_org": "org2", "requester_service": "svc2",
        "create_date": T, "payment_required": "no"
    });
    let created = world.ok(&world.bob, "createContract", &[&contract.to_string(), &key(3)]);
    assert_eq!(created["state"], "requested");

    let ready = world.ok(&world.alice, "addContractDetail", &["C1", "request", "{}", &ts]);
    assert_eq!(ready["state"], "contractReady");
    let signed = world.ok(&world.bob, "addContractDetail", &["C1", "sign", "", &ts]);
    assert_eq!(signed["state"], "contractSigned");

    let granted = world.ok(&world.alice, "givePermissionByContract", &["C1", "5", &ts, "genome"]);
    assert_eq!(granted["state"], "downloadReady");
    let edge = crate::ledger::paths::LedgerPaths::edge("pubprv(svc2)", "datatype(genome,svc1)");
    assert!(world.node.ledger().store().get(&edge).unwrap().is_some());

    let download = ["C1", "genome", "true", "0", "0", "0", ts.as_str()];
    for round in 1..=5 {
        let out = world.ok(&world.bob, "downloadOwnerDataAsRequester", &download);
        assert_eq!(out["data"][0]["data"], json!({"seq": "ACGT"}), "round {round}");
        let snapshot = out["contract_snapshot"].as_str().unwrap().to_string();
        let after = world.ok(&world.bob, "addContractDetailDownload", &["C1", &snapshot, &ts]);
        assert_eq!(after["num_download"], json!(round));
    }

    let done = world.ok(&world.alice, "getContract", &["C1"]);
    assert_eq!(done["state"], "downloadDone");
    assert_eq!(done["num_download"], done["max_num_download"]);
    assert!(world.node.ledger().store().get(&edge).unwrap().is_none());

    let sixth = world.ok(&world.bob, "downloadOwnerDataAsRequester", &download);
    assert_eq!(sixth["data"], json!([]));
}

#[test]
fn auditor_reads_upload_logs_until_revoked() {
    let world = World::new();
    world.patient_upload();
    let aud1 = Caller::generate("aud1").unwrap();
    world.ok(&aud1, "registerAuditor", &[r#"{"id":"aud1"}"#]);

    let query = r#"{"service_id":"svc1"}"#;
    let uploads = |logs: &Value| {
        logs.as_array()
            .map(|l| l.iter().filter(|log| log["namespace"] == "data").count())
            .unwrap_or(0)
    };
    assert_eq!(uploads(&world.ok(&aud1, "getLogs", &[query])), 0);

    world.ok(&world.alice, "addPermissionAuditor", &["aud1", "svc1", &key(4)]);
    assert!(uploads(&world.ok(&aud1, "getLogs", &[query])) >= 1);

    world.ok(&world.alice, "deletePermissionAuditor", &["aud1", "svc1"]);
    assert_eq!(world.ok(&aud1, "getLogs", &[query]), json!([]));
}

#[test]
fn skewed_timestamps_abort_without_changes() {
    let world = World::new();
    let enrollment = json!({
        "user": "pat1", "service": "svc1", "status": "active", "enroll_date": T - 601
    });
    let err = world
        .call(&world.alice, "enrollPatient", &[&enrollment.to_string(), &key(1)])
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid enroll date, not within possible time range");
    assert_eq!(err.error_code(), "validation_error");

    let enrollments = world.ok(&world.alice, "getServiceEnrollments", &["svc1"]);
    assert_eq!(enrollments, json!([]));

    let late = (T + 601).to_string();
    let err = world
        .call(
            &world.svc1,
            "downloadUserData",
            &["svc1", "pat1", "heart", "true", "0", "0", "10", &late],
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid timestamp, not within possible time range");
}

#[test]
fn unknown_functions_and_missing_records() {
    let world = World::new();
    let err = world.call(&world.alice, "mintTokens", &[]).unwrap_err();
    assert!(matches!(err, OmrError::Validation(_)));

    assert!(world.call(&world.alice, "getUser", &["nobody"]).unwrap().is_empty());
    assert!(world.call(&world.alice, "getContract", &["C404"]).unwrap().is_empty());
    // A service is not a user.
    assert!(world.call(&world.alice, "getUser", &["svc1"]).unwrap().is_empty());

    let org = world.ok(&world.alice, "getOrg", &["org1"]);
    assert_eq!(org["name"], "Org One");
}

#[test]
fn registered_callers_must_present_their_key_pair() {
    let world = World::new();
    let impostor = Caller::generate("alice").unwrap();
    let err = world.call(&impostor, "getOrgs", &[]).unwrap_err();
    assert!(matches!(err, OmrError::PermissionDenied(_)));
}

#[test]
fn harness_wraps_results_in_envelopes() {
    let world = World::new();
    let invocation = Invocation {
        caller: "alice".into(),
        keypair: world.alice.keypair.material_b64(),
        function: "getAllDatatypes".into(),
        args: Vec::new(),
        timestamp: Some(T),
    };
    let outcome = serde_json::to_value(world.node.handle(&invocation)).unwrap();
    assert_eq!(outcome["ok"].as_array().map(Vec::len), Some(2));

    let broken = Invocation {
        function: "getUser".into(),
        ..invocation
    };
    let outcome = serde_json::to_value(world.node.handle(&broken)).unwrap();
    assert_eq!(outcome["error_code"], "validation_error");
    assert_eq!(outcome["error"], "missing argument user_id");
}
