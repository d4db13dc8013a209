use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

const ALICE_HEX: &str = "0xd43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";
const ALICE_GENERIC: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
const ALICE_POLKADOT: &str = "15oF4uVJwmo4TdGW7VfQxNLavjCXviqxT9S1MgbjMNHr6Sp5";

#[test]
fn address_converts_both_ways() {
    cargo_bin_cmd!("wallet")
        .args(["address", ALICE_HEX])
        .assert()
        .success()
        .stdout(predicate::str::contains(ALICE_GENERIC));

    cargo_bin_cmd!("wallet")
        .args(["address", ALICE_HEX, "--prefix", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains(ALICE_POLKADOT));

    cargo_bin_cmd!("wallet")
        .args(["address", ALICE_POLKADOT])
        .assert()
        .success()
        .stdout(predicate::str::contains(ALICE_HEX).and(predicate::str::contains("prefix 0")));
}

#[test]
fn address_rejects_garbage() {
    cargo_bin_cmd!("wallet")
        .args(["address", "not-an-address"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid SS58 address"));
}

#[test]
fn config_merges_file_and_endpoint_flag() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("wallet.json");
    fs::write(
        &path,
        br#"{"rpc":{"max_reconnect_attempts":9},"sync":{"offchain_debounce":750}}"#,
    )
    .expect("write config");

    let output = cargo_bin_cmd!("wallet")
        .args(["config", "--config"])
        .arg(&path)
        .env("WALLET_ENDPOINT", "ws://node.example:9944")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let config: Value = serde_json::from_slice(&output).expect("json");
    assert_eq!(config["rpc"]["endpoints"][0], "ws://node.example:9944");
    assert_eq!(config["rpc"]["max_reconnect_attempts"], 9);
    assert_eq!(config["sync"]["offchain_debounce"], 750);
}

#[test]
fn config_defaults_without_file() {
    cargo_bin_cmd!("wallet")
        .arg("config")
        .env_remove("WALLET_ENDPOINT")
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://127.0.0.1:9944"));
}

#[test]
fn missing_config_file_fails() {
    cargo_bin_cmd!("wallet")
        .args(["config", "--config", "/nonexistent/wallet.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
