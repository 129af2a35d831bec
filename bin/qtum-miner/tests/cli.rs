//! Tests for the qtum-miner subcommands, driven through argument parsing.

use std::path::Path;

use clap::Parser;
use qtum_consensus::{
    constants::money::COIN,
    difficulty::to_compact,
    test_utils::{funding_coins, MemoryChain, TxBuilder},
    ConsensusParams, HeaderChain, ProofKind,
};
use qtum_miner::{common::MinerError, MainCmd};
use rstest::rstest;
use serde_json::{json, Value};
use tempfile::TempDir;

fn parse(args: &[&str]) -> MainCmd {
    MainCmd::try_parse_from(std::iter::once("qtum-miner").chain(args.iter().copied())).unwrap()
}

fn write_json(dir: &TempDir, name: &str, value: &Value) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path.to_string_lossy().into_owned()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_gas_params_report_the_defaults() {
    let MainCmd::GasParams(cmd) = parse(&["gas-params", "--height", "100"]) else {
        panic!("expected gas-params");
    };
    let gas = cmd.execute().unwrap();
    assert_eq!(gas.height, 100);
    assert_eq!(gas.block_size, 2_000_000);
    assert_eq!(gas.gas_limits.hard, 40_000_000);
    assert_eq!(gas.gas_limits.min_gas_price, 40);
}

#[rstest]
#[case(&["gas-params"], 11)]
#[case(&["gas-params", "--tip-height", "4999"], 5_000)]
fn test_gas_params_default_to_the_next_block(#[case] args: &[&str], #[case] height: u32) {
    let MainCmd::GasParams(cmd) = parse(args) else { panic!("expected gas-params") };
    assert_eq!(cmd.execute().unwrap().height, height);
}

#[test]
fn test_operator_limits_apply_to_gas_params() {
    let MainCmd::GasParams(cmd) = parse(&[
        "gas-params",
        "--staker-max-tx-gas-limit",
        "1000000",
        "--staker-min-tx-gas-price",
        "60",
    ]) else {
        panic!("expected gas-params");
    };
    let gas = cmd.execute().unwrap();
    assert_eq!(gas.gas_limits.tx, 1_000_000);
    assert_eq!(gas.gas_limits.min_gas_price, 60);
}

#[rstest]
#[case("work")]
#[case("stake")]
fn test_next_target_keeps_regtest_bits(#[case] proof: &str) {
    let MainCmd::NextTarget(cmd) = parse(&["next-target", "--proof", proof]) else {
        panic!("expected next-target");
    };
    let target = cmd.execute().unwrap();
    let chain = MemoryChain::pow(&ConsensusParams::regtest(), 10);
    let expected = if proof == "work" { chain.tip().unwrap().bits } else { chain.ancestor(0).unwrap().bits };
    assert_eq!(target.height, 11);
    assert_eq!(target.bits, format!("{expected:#010x}"));
}

#[test]
fn test_next_target_checks_declared_bits() {
    let chain = MemoryChain::pow(&ConsensusParams::regtest(), 10);
    let bits = format!("{:#010x}", chain.tip().unwrap().bits);

    let MainCmd::NextTarget(cmd) = parse(&["next-target", "--check", &bits]) else {
        panic!("expected next-target");
    };
    assert_eq!(cmd.execute().unwrap().valid, Some(true));

    let MainCmd::NextTarget(cmd) = parse(&["next-target", "--check", "0x1d00ffff"]) else {
        panic!("expected next-target");
    };
    assert_eq!(cmd.execute().unwrap().valid, Some(false));
}

#[test]
fn test_next_target_reads_a_headers_file() {
    let dir = TempDir::new().unwrap();
    let limit = to_compact(ConsensusParams::regtest().target_limit(0, ProofKind::Work));
    let headers = json!([
        { "time": 1_000, "bits": limit },
        { "time": 1_032, "bits": 0x1d00_ffff_u32 },
        { "time": 1_064, "bits": limit, "proof": "stake" },
    ]);
    let path = write_json(&dir, "headers.json", &headers);

    let MainCmd::NextTarget(cmd) = parse(&["next-target", "--headers", &path]) else {
        panic!("expected next-target");
    };
    let target = cmd.execute().unwrap();
    assert_eq!(target.height, 3);
    assert_eq!(target.bits, "0x1d00ffff");
}

#[test]
fn test_template_from_files() {
    let dir = TempDir::new().unwrap();
    let plain = TxBuilder::new(1).pay(COIN).build();
    let mempool = json!([{ "tx": plain, "fee": 10_000 }]);
    let coins: Vec<Value> = funding_coins([1])
        .into_iter()
        .map(|(outpoint, output)| json!({ "outpoint": outpoint, "output": output }))
        .collect();
    let mempool = write_json(&dir, "mempool.json", &mempool);
    let coins = write_json(&dir, "coins.json", &Value::Array(coins));
    let output = dir.path().join("template.json");
    let args = [
        "template",
        "--mempool",
        mempool.as_str(),
        "--coins",
        coins.as_str(),
        "--now",
        "1600000000",
        "--output",
        output.to_str().unwrap(),
    ];
    let MainCmd::Template(cmd) = parse(&args) else { panic!("expected template") };
    cmd.run().unwrap();

    let template = read_json(&output);
    assert_eq!(template["height"], 11);
    assert_eq!(template["transactions"].as_array().unwrap().len(), 2);
    assert_eq!(template["feeTotal"], 10_000);
}

#[test]
fn test_disabled_contract_staking_keeps_plain_transactions() {
    let dir = TempDir::new().unwrap();
    let mempool = json!([
        { "tx": TxBuilder::new(1).pay(COIN).build(), "fee": 10_000 },
        { "tx": TxBuilder::new(2).pay(COIN).build(), "fee": 20_000, "feeDelta": 5_000 },
    ]);
    let path = write_json(&dir, "mempool.json", &mempool);
    let MainCmd::Template(cmd) =
        parse(&["template", "--mempool", &path, "--disable-contract-staking", "--now", "1600000000"])
    else {
        panic!("expected template");
    };
    let template = cmd.execute().unwrap();
    assert_eq!(template.transactions.len(), 3);
    assert_eq!(template.fee_total, 30_000);
}

#[test]
fn test_missing_and_malformed_inputs_are_reported() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.json");
    let MainCmd::Template(cmd) = parse(&["template", "--mempool", missing.to_str().unwrap()]) else {
        panic!("expected template");
    };
    assert!(matches!(cmd.execute(), Err(MinerError::Io { .. })));

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, "{ not json").unwrap();
    let MainCmd::NextTarget(cmd) = parse(&["next-target", "--headers", garbage.to_str().unwrap()]) else {
        panic!("expected next-target");
    };
    assert!(matches!(cmd.execute(), Err(MinerError::Json { .. })));

    let empty = write_json(&dir, "empty.json", &json!([]));
    let MainCmd::NextTarget(cmd) = parse(&["next-target", "--headers", &empty]) else {
        panic!("expected next-target");
    };
    assert!(matches!(cmd.execute(), Err(MinerError::EmptyChain)));
}
