#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use ulid::Ulid;

const VOLUNTEER: &str = "01J0SQQP7M70P6Y3R4T8D8G8M2";
const CHURCH: &str = "01J0SQQP7M70P6Y3R4T8D8G8M3";

fn gamify_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_gamify") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/gamify");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "gamify-cli", "--bin", "gamify"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build gamify binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn gamify_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(gamify_binary_path());
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run gamify command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn award_args<'a>(points: &'a str, reason: &'a str) -> Vec<&'a str> {
    vec![
        "points",
        "award",
        "--volunteer-id",
        VOLUNTEER,
        "--church-id",
        CHURCH,
        "--points",
        points,
        "--type",
        "earned",
        "--reason",
        reason,
    ]
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(gamify_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in [
        "points",
        "streak",
        "badge",
        "challenge",
        "leaderboard",
        "ledger",
    ] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn award_output_matches_the_v1_schema() {
    let db_path =
        std::env::temp_dir().join(format!("gamify-contract-award-{}.sqlite3", Ulid::new()));

    let output = gamify_output(&db_path, &award_args("75", "Served Sunday morning"));
    assert!(
        output.status.success(),
        "award failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value = stdout_json(&output);

    let schema = json!({
        "type": "object",
        "required": ["transaction", "aggregate", "deduplicated"],
        "properties": {
            "deduplicated": { "type": "boolean" },
            "transaction": {
                "type": "object",
                "required": [
                    "txn_seq",
                    "txn_id",
                    "volunteer_id",
                    "church_id",
                    "points",
                    "transaction_type",
                    "reason",
                    "created_at",
                    "created_by"
                ],
                "properties": {
                    "txn_seq": { "type": "integer", "minimum": 1 },
                    "points": { "type": "integer" },
                    "transaction_type": {
                        "enum": ["earned", "spent", "bonus", "penalty", "adjustment"]
                    }
                }
            },
            "aggregate": {
                "type": "object",
                "required": [
                    "volunteer_id",
                    "church_id",
                    "total_points",
                    "lifetime_points",
                    "points_spent",
                    "level",
                    "level_progress",
                    "created_at",
                    "updated_at"
                ],
                "properties": {
                    "total_points": { "type": "integer" },
                    "lifetime_points": { "type": "integer" },
                    "level": { "type": "integer", "minimum": 0 }
                }
            }
        }
    });
    let compiled = match JSONSchema::compile(&schema) {
        Ok(value) => value,
        Err(err) => panic!("failed to compile award schema: {err}"),
    };
    if let Err(errors) = compiled.validate(&value) {
        let formatted = errors.map(|err| err.to_string()).collect::<Vec<_>>();
        panic!("award output violates schema: {formatted:?}\npayload={value}");
    }

    assert_eq!(value["deduplicated"], json!(false));
    assert_eq!(value["aggregate"]["total_points"], json!(75));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn idempotent_award_is_flagged_and_keeps_the_balance() {
    let db_path =
        std::env::temp_dir().join(format!("gamify-contract-idem-{}.sqlite3", Ulid::new()));

    let mut args = award_args("50", "Setup crew");
    args.extend(["--idempotency-key", "setup-2026-01-05"]);

    let first = gamify_output(&db_path, &args);
    assert!(first.status.success());
    let second = gamify_output(&db_path, &args);
    assert!(second.status.success());

    let replayed = stdout_json(&second);
    assert_eq!(replayed["deduplicated"], json!(true));
    assert_eq!(replayed["aggregate"]["total_points"], json!(50));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn error_shape_for_missing_balance_is_stable() {
    let db_path =
        std::env::temp_dir().join(format!("gamify-contract-missing-{}.sqlite3", Ulid::new()));

    let output = gamify_output(
        &db_path,
        &[
            "points",
            "balance",
            "--volunteer-id",
            VOLUNTEER,
            "--church-id",
            CHURCH,
        ],
    );
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no points recorded"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn ledger_check_emits_the_v1_contract_payload() {
    let db_path =
        std::env::temp_dir().join(format!("gamify-contract-check-{}.sqlite3", Ulid::new()));

    let award = gamify_output(&db_path, &award_args("120", "Greeter shift"));
    assert!(award.status.success());

    let output = gamify_output(&db_path, &["ledger", "check", "--json"]);
    assert!(
        output.status.success(),
        "ledger check failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value = stdout_json(&output);
    assert_eq!(value["contract_version"], json!("ledger_check.v1"));
    assert_eq!(value["healthy"], json!(true));
    assert_eq!(value["status"]["contract_version"], json!("ledger_status.v1"));
    assert_eq!(value["status"]["ledger_rows"], json!(1));
    assert_eq!(value["issues"], json!([]));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn leaderboard_rank_emits_the_v1_contract_payload() {
    let db_path =
        std::env::temp_dir().join(format!("gamify-contract-rank-{}.sqlite3", Ulid::new()));

    let award = gamify_output(&db_path, &award_args("90", "Worship team"));
    assert!(award.status.success());

    let snapshot = gamify_output(
        &db_path,
        &[
            "leaderboard",
            "snapshot",
            "--church-id",
            CHURCH,
            "--metric",
            "points",
            "--period-key",
            "2026-W02",
        ],
    );
    assert!(snapshot.status.success());
    let snapshot_value = stdout_json(&snapshot);
    assert_eq!(
        snapshot_value["contract_version"],
        json!("leaderboard_snapshot.v1")
    );

    let output = gamify_output(
        &db_path,
        &[
            "leaderboard",
            "rank",
            "--church-id",
            CHURCH,
            "--metric",
            "points",
            "--json",
        ],
    );
    assert!(output.status.success());

    let value = stdout_json(&output);
    assert_eq!(value["contract_version"], json!("leaderboard.v1"));
    assert_eq!(value["metric_type"], json!("points"));
    assert_eq!(value["entries"][0]["rank"], json!(1));
    assert_eq!(value["entries"][0]["volunteer_id"], json!(VOLUNTEER));
    assert_eq!(value["entries"][0]["previous_rank"], json!(1));
    assert_eq!(value["entries"][0]["metric_value"], json!(90.0));

    let _ = std::fs::remove_file(&db_path);
}
