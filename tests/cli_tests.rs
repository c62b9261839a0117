// ABOUTME: Integration tests for the CLI application
// ABOUTME: Runs the automaton binary for run, validate, inspect, oracle and init

use std::path::Path;
use std::process::{Command, Output};

mod common;
use common::{TestEnvironment, TestWorkflowBuilder};

const DEMO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/provision.yaml");

/// Run the binary inside `dir` so no stray config file is picked up.
fn automaton(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_automaton"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .arg("--no-color")
        .args(args)
        .output()
        .expect("Failed to execute automaton")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_cli_help_and_version() {
    let env = TestEnvironment::new();

    let help = automaton(env.path(), &["--help"]);
    assert!(help.status.success());
    let text = stdout(&help);
    assert!(text.contains("automaton"));
    for command in ["run", "validate", "inspect", "oracle", "init"] {
        assert!(text.contains(command), "help lacks {}", command);
    }

    let version = automaton(env.path(), &["--version"]);
    assert!(version.status.success());
    assert!(stdout(&version).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_run_demo_and_inspect_checkpoint() {
    let env = TestEnvironment::new();
    let checkpoint = env.checkpoint_file("demo");

    let output = automaton(
        env.path(),
        &["run", DEMO, "--seed", "3", "--checkpoint", checkpoint.to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = stdout(&output);
    assert!(text.contains("Worker 'provision'"));
    assert!(text.contains("Direction: forward"));
    assert!(text.contains("Task 'boot': done"));
    assert!(checkpoint.exists());

    let inspect = automaton(env.path(), &["inspect", checkpoint.to_str().unwrap()]);
    assert!(inspect.status.success());
    let text = stdout(&inspect);
    assert!(text.contains("Task 'customer': done"));
    assert!(text.contains("-> Bob"));
    assert!(text.contains("-> Booted container"));
}

#[test]
fn test_cli_run_with_injected_failure_unwinds() {
    let env = TestEnvironment::new();

    let output = automaton(env.path(), &["run", DEMO, "--fail", "node=disk full"]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Direction: undo"));
    assert!(text.contains("Rmv event [node: disk full]"));
    assert!(text.contains("Task 'node': failed"));
    assert!(text.contains("disk full"));
}

#[test]
fn test_cli_init_then_validate() {
    let env = TestEnvironment::new();
    let out_dir = env.path().join("flows");

    let init = automaton(
        env.path(),
        &["init", "starter", "--output-dir", out_dir.to_str().unwrap()],
    );
    assert!(init.status.success(), "{}", String::from_utf8_lossy(&init.stderr));
    let workflow = out_dir.join("starter.yaml");
    assert!(workflow.exists());

    let validate = automaton(env.path(), &["validate", workflow.to_str().unwrap()]);
    assert!(validate.status.success(), "{}", String::from_utf8_lossy(&validate.stderr));
    assert!(stdout(&validate).contains("Workflow 'starter' is valid"));

    let again = automaton(
        env.path(),
        &["init", "starter", "--output-dir", out_dir.to_str().unwrap()],
    );
    assert!(!again.status.success());
}

#[tokio::test]
async fn test_cli_validate_rejects_unknown_action() {
    let env = TestEnvironment::new();
    let builder = TestWorkflowBuilder::new("broken")
        .add_task("first", "noop", vec![])
        .add_task("second", "teleport", vec!["first"]);
    let workflow = env.create_workflow_file("broken", &builder).await;

    let output = automaton(env.path(), &["validate", workflow.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("teleport"));
}

#[test]
fn test_cli_oracle() {
    let env = TestEnvironment::new();

    let hard = automaton(
        env.path(),
        &["oracle", "--timeout", "100ms", "--elapsed", "1s", "--trials", "50"],
    );
    assert!(hard.status.success());
    let text = stdout(&hard);
    assert!(text.contains("Score: hard timeout"));
    assert!(text.contains("50/50"));

    let early = automaton(
        env.path(),
        &[
            "oracle", "--timeout", "1s", "--elapsed", "500ms", "--confidence", "known",
            "--transit", "lan",
        ],
    );
    assert!(early.status.success());
    let text = stdout(&early);
    assert!(text.contains("not overdue"));
    assert!(text.contains("0/1000"));

    let unknown = automaton(
        env.path(),
        &["oracle", "--timeout", "1s", "--elapsed", "2s", "--transit", "teleport"],
    );
    assert!(!unknown.status.success());
}
