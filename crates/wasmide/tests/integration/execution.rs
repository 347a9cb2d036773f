use wasmide::runner::Supervisor;
use wasmide::types::{
    ExecutionOutcome, NO_VALID_MODULE, NOTHING, OUTPUT_LIMIT_EXCEEDED, ResourceLimits,
};

use super::{fixture_source, test_config};

fn supervisor() -> Supervisor {
    Supervisor::new(test_config()).expect("Failed to start supervisor")
}

#[tokio::test]
async fn test_run_hello_world() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("hello.wat"), "")
        .await;
    assert_eq!(output, "Hello, World!\n");
}

#[tokio::test]
async fn test_run_with_stdin() {
    let supervisor = supervisor();
    let outcome = supervisor
        .execute(&fixture_source("echo.wat"), "first line\nsecond line\n")
        .await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Completed("first line\nsecond line\n".to_owned())
    );
}

#[tokio::test]
async fn test_run_sum() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("sum.wat"), "4\n10 20\n30 -5\n")
        .await;
    assert_eq!(output, "55\n");
}

#[tokio::test]
async fn test_silent_program_reports_nothing() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("silent.wat"), "")
        .await;
    assert_eq!(output, NOTHING);
}

#[tokio::test]
async fn test_compile_error_output() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("compile_error.wat"), "")
        .await;
    assert_eq!(
        output,
        "Compilation error on line 3.\nCompilation error on line 6.\n"
    );
}

#[tokio::test]
async fn test_missing_module_name() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("no_module_name.wat"), "")
        .await;
    assert_eq!(output, NO_VALID_MODULE);
}

#[tokio::test]
async fn test_fault_reports_message_only() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("boom.wat"), "")
        .await;
    assert_eq!(output, "boom");
}

#[tokio::test]
async fn test_trap_is_faulted() {
    let supervisor = supervisor();
    let outcome = supervisor
        .execute(&fixture_source("unreachable.wat"), "")
        .await;
    let ExecutionOutcome::Faulted(message) = outcome else {
        panic!("expected fault, got {outcome:?}");
    };
    assert!(message.contains("unreachable"));
}

#[tokio::test]
async fn test_exit_keeps_earlier_output() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("exit.wat"), "")
        .await;
    assert_eq!(output, "1");
}

#[tokio::test]
async fn test_error_stream_shares_output() {
    let supervisor = supervisor();
    let output = supervisor
        .execute_program(&fixture_source("streams.wat"), "")
        .await;
    assert_eq!(output, "out err\n");
}

#[tokio::test]
async fn test_missing_entry_point() {
    let supervisor = supervisor();
    let outcome = supervisor.execute(&fixture_source("no_main.wat"), "").await;
    let ExecutionOutcome::Faulted(message) = outcome else {
        panic!("expected fault, got {outcome:?}");
    };
    assert!(message.contains("main"));
}

#[tokio::test]
async fn test_foreign_import_cannot_link() {
    let supervisor = supervisor();
    let outcome = supervisor
        .execute(&fixture_source("foreign_import.wat"), "")
        .await;
    let ExecutionOutcome::Faulted(message) = outcome else {
        panic!("expected fault, got {outcome:?}");
    };
    assert!(message.contains("link error"));
}

#[tokio::test]
async fn test_unredirected_facility_cannot_link() {
    let mut config = test_config();
    config.facilities.system.substitute = wasmide::ModuleName::new("jail/system").unwrap();
    let supervisor = Supervisor::new(config).unwrap();

    // A module importing the substitute name directly still cannot reach
    // functions that are defined under a different name
    let outcome = supervisor
        .execute(
            r#"(module $Direct
                (import "sandbox/system" "print_i32" (func $p (param i32)))
                (func (export "main") (call $p (i32.const 1))))"#,
            "",
        )
        .await;
    assert!(matches!(outcome, ExecutionOutcome::Faulted(_)));

    let output = supervisor
        .execute_program(&fixture_source("hello.wat"), "")
        .await;
    assert_eq!(output, "Hello, World!\n");
}

#[tokio::test]
async fn test_output_limit() {
    let supervisor = supervisor();
    let limits = ResourceLimits::unset().with_max_output(1);
    let outcome = supervisor
        .execute_with_limits(&fixture_source("chatty.wat"), "", Some(&limits))
        .await;
    assert_eq!(outcome.render(), OUTPUT_LIMIT_EXCEEDED);
}

#[tokio::test]
async fn test_memory_limit() {
    let supervisor = supervisor();
    let source = fixture_source("grow_memory.wat");

    let unrestricted = supervisor.execute(&source, "").await;
    assert_eq!(unrestricted, ExecutionOutcome::Completed(String::new()));

    let limits = ResourceLimits::unset().with_memory_limit(1024);
    let restricted = supervisor
        .execute_with_limits(&source, "", Some(&limits))
        .await;
    assert!(matches!(restricted, ExecutionOutcome::Faulted(_)));
}

#[tokio::test]
async fn test_input_mismatch_faults() {
    let supervisor = supervisor();
    let outcome = supervisor
        .execute(&fixture_source("sum.wat"), "two 1 1\n")
        .await;
    let ExecutionOutcome::Faulted(message) = outcome else {
        panic!("expected fault, got {outcome:?}");
    };
    assert!(message.contains("two"));
}
