use wasmide::runner::{CompileError, compile, extract_module_name};
use wasmide::types::ExecutionOutcome;

use super::fixture_source;

#[test]
fn test_compile_hello() {
    let module = compile(&fixture_source("hello.wat")).expect("Compilation failed");
    assert_eq!(module.name(), "Hello");
    wasmparser::validate(module.bytes()).expect("compiled module should validate");
}

#[test]
fn test_compile_every_runnable_fixture() {
    for name in [
        "echo.wat",
        "sum.wat",
        "silent.wat",
        "infinite_loop.wat",
        "boom.wat",
        "exit.wat",
        "unreachable.wat",
        "chatty.wat",
        "grow_memory.wat",
        "streams.wat",
    ] {
        let source = fixture_source(name);
        let module = compile(&source).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(Some(module.name()), extract_module_name(&source));
    }
}

#[test]
fn test_compile_error_reports_every_broken_field() {
    let Err(CompileError::Diagnostics(diagnostics)) = compile(&fixture_source("compile_error.wat"))
    else {
        panic!("expected diagnostics");
    };

    let lines: Vec<_> = diagnostics.iter().map(|d| d.line).collect();
    assert_eq!(lines, vec![3, 6]);
    assert_eq!(
        ExecutionOutcome::CompileFailed(diagnostics).render(),
        "Compilation error on line 3.\nCompilation error on line 6.\n"
    );
}

#[test]
fn test_validation_error_line() {
    let Err(CompileError::Diagnostics(diagnostics)) = compile(&fixture_source("invalid_type.wat"))
    else {
        panic!("expected diagnostics");
    };

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].line, 3);
}

#[test]
fn test_missing_module_name_is_rejected() {
    assert!(matches!(
        compile(&fixture_source("no_module_name.wat")),
        Err(CompileError::InputRejected)
    ));
}

#[test]
fn test_same_name_compiles_independently() {
    let first = compile("(module $Same (func (export \"main\")))").unwrap();
    let second = compile("(module $Same (func (export \"main\") nop))").unwrap();
    assert_eq!(first.name(), second.name());
    assert_ne!(first.bytes(), second.bytes());
}
