use wasmide::runner::compile;
use wasmide::sandbox::patch::{ImportKind, replace_symbol, scan_imports};

use super::fixture_source;

#[test]
fn test_patch_compiled_fixture() {
    let module = compile(&fixture_source("echo.wat")).unwrap();
    let before = scan_imports(module.bytes()).unwrap();

    let patched = replace_symbol(module.bytes(), "scanner", "sandbox/scanner").unwrap();
    let after = scan_imports(&patched).unwrap();

    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.index, new.index);
        assert_eq!(old.field, new.field);
        assert_eq!(old.kind, new.kind);
        if old.module == "scanner" {
            assert_eq!(new.module, "sandbox/scanner");
        } else {
            assert_eq!(new.module, old.module);
        }
    }
    wasmparser::validate(&patched).expect("patched module should validate");
}

#[test]
fn test_patch_leaves_code_untouched() {
    let module = compile(&fixture_source("sum.wat")).unwrap();
    let patched = replace_symbol(module.bytes(), "system", "sandbox/system").unwrap();

    // "sandbox/" adds 8 bytes to each of the two `system` imports
    assert_eq!(patched.len(), module.bytes().len() + 16);
    let suffix = 64.min(module.bytes().len() / 2);
    assert_eq!(
        &patched[patched.len() - suffix..],
        &module.bytes()[module.bytes().len() - suffix..]
    );
}

#[test]
fn test_both_facilities_patch_in_any_order() {
    let module = compile(&fixture_source("echo.wat")).unwrap();

    let system_first = replace_symbol(module.bytes(), "system", "sandbox/system").unwrap();
    let system_first = replace_symbol(&system_first, "scanner", "sandbox/scanner").unwrap();
    let scanner_first = replace_symbol(module.bytes(), "scanner", "sandbox/scanner").unwrap();
    let scanner_first = replace_symbol(&scanner_first, "system", "sandbox/system").unwrap();

    assert_eq!(system_first, scanner_first);
    assert!(
        scan_imports(&system_first)
            .unwrap()
            .iter()
            .all(|import| import.module.starts_with("sandbox/") && import.kind == ImportKind::Func)
    );
}

#[test]
fn test_module_without_imports_is_unchanged() {
    let module = compile(&fixture_source("silent.wat")).unwrap();
    let patched = replace_symbol(module.bytes(), "system", "sandbox/system").unwrap();
    assert_eq!(patched, module.bytes());
}
