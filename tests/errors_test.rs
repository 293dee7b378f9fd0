//! Error taxonomy tests: every rejected module comes back as the right error
//! kind, and the caller's bytes are never touched.

use wasm_counter::{instrument, Config, Error};
use wat::parse_str;

fn run(wat: &str) -> Result<Vec<u8>, Error> {
    let wasm = parse_str(wat).unwrap();
    instrument(&wasm, &Config::default())
}

#[test]
fn reserved_export_name_collision() {
    let result = run(
        r#"
        (module
            (import "env" "enclave_wasm_counter_exceed" (func))
            (global (export "enclave_wasm_counter") i64 (i64.const 0))
            (func (export "enclave_wasm_main") (param i32 i32) (result i32)
                i32.const 0
            )
        )
        "#,
    );
    assert!(matches!(result, Err(Error::AlreadyInstrumented(_))));
}

#[test]
fn reinstrumentation_is_rejected() {
    let wasm = parse_str(
        r#"
        (module
            (import "env" "enclave_wasm_counter_exceed" (func))
            (func (export "enclave_wasm_main") (param i32 i32) (result i32)
                i32.const 0
            )
        )
        "#,
    )
    .unwrap();
    let instrumented = instrument(&wasm, &Config::default()).unwrap();
    let result = instrument(&instrumented, &Config::default());
    assert!(matches!(result, Err(Error::AlreadyInstrumented(_))));
}

#[test]
fn missing_entry_export() {
    let result = run(
        r#"
        (module
            (import "env" "enclave_wasm_counter_exceed" (func))
            (func (export "some_other_main") (param i32 i32) (result i32)
                i32.const 0
            )
        )
        "#,
    );
    assert!(matches!(result, Err(Error::MissingEntry(_))));
}

#[test]
fn entry_export_of_wrong_kind() {
    let result = run(
        r#"
        (module
            (import "env" "enclave_wasm_counter_exceed" (func))
            (memory (export "enclave_wasm_main") 1)
        )
        "#,
    );
    assert!(matches!(result, Err(Error::MissingEntry(_))));
}

#[test]
fn missing_exceed_import() {
    let result = run(
        r#"
        (module
            (func (export "enclave_wasm_main") (param i32 i32) (result i32)
                i32.const 0
            )
        )
        "#,
    );
    assert!(matches!(result, Err(Error::MissingImport(_))));
}

#[test]
fn bulk_memory_is_unsupported() {
    let result = run(
        r#"
        (module
            (import "env" "enclave_wasm_counter_exceed" (func))
            (memory 1)
            (func (export "enclave_wasm_main") (param i32 i32) (result i32)
                i32.const 0
                i32.const 0
                i32.const 8
                memory.copy
                i32.const 0
            )
        )
        "#,
    );
    match result {
        Err(Error::UnsupportedFeature(name)) => assert_eq!(name, "memory.copy"),
        other => panic!("expected UnsupportedFeature, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn garbage_input_is_a_parse_error() {
    let result = instrument(b"not a wasm module", &Config::default());
    assert!(matches!(result, Err(Error::Parse(_))));
}
