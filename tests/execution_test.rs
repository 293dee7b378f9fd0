//! End-to-end tests: run instrumented modules in wasmtime and observe the
//! counter, the threshold arming, and the exceed host call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wasmtime::{Engine, Instance, Linker, Module, Store, TypedFunc};

use wasm_counter::{instrument, Config, CounterCheck};

const STRAIGHT_LINE: &str = r#"
(module
    (import "env" "enclave_wasm_counter_exceed" (func))
    (func (export "enclave_wasm_main") (param i32 i32) (result i32)
        i32.const 7
        i32.const 5
        i32.add
        return
    )
)
"#;

const COUNTED_LOOP: &str = r#"
(module
    (import "env" "enclave_wasm_counter_exceed" (func))
    (func (export "enclave_wasm_main") (param i32 i32) (result i32)
        (local i32)
        loop $continue
            local.get 2
            i32.const 1
            i32.add
            local.set 2
            local.get 2
            i32.const 10
            i32.lt_s
            br_if $continue
        end
        local.get 2
        return
    )
)
"#;

struct Harness {
    store: Store<()>,
    instance: Instance,
    exceed_calls: Arc<AtomicUsize>,
}

impl Harness {
    /// Instruments the WAT module and instantiates it with a host exceed
    /// function that only counts its invocations.
    fn new(wat: &str, config: &Config) -> Harness {
        let wasm = wat::parse_str(wat).unwrap();
        let instrumented = instrument(&wasm, config).unwrap();

        let engine = Engine::default();
        let module = Module::new(&engine, &instrumented).unwrap();
        let mut store = Store::new(&engine, ());
        let mut linker: Linker<()> = Linker::new(&engine);

        let exceed_calls = Arc::new(AtomicUsize::new(0));
        let calls = exceed_calls.clone();
        linker
            .func_wrap("env", "enclave_wasm_counter_exceed", move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let instance = linker.instantiate(&mut store, &module).unwrap();
        Harness {
            store,
            instance,
            exceed_calls,
        }
    }

    fn entry(&mut self) -> TypedFunc<(i32, i32, i64), i32> {
        self.instance
            .get_typed_func::<(i32, i32, i64), i32>(
                &mut self.store,
                "enclave_wasm_injected_main",
            )
            .unwrap()
    }

    fn global(&mut self, name: &str) -> i64 {
        self.instance
            .get_global(&mut self.store, name)
            .unwrap()
            .get(&mut self.store)
            .i64()
            .unwrap()
    }
}

#[test]
fn wrapper_runs_entry_and_accumulates() {
    let mut harness = Harness::new(STRAIGHT_LINE, &Config::default());
    let entry = harness.entry();

    let result = entry.call(&mut harness.store, (0, 0, 1_000_000)).unwrap();
    assert_eq!(result, 12);
    assert_eq!(harness.global("enclave_wasm_counter"), 3);
    assert_eq!(harness.global("enclave_wasm_threshold"), 1_000_000);
    assert_eq!(harness.exceed_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn second_invocation_is_guarded() {
    let mut harness = Harness::new(STRAIGHT_LINE, &Config::default());
    let entry = harness.entry();

    let first = entry.call(&mut harness.store, (0, 0, 1_000_000)).unwrap();
    assert_eq!(first, 12);
    let counter_after_first = harness.global("enclave_wasm_counter");

    // The threshold is still armed, so the wrapper bails out with 1 and the
    // counter does not move.
    let second = entry.call(&mut harness.store, (0, 0, 5)).unwrap();
    assert_eq!(second, 1);
    assert_eq!(harness.global("enclave_wasm_counter"), counter_after_first);
    assert_eq!(harness.global("enclave_wasm_threshold"), 1_000_000);
}

#[test]
fn exceed_fires_above_threshold() {
    let mut harness = Harness::new(STRAIGHT_LINE, &Config::default());
    let entry = harness.entry();

    // Body weight is 3; a threshold of 2 is crossed by the single block.
    let result = entry.call(&mut harness.store, (0, 0, 2)).unwrap();
    assert_eq!(result, 12);
    assert_eq!(harness.exceed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.global("enclave_wasm_counter"), 3);
}

#[test]
fn threshold_boundary_is_inclusive_by_default() {
    // counter == threshold continues under the default le_u check.
    let mut harness = Harness::new(STRAIGHT_LINE, &Config::default());
    let entry = harness.entry();
    entry.call(&mut harness.store, (0, 0, 3)).unwrap();
    assert_eq!(harness.exceed_calls.load(Ordering::SeqCst), 0);

    // The same run under lt_u reports the overrun.
    let config = Config {
        check: CounterCheck::Less,
        ..Config::default()
    };
    let mut harness = Harness::new(STRAIGHT_LINE, &config);
    let entry = harness.entry();
    entry.call(&mut harness.store, (0, 0, 3)).unwrap();
    assert_eq!(harness.exceed_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn loop_iterations_are_charged_each_pass() {
    let mut harness = Harness::new(COUNTED_LOOP, &Config::default());
    let entry = harness.entry();

    let result = entry.call(&mut harness.store, (0, 0, 1_000_000)).unwrap();
    assert_eq!(result, 10);
    // Ten passes over the loop body (weight 7) plus the tail (weight 1).
    assert_eq!(harness.global("enclave_wasm_counter"), 71);
    assert_eq!(harness.exceed_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn counter_is_monotonic_across_observation_points() {
    let mut harness = Harness::new(COUNTED_LOOP, &Config::default());
    assert_eq!(harness.global("enclave_wasm_counter"), 0);

    let entry = harness.entry();
    entry.call(&mut harness.store, (0, 0, 50)).unwrap();
    let after_run = harness.global("enclave_wasm_counter");
    assert!(after_run >= 50);

    // The guarded second call adds nothing, and never subtracts.
    entry.call(&mut harness.store, (0, 0, 50)).unwrap();
    assert_eq!(harness.global("enclave_wasm_counter"), after_run);
}
