//! Module-level symbol injection: the counter and threshold globals, the
//! rebound exceed import, and the wrapping entry function.
//!
//! Every lookup runs before the first mutation, so any failed precondition
//! leaves the module exactly as it came in.

use walrus::ir::Value;
use walrus::{
    ExportItem, FunctionBuilder, FunctionId, FunctionKind, GlobalId, ImportKind, InitExpr,
    Module, ValType,
};

use crate::error::{Error, Result};

pub const THRESHOLD_EXPORT: &str = "enclave_wasm_threshold";
pub const COUNTER_EXPORT: &str = "enclave_wasm_counter";
pub const WRAPPER_EXPORT: &str = "enclave_wasm_injected_main";
pub const ENTRY_EXPORT: &str = "enclave_wasm_main";
pub const EXCEED_IMPORT_MODULE: &str = "env";
pub const EXCEED_IMPORT_NAME: &str = "enclave_wasm_counter_exceed";

/// Handles to everything the injection added or rebound.
#[derive(Debug, Clone, Copy)]
pub struct InjectedSymbols {
    pub threshold: GlobalId,
    pub counter: GlobalId,
    pub wrapper: FunctionId,
    pub exceed: FunctionId,
}

pub fn inject(module: &mut Module) -> Result<InjectedSymbols> {
    for name in [THRESHOLD_EXPORT, COUNTER_EXPORT, WRAPPER_EXPORT] {
        ensure_name_unused(module, name)?;
    }

    let exceed = find_exceed_import(module)?;
    let entry = find_entry(module)?;

    let threshold = add_counter_global(module, THRESHOLD_EXPORT);
    let counter = add_counter_global(module, COUNTER_EXPORT);
    rebind_exceed_import(module, exceed)?;
    let wrapper = build_wrapper(module, threshold, entry);
    module.exports.add(WRAPPER_EXPORT, wrapper);

    log::debug!(
        "injected symbols: threshold {:?}, counter {:?}, wrapper {:?}, exceed {:?}",
        threshold,
        counter,
        wrapper,
        exceed
    );

    Ok(InjectedSymbols {
        threshold,
        counter,
        wrapper,
        exceed,
    })
}

/// Rejects a module that already uses one of the reserved names, either as an
/// export or as a name-section function name.
fn ensure_name_unused(module: &Module, name: &str) -> Result<()> {
    if module.exports.iter().any(|export| export.name == name) {
        return Err(Error::AlreadyInstrumented(format!(
            "export name `{name}` is already in use"
        )));
    }
    if module.funcs.by_name(name).is_some() {
        return Err(Error::AlreadyInstrumented(format!(
            "function name `{name}` is already in use"
        )));
    }
    Ok(())
}

fn find_exceed_import(module: &Module) -> Result<FunctionId> {
    let import_id = module
        .imports
        .find(EXCEED_IMPORT_MODULE, EXCEED_IMPORT_NAME)
        .ok_or_else(|| {
            Error::MissingImport(format!(
                "`{EXCEED_IMPORT_MODULE}.{EXCEED_IMPORT_NAME}` is not imported"
            ))
        })?;
    match module.imports.get(import_id).kind {
        ImportKind::Function(func) => Ok(func),
        _ => Err(Error::MissingImport(format!(
            "`{EXCEED_IMPORT_MODULE}.{EXCEED_IMPORT_NAME}` is imported but is not a function"
        ))),
    }
}

fn find_entry(module: &Module) -> Result<FunctionId> {
    let export = module
        .exports
        .iter()
        .find(|export| export.name == ENTRY_EXPORT)
        .ok_or_else(|| {
            Error::MissingEntry(format!("`{ENTRY_EXPORT}` is not exported"))
        })?;
    match export.item {
        ExportItem::Function(func) => Ok(func),
        _ => Err(Error::MissingEntry(format!(
            "`{ENTRY_EXPORT}` is exported but is not a function"
        ))),
    }
}

/// Adds one exported mutable i64 global initialised to zero. The fresh arena
/// id cannot be referenced by any pre-existing instruction.
fn add_counter_global(module: &mut Module, export_name: &str) -> GlobalId {
    let global = module
        .globals
        .add_local(ValType::I64, true, InitExpr::Value(Value::I64(0)));
    module.exports.add(export_name, global);
    global
}

/// Forces the exceed import onto the `() -> ()` signature the injected check
/// sequence calls it with. A module that declared it differently and calls
/// it with operands is caught by post-validation.
fn rebind_exceed_import(module: &mut Module, exceed: FunctionId) -> Result<()> {
    let unit = module.types.add(&[], &[]);
    match &mut module.funcs.get_mut(exceed).kind {
        FunctionKind::Import(import) => {
            import.ty = unit;
            Ok(())
        }
        _ => Err(Error::InvariantViolation(
            "exceed import resolved to a non-imported function".to_string(),
        )),
    }
}

/// Builds and appends the wrapping entry:
///
/// ```wat
/// (func (param i32 i32 i64) (result i32)
///   block
///     global.get $threshold
///     i64.eqz
///     br_if 0            ;; not set yet, continue below
///     i32.const 1        ;; already running
///     return
///     unreachable
///   end
///   local.get 2
///   global.set $threshold
///   local.get 0
///   local.get 1
///   call $enclave_wasm_main)
/// ```
///
/// The threshold is caller-supplied and single-shot: a second invocation
/// while it is still non-zero returns 1 without entering the user entry.
fn build_wrapper(module: &mut Module, threshold: GlobalId, entry: FunctionId) -> FunctionId {
    let mut builder = FunctionBuilder::new(
        &mut module.types,
        &[ValType::I32, ValType::I32, ValType::I64],
        &[ValType::I32],
    );
    builder.name(WRAPPER_EXPORT.to_string());

    let event_id_len = module.locals.add(ValType::I32);
    let event_data_len = module.locals.add(ValType::I32);
    let threshold_arg = module.locals.add(ValType::I64);

    builder
        .func_body()
        .block(None, |guard| {
            let not_set = guard.id();
            guard
                .global_get(threshold)
                .unop(walrus::ir::UnaryOp::I64Eqz)
                .br_if(not_set)
                .i32_const(1)
                .return_()
                .unreachable();
        })
        .local_get(threshold_arg)
        .global_set(threshold)
        .local_get(event_id_len)
        .local_get(event_data_len)
        .call(entry);

    builder.finish(
        vec![event_id_len, event_data_len, threshold_arg],
        &mut module.funcs,
    )
}
