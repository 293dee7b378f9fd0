//! Rewrites a WebAssembly module so that executing it tracks an abstract
//! work cost and reports the host as soon as the cost crosses a
//! caller-supplied threshold.
//!
//! To achieve this the following things are added to the module:
//! * Two exported mutable `i64` globals, `enclave_wasm_counter` and
//!   `enclave_wasm_threshold`, both starting at zero.
//! * A rebound `env.enclave_wasm_counter_exceed` host import with signature
//!   `() -> ()`, called whenever the counter crosses the threshold.
//! * An exported wrapping entry `enclave_wasm_injected_main :
//!   (i32, i32, i64) -> i32` that arms the threshold once and forwards to the
//!   module's `enclave_wasm_main`.
//! * A counter-update-and-check sequence in every basic block of every
//!   function, placed so no branch can skip the update for work that already
//!   ran.
//!
//! Callers hand in the raw module bytes and get fresh bytes back; on any
//! error the input is untouched.

pub mod classify;
pub mod config;
pub mod error;
pub mod graph;
pub mod inject;
pub mod symbols;
pub mod weights;

use walrus::{FunctionId, FunctionKind, Module};

pub use crate::config::{Config, CounterCheck};
pub use crate::error::Error;
pub use crate::graph::Graph;
pub use crate::symbols::InjectedSymbols;
pub use crate::weights::WeightPolicy;

/// Instruments a module and returns the rewritten bytes.
pub fn instrument(wasm: &[u8], config: &Config) -> Result<Vec<u8>, Error> {
    let (bytes, _) = instrument_with_graphs(wasm, config)?;
    Ok(bytes)
}

/// Instruments a module and additionally returns the control-flow graph
/// built for every rewritten function, in function order.
pub fn instrument_with_graphs(
    wasm: &[u8],
    config: &Config,
) -> Result<(Vec<u8>, Vec<Graph>), Error> {
    let mut module =
        Module::from_buffer(wasm).map_err(|error| Error::Parse(error.to_string()))?;

    let symbols = symbols::inject(&mut module)?;
    let imports = weights::ImportedFunctions::snapshot(&module);

    let local_funcs: Vec<FunctionId> =
        module.funcs.iter_local().map(|(id, _)| id).collect();

    let mut graphs = Vec::with_capacity(local_funcs.len());
    for (ordinal, func) in local_funcs.into_iter().enumerate() {
        // The wrapping entry arms the threshold; metering it would charge
        // every run for its own bookkeeping.
        if func == symbols.wrapper {
            continue;
        }
        let name = module
            .funcs
            .get(func)
            .name
            .clone()
            .unwrap_or_else(|| format!("func[{ordinal}]"));
        let local = match &mut module.funcs.get_mut(func).kind {
            FunctionKind::Local(local) => local,
            _ => continue,
        };

        log::debug!("instrumenting function `{name}`");
        let mut graph = graph::build(local, name)?;
        weights::compute(&mut graph, local, &config.weights, &imports);
        inject::inject(&mut graph, local, &symbols, config.check)?;
        graphs.push(graph);
    }

    let bytes = module.emit_wasm();
    wasmparser::validate(&bytes)
        .map_err(|error| Error::PostValidation(error.to_string()))?;

    log::info!("instrumented {} functions", graphs.len());
    Ok((bytes, graphs))
}
