//! Static work-cost model. Every block gets the sum of its instructions'
//! costs; the runtime later adds that sum to the counter once per dynamic
//! execution of the block.

use std::collections::HashMap;

use walrus::ir::Instr;
use walrus::{FunctionId, ImportKind, LocalFunction, Module};

use crate::graph::Graph;

/// Per-instruction costs. Structure-only instructions (`block`, `loop`,
/// branches, `return`) cost nothing; they never execute work of their own.
#[derive(Debug, Clone)]
pub struct WeightPolicy {
    /// Cost of instruction kinds without an explicit entry.
    pub default_weight: u64,
    /// Cost of calling an imported function with no override, and of
    /// `call_indirect` (whose callee is unknown at rewrite time).
    pub call_weight: u64,
    /// Per-`(module, field)` overrides for imported functions.
    pub import_weights: HashMap<(String, String), u64>,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        let mut import_weights = HashMap::new();
        // The host logging call is an order of magnitude heavier than a plain
        // host round-trip.
        import_weights.insert(
            ("env".to_string(), "enclave_wasm_test_log".to_string()),
            10,
        );
        WeightPolicy {
            default_weight: 0,
            call_weight: 5,
            import_weights,
        }
    }
}

impl WeightPolicy {
    fn instr_weight(&self, instr: &Instr, imports: &ImportedFunctions) -> u64 {
        match instr {
            Instr::Unop(..)
            | Instr::Binop(..)
            | Instr::Const(..)
            | Instr::Drop(..)
            | Instr::GlobalGet(..)
            | Instr::GlobalSet(..)
            | Instr::LocalGet(..)
            | Instr::LocalSet(..)
            | Instr::LocalTee(..)
            | Instr::Load(..)
            | Instr::Store(..)
            | Instr::MemorySize(..) => 1,

            Instr::Select(..) | Instr::IfElse(..) => 3,

            Instr::MemoryGrow(..) => 10,

            Instr::Call(call) => self.call_cost(call.func, imports),
            Instr::CallIndirect(..) => self.call_weight,

            Instr::Block(..)
            | Instr::Loop(..)
            | Instr::Br(..)
            | Instr::BrIf(..)
            | Instr::BrTable(..)
            | Instr::Return(..) => 0,

            _ => self.default_weight,
        }
    }

    /// An in-module callee is instrumented on its own and costs nothing at
    /// the call site; an imported one costs its override or the default.
    fn call_cost(&self, func: FunctionId, imports: &ImportedFunctions) -> u64 {
        match imports.name_of(func) {
            Some(name) => self
                .import_weights
                .get(name)
                .copied()
                .unwrap_or(self.call_weight),
            None => 0,
        }
    }
}

/// Snapshot of the module's imported functions, taken before any function
/// body is rewritten.
#[derive(Debug)]
pub struct ImportedFunctions {
    names: HashMap<FunctionId, (String, String)>,
}

impl ImportedFunctions {
    pub fn snapshot(module: &Module) -> Self {
        let mut names = HashMap::new();
        for import in module.imports.iter() {
            if let ImportKind::Function(func) = import.kind {
                names.insert(func, (import.module.clone(), import.name.clone()));
            }
        }
        ImportedFunctions { names }
    }

    fn name_of(&self, func: FunctionId) -> Option<&(String, String)> {
        self.names.get(&func)
    }
}

/// Computes the weight of every block reachable from the graph head. Safe on
/// cyclic graphs: a block already weighed is not revisited.
pub fn compute(
    graph: &mut Graph,
    func: &LocalFunction,
    policy: &WeightPolicy,
    imports: &ImportedFunctions,
) {
    for id in graph.reachable() {
        let block = &graph[id];
        if block.weight_computed {
            continue;
        }
        let instrs = &func.block(block.seq).instrs;
        let weight = instrs[block.start..block.end]
            .iter()
            .map(|(instr, _)| policy.instr_weight(instr, imports))
            .sum();
        let block = &mut graph[id];
        block.weight = weight;
        block.weight_computed = true;
    }
}

