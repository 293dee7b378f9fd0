//! Splices the counter-update-and-check sequence into every weighted block.
//!
//! Anchor choice is what keeps the accounting sound: a branch at the end of a
//! block, or inside either arm of an `if`, must not be able to skip the
//! update for work that already executed.

use std::collections::HashMap;

use walrus::ir::{BinaryOp, InstrSeqId};
use walrus::{InstrSeqBuilder, LocalFunction};

use crate::config::CounterCheck;
use crate::error::{Error, Result};
use crate::graph::{BlockKind, Graph};
use crate::symbols::InjectedSymbols;

struct Site {
    seq: InstrSeqId,
    position: usize,
    weight: u64,
}

/// Injects the counting sequence into each reachable block with a non-zero
/// weight. Idempotent per block; weights must have been computed first.
pub fn inject(
    graph: &mut Graph,
    func: &mut LocalFunction,
    symbols: &InjectedSymbols,
    check: CounterCheck,
) -> Result<()> {
    let mut sites = Vec::new();

    for id in graph.reachable() {
        let block = &graph[id];
        if block.counter_injected {
            continue;
        }
        if !block.weight_computed {
            return Err(Error::InvariantViolation(format!(
                "block {} of `{}` reached injection without a weight",
                id.index(),
                graph.func_name
            )));
        }
        if block.weight > 0 {
            // A dummy if block anchors before its opener: the branches inside
            // either arm would otherwise run before the update. A trailing
            // branch anchors just before itself; anything else appends.
            let position = if block.kind == BlockKind::If {
                block.start
            } else if block.terminator.is_some() {
                block.end - 1
            } else {
                block.end
            };
            sites.push(Site {
                seq: block.seq,
                position,
                weight: block.weight,
            });
        }
        graph[id].counter_injected = true;
    }

    // Apply per sequence in descending position so earlier recorded
    // positions stay valid while we insert.
    let mut by_seq: HashMap<InstrSeqId, Vec<(usize, u64)>> = HashMap::new();
    for site in sites {
        by_seq
            .entry(site.seq)
            .or_default()
            .push((site.position, site.weight));
    }

    let builder = func.builder_mut();
    for (seq, mut positions) in by_seq {
        positions.sort_by(|a, b| b.0.cmp(&a.0));
        for (position, weight) in positions {
            builder
                .instr_seq(seq)
                .block_at(position, None, |body| {
                    build_counting_block(body, weight, symbols, check);
                });
        }
    }

    Ok(())
}

/// The spliced sequence: add the block's weight to the counter, then either
/// continue (branch out of the wrapping block) or report the overrun.
fn build_counting_block(
    body: &mut InstrSeqBuilder,
    weight: u64,
    symbols: &InjectedSymbols,
    check: CounterCheck,
) {
    let within_limit = body.id();
    body.i64_const(weight as i64)
        .global_get(symbols.counter)
        .binop(BinaryOp::I64Add)
        .global_set(symbols.counter)
        .global_get(symbols.counter)
        .global_get(symbols.threshold)
        .binop(check.binop())
        .br_if(within_limit)
        .call(symbols.exceed);
}
