use walrus::ir::BinaryOp;

use crate::weights::WeightPolicy;

/// Comparison used by the injected check between the accumulated counter and
/// the threshold.
///
/// With `LessOrEqual` execution continues while `counter <= threshold`, so a
/// run whose cost lands exactly on the threshold finishes without signalling
/// the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterCheck {
    LessOrEqual,
    Less,
}

impl CounterCheck {
    pub(crate) fn binop(self) -> BinaryOp {
        match self {
            CounterCheck::LessOrEqual => BinaryOp::I64LeU,
            CounterCheck::Less => BinaryOp::I64LtU,
        }
    }
}

/// Knobs for one instrumentation pass.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub check: CounterCheck,
    pub weights: WeightPolicy,
}

impl Default for CounterCheck {
    fn default() -> Self {
        CounterCheck::LessOrEqual
    }
}
