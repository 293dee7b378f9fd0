//! Instruction classification. The counting pass only needs to know three
//! things about an instruction: does it open a structured construct, does it
//! redirect control flow, or is it plain straight-line work. Everything the
//! pass cannot account for (atomics, SIMD ops, bulk memory/table ops,
//! reference-type accessors) is rejected up front instead of being silently
//! miscounted.

use walrus::ir::Instr;

use crate::error::{Error, Result};

/// A structured construct opener. Each one starts a nested instruction
/// sequence with its own label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opener {
    Block,
    Loop,
    If,
}

/// A branching instruction that may only appear as the last instruction of a
/// basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Br,
    BrIf,
    BrTable,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Opener(Opener),
    Branch(Terminator),
    Plain,
}

/// Classifies a single instruction, failing on anything from an excluded
/// instruction family.
///
/// `call` and friends are deliberately `Plain`: a call returns to the next
/// instruction, so it never splits a basic block.
pub fn classify(instr: &Instr) -> Result<Class> {
    match instr {
        Instr::Block(..) => Ok(Class::Opener(Opener::Block)),
        Instr::Loop(..) => Ok(Class::Opener(Opener::Loop)),
        Instr::IfElse(..) => Ok(Class::Opener(Opener::If)),

        Instr::Br(..) => Ok(Class::Branch(Terminator::Br)),
        Instr::BrIf(..) => Ok(Class::Branch(Terminator::BrIf)),
        Instr::BrTable(..) => Ok(Class::Branch(Terminator::BrTable)),
        Instr::Return(..) => Ok(Class::Branch(Terminator::Return)),

        Instr::Call(..)
        | Instr::CallIndirect(..)
        | Instr::LocalGet(..)
        | Instr::LocalSet(..)
        | Instr::LocalTee(..)
        | Instr::GlobalGet(..)
        | Instr::GlobalSet(..)
        | Instr::Const(..)
        | Instr::Binop(..)
        | Instr::Unop(..)
        | Instr::Select(..)
        | Instr::Drop(..)
        | Instr::Load(..)
        | Instr::Store(..)
        | Instr::MemorySize(..)
        | Instr::MemoryGrow(..)
        | Instr::RefFunc(..)
        | Instr::Unreachable(..) => Ok(Class::Plain),

        other => Err(Error::UnsupportedFeature(instr_name(other))),
    }
}

/// True iff the instruction opens a `block`, `loop` or `if` construct.
pub fn is_structured_opener(instr: &Instr) -> Result<bool> {
    Ok(matches!(classify(instr)?, Class::Opener(_)))
}

/// True iff the instruction affects which basic block runs next: a structured
/// opener or a branch/return.
pub fn is_effective_control_flow(instr: &Instr) -> Result<bool> {
    Ok(!matches!(classify(instr)?, Class::Plain))
}

/// Stable display name for an instruction kind, used in error messages.
pub fn instr_name(instr: &Instr) -> &'static str {
    match instr {
        Instr::Block(..) => "block",
        Instr::Loop(..) => "loop",
        Instr::IfElse(..) => "if",
        Instr::Br(..) => "br",
        Instr::BrIf(..) => "br_if",
        Instr::BrTable(..) => "br_table",
        Instr::Return(..) => "return",
        Instr::Call(..) => "call",
        Instr::CallIndirect(..) => "call_indirect",
        Instr::LocalGet(..) => "local.get",
        Instr::LocalSet(..) => "local.set",
        Instr::LocalTee(..) => "local.tee",
        Instr::GlobalGet(..) => "global.get",
        Instr::GlobalSet(..) => "global.set",
        Instr::Const(..) => "const",
        Instr::Binop(..) => "binop",
        Instr::Unop(..) => "unop",
        Instr::Select(..) => "select",
        Instr::Drop(..) => "drop",
        Instr::Load(..) => "load",
        Instr::Store(..) => "store",
        Instr::MemorySize(..) => "memory.size",
        Instr::MemoryGrow(..) => "memory.grow",
        Instr::MemoryInit(..) => "memory.init",
        Instr::MemoryCopy(..) => "memory.copy",
        Instr::MemoryFill(..) => "memory.fill",
        Instr::DataDrop(..) => "data.drop",
        Instr::AtomicRmw(..) => "atomic.rmw",
        Instr::Cmpxchg(..) => "atomic.cmpxchg",
        Instr::AtomicNotify(..) => "atomic.notify",
        Instr::AtomicWait(..) => "atomic.wait",
        Instr::AtomicFence(..) => "atomic.fence",
        Instr::TableGet(..) => "table.get",
        Instr::TableSet(..) => "table.set",
        Instr::TableGrow(..) => "table.grow",
        Instr::TableSize(..) => "table.size",
        Instr::TableFill(..) => "table.fill",
        Instr::TableInit(..) => "table.init",
        Instr::TableCopy(..) => "table.copy",
        Instr::ElemDrop(..) => "elem.drop",
        Instr::RefNull(..) => "ref.null",
        Instr::RefIsNull(..) => "ref.is_null",
        Instr::RefFunc(..) => "ref.func",
        Instr::V128Bitselect(..) => "v128.bitselect",
        Instr::I8x16Swizzle(..) => "i8x16.swizzle",
        Instr::I8x16Shuffle(..) => "i8x16.shuffle",
        Instr::LoadSimd(..) => "v128.load_lane",
        _ => "unknown",
    }
}
