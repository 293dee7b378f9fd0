//! Two-pass graph construction. Pass one cuts an instruction sequence into
//! maximal runs; pass two walks the runs bottom-to-top, threading the "block
//! we flow into next" descriptor backwards and recursing into structured
//! constructs.
//!
//! Walrus resolves WAT labels and numeric branch depths to `InstrSeqId`s at
//! parse time, so the scope stack binds sequence ids to their continuation.
//! A branch whose target sequence is not on the stack is malformed input.

use walrus::ir::{Instr, InstrSeqId};
use walrus::LocalFunction;

use crate::classify::{classify, Class, Opener, Terminator};
use crate::error::{Error, Result};
use crate::graph::{Block, BlockId, BlockKind, BrKind, Edge, Graph};

/// Where flow ends up: a block, or `None` for the function exit. `level`
/// remembers the scope-stack depth the descriptor was created at, which later
/// tells us which enclosing constructs an onward flow still has to leave.
#[derive(Debug, Clone, Copy)]
struct BrDest {
    block: Option<BlockId>,
    level: usize,
}

/// Scope-stack entry: branches targeting `seq` land at `dest`. For `block`
/// and `if` the destination is the continuation; for `loop` it is the loop
/// head itself.
#[derive(Debug, Clone, Copy)]
struct BrBinding {
    seq: InstrSeqId,
    dest: BrDest,
}

/// A tentative block from pass one: a half-open range of `seq` instructions.
struct Run {
    start: usize,
    end: usize,
    opener: Option<Opener>,
    terminator: Option<Terminator>,
}

pub(crate) fn build(func: &LocalFunction, func_name: String) -> Result<Graph> {
    let mut builder = GraphBuilder {
        func,
        graph: Graph::new(func_name),
        scope: Vec::new(),
    };

    let entry = func.entry_block();
    // Branches to the implicit function label leave the function.
    builder.scope.push(BrBinding {
        seq: entry,
        dest: BrDest { block: None, level: 0 },
    });
    let head = builder.build_seq(
        BlockKind::Func,
        entry,
        BrDest { block: None, level: 0 },
    )?;
    builder.graph.head = head;
    Ok(builder.graph)
}

struct GraphBuilder<'a> {
    func: &'a LocalFunction,
    graph: Graph,
    scope: Vec<BrBinding>,
}

impl<'a> GraphBuilder<'a> {
    /// Builds the graph of one instruction sequence and returns the block the
    /// sequence is entered through, or the continuation's block when the
    /// sequence contributes none.
    fn build_seq(
        &mut self,
        kind: BlockKind,
        seq: InstrSeqId,
        continuation: BrDest,
    ) -> Result<Option<BlockId>> {
        let runs = self.segment(seq)?;

        let mut head = continuation;
        for run in runs.iter().rev() {
            match run.opener {
                Some(Opener::Block) => {
                    let inner = self.inner_seq(seq, run.start);
                    self.scope.push(BrBinding { seq: inner, dest: head });
                    let inner_head = self.build_seq(BlockKind::Block, inner, head)?;
                    self.scope.pop();
                    if inner_head != head.block {
                        head = BrDest {
                            block: inner_head,
                            level: self.scope.len(),
                        };
                    }
                }
                Some(Opener::Loop) => {
                    let inner = self.inner_seq(seq, run.start);
                    let mut block = self.run_block(kind, seq, run);
                    block.is_loop_head = true;
                    let loop_head = self.graph.alloc(block);

                    // Branches to the loop label re-enter at the head.
                    self.scope.push(BrBinding {
                        seq: inner,
                        dest: BrDest {
                            block: Some(loop_head),
                            level: self.scope.len(),
                        },
                    });
                    let body_head = self.build_seq(BlockKind::Loop, inner, head)?;
                    self.scope.pop();

                    if body_head != head.block {
                        self.graph.add_child(
                            loop_head,
                            Edge {
                                branch: BrKind::Normal,
                                continuation: BrKind::Normal,
                                target: body_head,
                            },
                        );
                    } else {
                        // Empty body: the loop falls straight through to its
                        // continuation.
                        self.add_cont_child(loop_head, head);
                    }
                    head = BrDest {
                        block: Some(loop_head),
                        level: self.scope.len(),
                    };
                }
                Some(Opener::If) => {
                    head = self.build_if(seq, run, head)?;
                }
                None => {
                    head = self.build_plain(kind, seq, run, head)?;
                }
            }
        }

        Ok(head.block)
    }

    /// Builds both arms of an `if` and hangs them off a synthesized block
    /// holding just the opener. Inside either arm, a branch to the `if` label
    /// goes to the construct's continuation.
    fn build_if(&mut self, seq: InstrSeqId, run: &Run, head: BrDest) -> Result<BrDest> {
        let (consequent, alternative) =
            match &self.func.block(seq).instrs[run.start].0 {
                Instr::IfElse(if_else) => (if_else.consequent, if_else.alternative),
                other => {
                    return Err(Error::InvariantViolation(format!(
                        "expected an if opener, found {:?}",
                        other
                    )))
                }
            };

        let if_block = self.graph.alloc(self.run_block(BlockKind::If, seq, run));

        self.scope.push(BrBinding {
            seq: consequent,
            dest: head,
        });
        let then_head = self.build_seq(BlockKind::IfThen, consequent, head)?;
        self.scope.pop();
        let then_dest = if then_head != head.block {
            BrDest {
                block: then_head,
                level: self.scope.len(),
            }
        } else {
            head
        };

        self.scope.push(BrBinding {
            seq: alternative,
            dest: head,
        });
        let else_head = self.build_seq(BlockKind::IfElse, alternative, head)?;
        self.scope.pop();
        let else_dest = if else_head != head.block {
            BrDest {
                block: else_head,
                level: self.scope.len(),
            }
        } else {
            head
        };

        self.add_cont_child(if_block, then_dest);
        self.add_cont_child(if_block, else_dest);

        Ok(BrDest {
            block: Some(if_block),
            level: self.scope.len(),
        })
    }

    /// Materialises a plain run and wires its outgoing edges from the
    /// terminator (if any).
    fn build_plain(
        &mut self,
        kind: BlockKind,
        seq: InstrSeqId,
        run: &Run,
        head: BrDest,
    ) -> Result<BrDest> {
        let block = self.graph.alloc(self.run_block(kind, seq, run));

        match run.terminator {
            Some(Terminator::Br) => {
                let target = self.branch_target(seq, run.end - 1)?;
                let edge = self.find_br_dest(target)?;
                self.graph.add_child(block, edge);
            }
            Some(Terminator::BrIf) => {
                let target = self.branch_target(seq, run.end - 1)?;
                let edge = self.find_br_dest(target)?;
                self.graph.add_child(block, edge);
                // Fall-through when the condition is false.
                self.add_cont_child(block, head);
            }
            Some(Terminator::BrTable) => {
                let (targets, default) =
                    match &self.func.block(seq).instrs[run.end - 1].0 {
                        Instr::BrTable(table) => (table.blocks.to_vec(), table.default),
                        other => {
                            return Err(Error::InvariantViolation(format!(
                                "expected a br_table terminator, found {:?}",
                                other
                            )))
                        }
                    };
                for target in targets {
                    let edge = self.find_br_dest(target)?;
                    self.graph.add_child(block, edge);
                }
                let edge = self.find_br_dest(default)?;
                self.graph.add_child(block, edge);
            }
            Some(Terminator::Return) => {
                self.graph.add_child(
                    block,
                    Edge {
                        branch: BrKind::Normal,
                        continuation: BrKind::Normal,
                        target: None,
                    },
                );
            }
            None => {
                self.add_cont_child(block, head);
            }
        }

        Ok(BrDest {
            block: Some(block),
            level: self.scope.len(),
        })
    }

    /// Pass one: cut `seq` into runs. A structured opener always forms a
    /// single-instruction run; otherwise a run extends until just before the
    /// next opener, just after a branch, or the end of the sequence.
    fn segment(&self, seq: InstrSeqId) -> Result<Vec<Run>> {
        let instrs = &self.func.block(seq).instrs;
        let mut runs = Vec::new();
        let mut i = 0;
        while i < instrs.len() {
            let start = i;
            match classify(&instrs[i].0)? {
                Class::Opener(opener) => {
                    runs.push(Run {
                        start,
                        end: i + 1,
                        opener: Some(opener),
                        terminator: None,
                    });
                    i += 1;
                }
                _ => {
                    let mut terminator = None;
                    while i < instrs.len() {
                        match classify(&instrs[i].0)? {
                            Class::Opener(_) => break,
                            Class::Branch(t) => {
                                terminator = Some(t);
                                i += 1;
                                break;
                            }
                            Class::Plain => i += 1,
                        }
                    }
                    runs.push(Run {
                        start,
                        end: i,
                        opener: None,
                        terminator,
                    });
                }
            }
        }
        Ok(runs)
    }

    fn run_block(&self, kind: BlockKind, seq: InstrSeqId, run: &Run) -> Block {
        Block::new(kind, seq, run.start, run.end, run.opener, run.terminator)
    }

    fn inner_seq(&self, seq: InstrSeqId, index: usize) -> InstrSeqId {
        match &self.func.block(seq).instrs[index].0 {
            Instr::Block(block) => block.seq,
            Instr::Loop(loop_) => loop_.seq,
            _ => unreachable!("caller checked the opener kind"),
        }
    }

    fn branch_target(&self, seq: InstrSeqId, index: usize) -> Result<InstrSeqId> {
        match &self.func.block(seq).instrs[index].0 {
            Instr::Br(br) => Ok(br.block),
            Instr::BrIf(br_if) => Ok(br_if.block),
            other => Err(Error::InvariantViolation(format!(
                "expected a branch terminator, found {:?}",
                other
            ))),
        }
    }

    /// Resolves a branch target against the scope stack, classifying the
    /// branch by the loops it crosses on the way.
    fn find_br_dest(&self, target: InstrSeqId) -> Result<Edge> {
        let mut pass_loop = false;
        for binding in self.scope.iter().rev() {
            if binding.seq == target {
                return Ok(self.child_for_binding(binding, pass_loop));
            }
            pass_loop = pass_loop || self.is_loop_dest(binding.dest);
        }
        Err(Error::MalformedBranch(format!(
            "branch target {:?} is not in scope",
            target
        )))
    }

    fn child_for_binding(&self, binding: &BrBinding, pass_loop: bool) -> Edge {
        let out = if pass_loop {
            BrKind::OutOfLoop
        } else {
            BrKind::Normal
        };
        match binding.dest.block {
            None => Edge {
                branch: out,
                continuation: BrKind::Normal,
                target: None,
            },
            Some(target) if self.graph[target].is_loop_head => Edge {
                branch: BrKind::IntoLoop,
                continuation: BrKind::IntoLoop,
                target: Some(target),
            },
            Some(target) => Edge {
                branch: out,
                continuation: self.continuation_kind(binding.dest.level),
                target: Some(target),
            },
        }
    }

    /// Fall-through edge into the current continuation descriptor.
    fn add_cont_child(&mut self, parent: BlockId, dest: BrDest) {
        let edge = Edge {
            branch: BrKind::Normal,
            continuation: self.continuation_kind(dest.level),
            target: dest.block,
        };
        self.graph.add_child(parent, edge);
    }

    /// Whether flowing onwards from a destination created at `level` still
    /// leaves a loop: true iff any scope entered since then is a loop.
    fn continuation_kind(&self, level: usize) -> BrKind {
        let from = level.min(self.scope.len());
        if self.scope[from..]
            .iter()
            .any(|binding| self.is_loop_dest(binding.dest))
        {
            BrKind::OutOfLoop
        } else {
            BrKind::Normal
        }
    }

    fn is_loop_dest(&self, dest: BrDest) -> bool {
        dest.block
            .map_or(false, |block| self.graph[block].is_loop_head)
    }
}
