// cfg.rs - Control Flow Graph builder
//
// Splits a method body into basic blocks for the frame analysis. Positions
// are indices into the instruction list; labels have no width and open the
// block they start.

use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::label::Label;
use crate::model::TryCatch;
use crate::opcode::Opcode;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A control transfer out of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Ordinary jump or fall-through to a block start
    Flow(usize),
    /// Return point of a `JSR`, reached once the subroutine's return
    /// address is off the stack
    AfterJsr(usize),
}

/// A basic block of instructions
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Position of the first instruction
    pub start: usize,
    /// Position after the last instruction
    pub end: usize,
    /// Possible successors
    pub successors: Vec<Edge>,
    /// Execution runs past the last instruction of the body
    pub falls_off: bool,
}

/// A handler range resolved to positions
#[derive(Debug, Clone)]
pub struct HandlerRange {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub catch_type: Option<String>,
}

impl HandlerRange {
    pub fn covers(&self, position: usize) -> bool {
        self.start <= position && position < self.end
    }
}

/// Control flow graph
#[derive(Debug)]
pub struct ControlFlowGraph {
    /// Basic blocks by start position
    pub blocks: BTreeMap<usize, BasicBlock>,
    /// Position of every label in the body
    pub labels: HashMap<Label, usize>,
    pub handlers: Vec<HandlerRange>,
}

impl ControlFlowGraph {
    pub fn position(&self, label: &Label) -> Result<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::tree(format!("reference to undefined label '{}'", label.id())))
    }

    /// Block starts in body order
    pub fn block_starts(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks.keys().copied()
    }
}

/// Build the control flow graph of a method body
pub fn build(instructions: &[Instruction], handlers: &[TryCatch]) -> Result<ControlFlowGraph> {
    // Phase 1: Locate labels
    let labels = index_labels(instructions)?;
    let position = |label: &Label| {
        labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::tree(format!("reference to undefined label '{}'", label.id())))
    };

    let mut ranges = Vec::with_capacity(handlers.len());
    for tc in handlers {
        ranges.push(HandlerRange {
            start: position(&tc.start)?,
            end: position(&tc.end)?,
            handler: position(&tc.handler)?,
            catch_type: tc.catch_type.clone(),
        });
    }

    // Phase 2: Identify block boundaries
    let boundaries = find_block_boundaries(instructions, &ranges, &position)?;

    // Phase 3: Create basic blocks and link them
    let blocks = create_blocks(instructions, &boundaries, &position)?;

    Ok(ControlFlowGraph {
        blocks,
        labels,
        handlers: ranges,
    })
}

fn index_labels(instructions: &[Instruction]) -> Result<HashMap<Label, usize>> {
    let mut labels = HashMap::new();
    for (i, insn) in instructions.iter().enumerate() {
        if let Instruction::Label(label) = insn {
            if labels.insert(label.clone(), i).is_some() {
                return Err(Error::tree(format!(
                    "label '{}' is placed twice",
                    label.id()
                )));
            }
        }
    }
    Ok(labels)
}

/// Find positions that start new basic blocks
fn find_block_boundaries(
    instructions: &[Instruction],
    handlers: &[HandlerRange],
    position: &dyn Fn(&Label) -> Result<usize>,
) -> Result<BTreeSet<usize>> {
    let mut boundaries = BTreeSet::new();

    // First instruction is a boundary
    if !instructions.is_empty() {
        boundaries.insert(0);
    }

    for (i, insn) in instructions.iter().enumerate() {
        // Targets are block starts
        for target in insn.targets() {
            boundaries.insert(position(target)?);
        }

        // Terminators mark end of block, next instruction starts new block
        if insn.opcode().is_some_and(Opcode::is_terminator) && i + 1 < instructions.len() {
            boundaries.insert(i + 1);
        }
    }

    for range in handlers {
        boundaries.insert(range.handler);
        for edge in [range.start, range.end] {
            if edge < instructions.len() {
                boundaries.insert(edge);
            }
        }
    }

    Ok(boundaries)
}

/// Create basic blocks from boundaries and compute their successors
fn create_blocks(
    instructions: &[Instruction],
    boundaries: &BTreeSet<usize>,
    position: &dyn Fn(&Label) -> Result<usize>,
) -> Result<BTreeMap<usize, BasicBlock>> {
    let starts: Vec<usize> = boundaries.iter().copied().collect();

    // Positions just after a JSR, where subroutines return to
    let jsr_returns: Vec<usize> = instructions
        .iter()
        .enumerate()
        .filter(|(i, insn)| insn.opcode() == Some(Opcode::JSR) && i + 1 < instructions.len())
        .map(|(i, _)| i + 1)
        .collect();

    let mut blocks = BTreeMap::new();
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(instructions.len());
        let last = instructions[start..end]
            .iter()
            .rev()
            .find(|insn| insn.opcode().is_some());

        let mut successors = Vec::new();
        let mut falls_through = true;
        if let Some(insn) = last {
            match insn {
                Instruction::Jump(op, target) => {
                    let target = position(target)?;
                    if *op == Opcode::JSR {
                        successors.push(Edge::Flow(target));
                        if end < instructions.len() {
                            successors.push(Edge::AfterJsr(end));
                        }
                        falls_through = false;
                    } else {
                        successors.push(Edge::Flow(target));
                        falls_through = op.falls_through();
                    }
                }
                Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                    for target in insn.targets() {
                        let edge = Edge::Flow(position(target)?);
                        if !successors.contains(&edge) {
                            successors.push(edge);
                        }
                    }
                    falls_through = false;
                }
                Instruction::Var(Opcode::RET, _) => {
                    successors.extend(jsr_returns.iter().map(|&p| Edge::Flow(p)));
                    falls_through = false;
                }
                other => {
                    falls_through = other.opcode().map_or(true, Opcode::falls_through);
                }
            }
        }

        let mut falls_off = false;
        if falls_through {
            if end < instructions.len() {
                successors.push(Edge::Flow(end));
            } else if last.is_some() {
                falls_off = true;
            }
        }

        blocks.insert(
            start,
            BasicBlock {
                start,
                end,
                successors,
                falls_off,
            },
        );
    }

    Ok(blocks)
}
