//! Basic blocks and the leader-based partitioner.

use std::fmt::Display;

use log::debug;

use crate::compiler::error::IrError;

use super::instruction::{Instruction, Op};

/// Basic Block
/// A maximal straight-line run of instructions with a single entry and a
/// single exit.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    instructions: Vec<Instruction>,
}

impl Block {
    fn from_instructions(instructions: Vec<Instruction>) -> Block {
        Block { instructions }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    pub fn first(&self) -> Option<&Instruction> {
        self.instructions.first()
    }

    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for inst in &self.instructions {
            f.write_fmt(format_args!("{}\n", inst))?
        }
        Ok(())
    }
}

/// Partition a routine's flat instruction stream into basic blocks.
///
/// Leaders are the first instruction, every label (a jump target), and every
/// instruction following a jump, conditional branch, call, or return.
/// Concatenating the returned blocks reproduces the input stream exactly.
pub fn partition(stream: Vec<Instruction>) -> Result<Vec<Block>, IrError> {
    if stream.is_empty() {
        return Err(IrError::EmptyStream);
    }

    let mut blocks = vec![];
    let mut current: Vec<Instruction> = vec![];

    for inst in stream {
        // entry points are leaders
        if inst.op == Op::Lbl && !current.is_empty() {
            blocks.push(Block::from_instructions(std::mem::take(&mut current)));
        }

        let ends = inst.op.ends_block();
        current.push(inst);

        // statements after exits are leaders
        if ends {
            blocks.push(Block::from_instructions(std::mem::take(&mut current)));
        }
    }

    if !current.is_empty() {
        blocks.push(Block::from_instructions(current));
    }

    debug!("partition: made {} blocks", blocks.len());
    Ok(blocks)
}
