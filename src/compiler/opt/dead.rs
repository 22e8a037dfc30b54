//! Removes dead temporaries and annotates immediate reuse.
//!
//! The pass is strictly block-local: liveness never propagates across block
//! boundaries. Temporaries cannot cross blocks by construction, so there is
//! nothing to propagate; named objects are simply assumed live at every
//! block exit. One backward walk per block does all the work:
//!
//! * instructions without a result mark their operands live;
//! * an instruction whose result is a dead temporary is deleted, and the
//!   temporary is discarded from the registry;
//! * a surviving result leaves the live set (walking backward, its lifetime
//!   begins here) and its operands enter it.
//!
//! The walk also records, per instruction, whether the result is consumed by
//! the instruction immediately after it; the generator uses that flag to keep
//! such values in a register instead of spilling them. As a byproduct the
//! pass knows the largest number of temporaries ever live at once in each
//! routine, which later sizes the spill area of the stack frame.

use std::collections::HashSet;

use log::debug;

use crate::compiler::error::{GenError, IrError};
use crate::compiler::ir::{Block, Op, Shape};
use crate::compiler::obj::{ObjectId, ObjectKind, Registry};
use crate::result::Result;

/// Run the dead-code pass over every routine in the unit.
pub fn eliminate(registry: &mut Registry) -> Result<()> {
    debug!("dead code: start");

    let routines: Vec<ObjectId> = registry
        .iter()
        .filter(|(_, obj)| matches!(obj.kind(), ObjectKind::Routine(_)))
        .map(|(id, _)| id)
        .collect();

    for rid in routines {
        let mut blocks = registry.get_mut(rid).as_routine_mut()?.take_blocks();

        let mut peak = 0;
        for block in blocks.iter_mut() {
            peak = peak.max(sweep(registry, block)?);
        }

        // a block of nothing but dead code disappears with it
        blocks.retain(|b| !b.is_empty());
        if blocks.is_empty() {
            let label = registry.get(rid).label().to_string();
            return Err(GenError::EmptyRoutine(label).into());
        }

        let routine = registry.get_mut(rid).as_routine_mut()?;
        routine.set_blocks(blocks);
        routine.set_concurrent_temps(peak);
    }

    registry.set_dead_pass_complete();
    debug!("dead code: stop");
    Ok(())
}

/// One backward walk over a single block. Returns the largest number of
/// temporaries live at any point in it.
fn sweep(registry: &mut Registry, block: &mut Block) -> Result<u32> {
    let mut live: HashSet<ObjectId> = HashSet::new();
    let mut next_consumes: Vec<ObjectId> = vec![];
    let mut peak = 0;

    let insts = block.instructions_mut();
    let mut idx = insts.len();
    while idx > 0 {
        idx -= 1;
        let inst = insts[idx];

        match inst.op.shape() {
            Shape::Effect => {
                for opnd in inst.left.iter().chain(inst.right.iter()) {
                    live.insert(*opnd);
                }
                // a call's result begins its lifetime here even when the
                // call itself is kept for effect
                if let Some(result) = inst.result {
                    live.remove(&result);
                }
            }
            shape => {
                let result = inst
                    .result
                    .ok_or_else(|| IrError::MalformedQuad(inst.op.mnemonic()))?;
                let left = inst
                    .left
                    .ok_or_else(|| IrError::MalformedQuad(inst.op.mnemonic()))?;
                if shape == Shape::Binary && inst.right.is_none() {
                    return Err(IrError::MalformedQuad(inst.op.mnemonic()).into());
                }

                // an assignment whose destination is a temporary stores
                // through a reference produced earlier in the block: the
                // result slot is a use, not a definition
                if inst.op == Op::Ass && registry.get(result).is_temp() {
                    live.insert(result);
                    live.insert(left);
                } else {
                    if registry.get(result).is_temp() && !live.contains(&result) {
                        // the result is never read: drop the temporary and
                        // the instruction that produces it
                        discard(registry, result);
                        insts.remove(idx);
                        continue;
                    }

                    live.remove(&result);
                    live.insert(left);
                    if let Some(right) = inst.right {
                        live.insert(right);
                    }
                }
            }
        }

        let reused = inst
            .result
            .map_or(false, |result| next_consumes.contains(&result));
        insts[idx].reused = reused;

        next_consumes.clear();
        next_consumes.extend(inst.left.iter().chain(inst.right.iter()));
        if inst.op == Op::Ass {
            // a store-through destination counts as consumed here too
            if let Some(result) = inst.result {
                if registry.get(result).is_temp() {
                    next_consumes.push(result);
                }
            }
        }

        let live_temps = live.iter().filter(|id| registry.get(**id).is_temp()).count() as u32;
        peak = peak.max(live_temps);
    }

    Ok(peak)
}

/// Drop a dead temporary from the registry.
fn discard(registry: &mut Registry, id: ObjectId) {
    let label = registry.get(id).label().to_string();
    if label.is_empty() || registry.remove(&label).is_err() {
        registry.remove_id(id);
    }
}
