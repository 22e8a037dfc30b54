//! BP-relative activation record bookkeeping for the routine being
//! generated.
//!
//! The record is fixed, high addresses to low:
//!
//! ```text
//! |  caller-pushed parameters  |  BP + 2*ptr + slot*ptr
//! |  return address            |  BP + ptr
//! |  saved caller BP           |  <- BP
//! |  automatic variables       |  BP - frame_size + offset
//! |  temporary spill slots     |  BP - slot*ptr
//! ```
//!
//! `enter` allocates everything below BP in one step; `ret imm` reclaims the
//! parameter bytes, so the callee pops its own arguments. Parameter and
//! frame byte counts are already rounded up to the pointer width by the
//! layout resolver.

use crate::compiler::error::GenError;
use crate::compiler::obj::{ObjectId, Registry};
use crate::result::Result;

use super::assembly::{Addr, Reg};
use super::Mode;

/// The frame of the routine currently being generated.
#[derive(Debug)]
pub struct Frame {
    routine: String,
    ptr: u64,
    param_bytes: u64,
    autos_bytes: u64,
    /// spill slots, one pointer width each; `true` marks a stored address
    slots: Vec<Option<(ObjectId, bool)>>,
}

impl Frame {
    pub fn build(registry: &Registry, rid: ObjectId, mode: Mode) -> Result<Frame> {
        let routine = registry.get(rid).as_routine()?;
        let label = registry.get(rid).label().to_string();

        let param_bytes = registry
            .get(routine.formals())
            .size()
            .ok_or_else(|| GenError::Unsized(label.clone()))?;
        let autos_bytes = registry
            .get(routine.autos())
            .size()
            .ok_or_else(|| GenError::Unsized(label.clone()))?;

        Ok(Frame {
            routine: label,
            ptr: mode.ptr_width(),
            param_bytes,
            autos_bytes,
            slots: vec![None; registry.get(rid).as_routine()?.concurrent_temps() as usize],
        })
    }

    /// Bytes `enter` must allocate: automatics plus the spill area.
    pub fn frame_size(&self) -> u64 {
        self.autos_bytes + self.slots.len() as u64 * self.ptr
    }

    /// Bytes of caller-pushed parameters, reclaimed by `ret`.
    pub fn param_bytes(&self) -> u64 {
        self.param_bytes
    }

    /// The address of the formal parameter at the given slot offset.
    pub fn param_addr(&self, slot_offset: u64) -> Addr {
        Addr::base(Reg::Bp, self.ptr).disp((2 * self.ptr + slot_offset) as i64)
    }

    /// The address of an automatic variable at the given member offset.
    pub fn auto_addr(&self, offset: u64) -> Addr {
        Addr::base(Reg::Bp, self.ptr).disp(offset as i64 - self.frame_size() as i64)
    }

    /// Reserve (or find) the spill slot of a temporary.
    pub fn spill(&mut self, obj: ObjectId, is_ref: bool) -> Result<Addr> {
        if let Some(slot) = self.slot_of(obj) {
            return Ok(self.slot_addr(slot));
        }
        for slot in 0..self.slots.len() {
            if self.slots[slot].is_none() {
                self.slots[slot] = Some((obj, is_ref));
                return Ok(self.slot_addr(slot));
            }
        }
        Err(GenError::SpillOverflow(self.routine.clone()).into())
    }

    /// Where a temporary was spilled, if it was, and whether the slot holds
    /// an address.
    pub fn spilled(&self, obj: ObjectId) -> Option<(Addr, bool)> {
        self.slot_of(obj)
            .map(|slot| (self.slot_addr(slot), self.slots[slot].map(|(_, r)| r).unwrap_or(false)))
    }

    /// Free a consumed temporary's slot.
    pub fn release(&mut self, obj: ObjectId) {
        for slot in self.slots.iter_mut() {
            if slot.map_or(false, |(o, _)| o == obj) {
                *slot = None;
            }
        }
    }

    fn slot_of(&self, obj: ObjectId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.map_or(false, |(o, _)| o == obj))
    }

    fn slot_addr(&self, slot: usize) -> Addr {
        Addr::base(Reg::Bp, self.ptr).disp(-(((slot + 1) as i64) * self.ptr as i64))
    }
}
