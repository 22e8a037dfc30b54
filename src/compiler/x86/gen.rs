//! Generates x86 assembler code from the portable program data.
//!
//! ## Code generation
//!
//! x86 instructions typically replace their left operand with the result.
//! Results are almost always temporaries, and a temporary is used at most
//! once, so the generator keeps the left operand and the result in the
//! accumulator and lets one instruction's output flow straight into the
//! next instruction's input.
//!
//! ## Register allocation
//!
//! Allocation is demand driven: a register is loaded only when an
//! instruction needs an operand there. A temporary that is not consumed by
//! the very next instruction cannot stay in the accumulator, so it is
//! pushed into a spill slot reserved for it in the frame; the liveness pass
//! already counted how many such slots a routine can ever need. Named
//! results are written back to their home location as they are produced, so
//! any named value sitting in a register is a clean copy that can simply be
//! overwritten. SI and DI hold the most recent base address of a compound
//! operand, which lets chained member and element accesses reuse the base
//! instead of recomputing it.

use std::io::Write;

use log::{debug, warn};
use stdext::function_name;

use crate::compiler::error::GenError;
use crate::compiler::ir::{Block, Instruction, Op};
use crate::compiler::layout;
use crate::compiler::obj::{ObjectId, ObjectKind, Registry, StorageClass};
use crate::result::Result;

use super::assembly::{write_assembly, Addr, Inst, Operand, Reg};
use super::frame::Frame;
use super::registers::RegisterFile;
use super::Mode;

macro_rules! trace {
    ($($arg:tt)*) => {
        log::trace!("[{}] {}", function_name!(), format_args!($($arg)*))
    };
}

/// Generate an x86 assembler file for the program data provided.
///
/// The registry must already be cleaned by the dead-code pass and fully
/// sized by the layout resolver. The whole unit is abandoned on the first
/// contract violation; a partial file must be discarded by the caller.
pub fn x86(out: &mut dyn Write, registry: &Registry, mode: Mode) -> Result<()> {
    mode.validate()?;
    debug!("x86: start");

    let mut gen = CodeGen {
        registry,
        mode,
        regs: RegisterFile::new(),
        frame: None,
        routine: String::new(),
        code: vec![],
    };

    gen.visibility();
    gen.declarations()?;
    gen.routines()?;
    gen.statics()?;

    write_assembly(out, &gen.code)?;
    debug!("x86: stop");
    Ok(())
}

struct CodeGen<'a> {
    registry: &'a Registry,
    mode: Mode,
    regs: RegisterFile,
    frame: Option<Frame>,
    routine: String,
    code: Vec<Inst>,
}

impl<'a> CodeGen<'a> {
    fn emit(&mut self, inst: Inst) {
        self.code.push(inst);
    }

    fn ptr(&self) -> u64 {
        self.mode.ptr_width()
    }

    fn word(&self) -> u64 {
        self.mode.word_width()
    }

    fn frame(&self) -> &Frame {
        self.frame.as_ref().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frame.as_mut().expect("no active frame")
    }

    fn size(&self, id: ObjectId) -> Result<u64> {
        self.registry
            .get(id)
            .size()
            .ok_or_else(|| GenError::Unsized(self.registry.get(id).to_string()).into())
    }

    /// The register width used when the object's value is operated on.
    fn width(&self, id: ObjectId) -> Result<u64> {
        let size = self.size(id)?;
        Ok(match size {
            1 | 2 | 4 | 8 => size,
            _ => self.word(),
        })
    }

    fn require(&self, slot: Option<ObjectId>, op: &'static str) -> Result<ObjectId> {
        slot.ok_or_else(|| {
            GenError::NullOperand {
                routine: self.routine.clone(),
                op,
            }
            .into()
        })
    }

    fn label_of(&self, id: ObjectId) -> String {
        self.registry.get(id).label().to_string()
    }

    /*********************** VISIBILITY AND DATA **************************/

    /// `global` and `extern` directives for every unit-level object.
    fn visibility(&mut self) {
        let registry = self.registry;
        for (id, obj) in registry.iter() {
            if !registry.is_indexed(id) {
                continue;
            }
            match obj.sclass() {
                Some(StorageClass::Public) => self.emit(Inst::Global(obj.label().into())),
                Some(StorageClass::Extern) => self.emit(Inst::Extern(obj.label().into())),
                _ => (),
            }
        }
    }

    /// Structure layout records, each with a size assertion against the
    /// computed aggregate size.
    fn declarations(&mut self) -> Result<()> {
        let registry = self.registry;
        for id in registry.ids() {
            let obj = registry.get(id);
            if !matches!(obj.kind(), ObjectKind::StructDef(_)) || !registry.is_indexed(id) {
                continue;
            }
            let mut fields = vec![];
            for member in obj.as_struct_def()?.members() {
                fields.push((self.label_of(*member), self.size(*member)?));
            }
            let size = self.size(id)?;
            self.emit(Inst::Struc {
                name: obj.label().into(),
                fields,
                size,
            });
        }
        Ok(())
    }

    /// Emit every static object: label, alignment, then contents.
    fn statics(&mut self) -> Result<()> {
        let registry = self.registry;

        self.emit(Inst::Section(".data"));
        for id in registry.ids() {
            let obj = registry.get(id);
            match obj.sclass() {
                Some(StorageClass::Private) | Some(StorageClass::Public) => (),
                _ => continue,
            }
            match obj.kind() {
                ObjectKind::Prime(p) => {
                    let value = p.value();
                    let width = self.size(id)?;
                    let align = layout::align_of(registry, id, self.mode)?;
                    self.emit(Inst::Align(align));
                    self.emit(Inst::Data {
                        label: obj.label().into(),
                        width,
                        value,
                    });
                }
                ObjectKind::Array(a) => {
                    if let Some(bytes) = a.literal() {
                        let bytes = bytes.to_vec();
                        let align = layout::align_of(registry, id, self.mode)?;
                        self.emit(Inst::Align(align));
                        self.emit(Inst::Bytes {
                            label: obj.label().into(),
                            bytes,
                        });
                    }
                }
                _ => (),
            }
        }

        self.emit(Inst::Section(".bss"));
        for id in registry.ids() {
            let obj = registry.get(id);
            match obj.sclass() {
                Some(StorageClass::Private) | Some(StorageClass::Public) => (),
                _ => continue,
            }
            let reserve = match obj.kind() {
                ObjectKind::Array(a) => a.literal().is_none(),
                ObjectKind::StructInst(_) => true,
                _ => false,
            };
            if reserve {
                let bytes = self.size(id)?;
                let align = layout::align_of(registry, id, self.mode)?;
                self.emit(Inst::Align(align));
                self.emit(Inst::Reserve {
                    label: obj.label().into(),
                    bytes,
                });
            }
        }
        Ok(())
    }

    /**************************** ROUTINES ********************************/

    fn routines(&mut self) -> Result<()> {
        self.emit(Inst::Section(".text"));
        let registry = self.registry;
        for id in registry.ids() {
            let obj = registry.get(id);
            if !matches!(obj.kind(), ObjectKind::Routine(_)) {
                continue;
            }
            match obj.sclass() {
                Some(StorageClass::Extern) => (),
                Some(StorageClass::Private) | Some(StorageClass::Public) => {
                    self.gen_routine(id)?;
                }
                class => {
                    return Err(GenError::WrongClass {
                        label: obj.label().into(),
                        class,
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Create and tear down one routine's activation record, lowering every
    /// block between the two.
    fn gen_routine(&mut self, rid: ObjectId) -> Result<()> {
        self.routine = self.label_of(rid);
        debug!("gen: routine {}", self.routine);

        // register contents never persist across procedure boundaries
        self.regs.clear_all();
        self.frame = Some(Frame::build(self.registry, rid, self.mode)?);

        self.emit(Inst::Label(self.routine.clone()));
        self.emit(Inst::Enter(self.frame().frame_size()));

        let blocks = self.registry.get(rid).as_routine()?.blocks().to_vec();
        if blocks.is_empty() {
            return Err(GenError::EmptyRoutine(self.routine.clone()).into());
        }
        for block in &blocks {
            self.gen_block(block)?;
        }

        // in case there was no explicit return; dead code otherwise
        let last = blocks.last().and_then(|b| b.last()).map(|i| i.op);
        if last != Some(Op::Rtrn) {
            self.emit(Inst::Leave);
            self.emit(Inst::Ret(self.frame().param_bytes()));
        }

        self.frame = None;
        Ok(())
    }

    fn gen_block(&mut self, block: &Block) -> Result<()> {
        trace!("block of {}", block.len());
        for inst in block.instructions() {
            self.gen_inst(inst)?;
        }
        // joining paths may disagree about register contents
        self.regs.clear_all();
        Ok(())
    }

    fn gen_inst(&mut self, inst: &Instruction) -> Result<()> {
        trace!("{}", inst);
        match inst.op {
            Op::Nop => (),

            Op::Ass => self.ass(inst)?,
            Op::Neg => self.unary(inst, Inst::Neg)?,
            Op::Not => self.unary(inst, Inst::Not)?,
            Op::Inc => self.unary(inst, Inst::Inc)?,
            Op::Dec => self.unary(inst, Inst::Dec)?,
            Op::Sz => self.size_const(inst)?,
            Op::Dref => self.dref(inst)?,

            Op::Add => self.binary(inst, Inst::Add)?,
            Op::Sub => self.binary(inst, Inst::Sub)?,
            Op::Band => self.binary(inst, Inst::And)?,
            Op::Bor => self.binary(inst, Inst::Or)?,
            Op::Xor => self.binary(inst, Inst::Xor)?,
            Op::Lsh => self.shift(inst, Inst::Shl)?,
            Op::Rsh => self.shift(inst, Inst::Shr)?,
            Op::Rol => self.shift(inst, Inst::Rol)?,
            Op::Ror => self.shift(inst, Inst::Ror)?,
            Op::Mul => self.mul(inst)?,
            Op::Div => self.divmod(inst, false)?,
            Op::Mod => self.divmod(inst, true)?,
            Op::Idx => self.idx(inst)?,
            Op::Memb => self.memb(inst)?,

            Op::Lbl => {
                let target = self.require(inst.left, "lbl")?;
                let label = self.label_of(target);
                self.emit(Inst::Label(label));
            }
            Op::Jmp => {
                let target = self.require(inst.left, "jmp")?;
                let label = self.label_of(target);
                self.emit(Inst::Jmp(label));
            }
            Op::Jz => self.jz(inst)?,
            Op::Parm => self.parm(inst)?,
            Op::Call => self.call_op(inst)?,
            Op::Rtrn => self.rtrn(inst)?,
        }

        self.cleanup(inst);
        Ok(())
    }

    /// Temporaries are consumed exactly once; whatever this instruction
    /// read is gone now.
    fn cleanup(&mut self, inst: &Instruction) {
        let mut consumed = vec![inst.left, inst.right];
        if inst.op == Op::Ass {
            // a temporary in the result slot was a store destination
            consumed.push(inst.result);
        }
        for id in consumed.into_iter().flatten() {
            if self.registry.get(id).is_temp() {
                self.regs.forget(id);
                if let Some(frame) = self.frame.as_mut() {
                    frame.release(id);
                }
            }
        }
    }

    /********************** OPERAND RESOLUTION ****************************/

    /// Resolve an operand to something an instruction can use, in priority
    /// order: a register holding the value, a register holding a reference,
    /// then a memory location derived from the storage class.
    fn resolve(&mut self, id: ObjectId) -> Result<Operand> {
        let w = self.width(id)?;

        if let Some(reg) = self.regs.find_val(id) {
            return Ok(Operand::Reg(reg, w));
        }
        if let Some(reg) = self.regs.find_ref(id) {
            return Ok(Operand::Mem(Addr::base(reg, self.ptr()), w));
        }
        if self.frame.is_some() {
            if let Some((slot, is_ref)) = self.frame().spilled(id) {
                if is_ref {
                    let base = self.pick_base()?;
                    let p = self.ptr();
                    self.emit(Inst::Mov(Operand::Reg(base, p), Operand::Mem(slot, p)));
                    self.regs.set_ref(base, id);
                    return Ok(Operand::Mem(Addr::base(base, p), w));
                }
                return Ok(Operand::Mem(slot, w));
            }
        }

        let obj = self.registry.get(id);
        match obj.sclass() {
            Some(StorageClass::Const) => Ok(Operand::Imm(obj.as_prime()?.value() as i64)),
            Some(c) if c.is_static() => Ok(Operand::Mem(Addr::label(obj.label()), w)),
            Some(StorageClass::Param) => {
                let offset = self
                    .registry
                    .get(id)
                    .offset()
                    .ok_or_else(|| GenError::Unsized(obj.to_string()))?;
                Ok(Operand::Mem(self.frame().param_addr(offset), w))
            }
            Some(StorageClass::Auto) => {
                let offset = self
                    .registry
                    .get(id)
                    .offset()
                    .ok_or_else(|| GenError::Unsized(obj.to_string()))?;
                Ok(Operand::Mem(self.frame().auto_addr(offset), w))
            }
            Some(StorageClass::Code) => Ok(Operand::Sym(obj.label().into())),
            Some(StorageClass::Member) | Some(StorageClass::Temp) => {
                Err(GenError::NoBase(obj.to_string()).into())
            }
            class => Err(GenError::WrongClass {
                label: obj.label().into(),
                class,
            }
            .into()),
        }
    }

    /// The address of a memory-resident object, for `lea` and base
    /// computation.
    fn addr_of(&mut self, id: ObjectId) -> Result<Addr> {
        if let Some(reg) = self.regs.find_ref(id) {
            return Ok(Addr::base(reg, self.ptr()));
        }
        if self.frame.is_some() {
            if let Some((slot, is_ref)) = self.frame().spilled(id) {
                if is_ref {
                    let base = self.pick_base()?;
                    let p = self.ptr();
                    self.emit(Inst::Mov(Operand::Reg(base, p), Operand::Mem(slot, p)));
                    self.regs.set_ref(base, id);
                    return Ok(Addr::base(base, p));
                }
                return Ok(slot);
            }
        }

        let obj = self.registry.get(id);
        match obj.sclass() {
            Some(c) if c.is_static() => Ok(Addr::label(obj.label())),
            Some(StorageClass::Auto) => {
                let offset = obj
                    .offset()
                    .ok_or_else(|| GenError::Unsized(obj.to_string()))?;
                Ok(self.frame().auto_addr(offset))
            }
            Some(StorageClass::Param) => {
                let offset = obj
                    .offset()
                    .ok_or_else(|| GenError::Unsized(obj.to_string()))?;
                Ok(self.frame().param_addr(offset))
            }
            _ => Err(GenError::NoBase(obj.to_string()).into()),
        }
    }

    /// The address a reference temporary points at.
    fn ref_addr(&mut self, id: ObjectId) -> Result<Addr> {
        if let Some(reg) = self.regs.find_ref(id) {
            return Ok(Addr::base(reg, self.ptr()));
        }
        if self.frame.is_some() {
            if let Some((slot, true)) = self.frame().spilled(id) {
                let base = self.pick_base()?;
                let p = self.ptr();
                self.emit(Inst::Mov(Operand::Reg(base, p), Operand::Mem(slot, p)));
                self.regs.set_ref(base, id);
                return Ok(Addr::base(base, p));
            }
        }
        Err(GenError::NoBase(self.registry.get(id).to_string()).into())
    }

    /// The home memory location of a named object.
    fn home_operand(&mut self, id: ObjectId) -> Result<Operand> {
        let w = self.width(id)?;
        let obj = self.registry.get(id);
        match obj.sclass() {
            Some(c) if c.is_static() => Ok(Operand::Mem(Addr::label(obj.label()), w)),
            Some(StorageClass::Auto) | Some(StorageClass::Param) => {
                let offset = obj
                    .offset()
                    .ok_or_else(|| GenError::Unsized(obj.to_string()))?;
                let addr = if obj.sclass() == Some(StorageClass::Auto) {
                    self.frame().auto_addr(offset)
                } else {
                    self.frame().param_addr(offset)
                };
                Ok(Operand::Mem(addr, w))
            }
            Some(StorageClass::Member) => {
                let addr = self.ref_addr(id)?;
                Ok(Operand::Mem(addr, w))
            }
            class => Err(GenError::WrongClass {
                label: obj.label().into(),
                class,
            }
            .into()),
        }
    }

    /// Load an object's value into a specific register.
    fn load(&mut self, reg: Reg, id: ObjectId) -> Result<()> {
        if self.regs.find_val(id) == Some(reg) {
            return Ok(());
        }
        let w = self.width(id)?;

        // already in another register: move it over
        if let Some(other) = self.regs.find_val(id) {
            self.emit(Inst::Mov(Operand::Reg(reg, w), Operand::Reg(other, w)));
            self.regs.clear(other);
            self.regs.set_val(reg, id);
            return Ok(());
        }

        self.stash(reg)?;
        let src = self.resolve(id)?;
        self.emit(Inst::Mov(Operand::Reg(reg, w), src));
        self.regs.set_val(reg, id);
        Ok(())
    }

    /// Make a register reusable. A pending temporary is written into its
    /// spill slot; a named value is a clean copy and is simply dropped.
    fn stash(&mut self, reg: Reg) -> Result<()> {
        if let Some((obj, is_ref)) = self.regs.holder(reg) {
            if self.registry.get(obj).is_temp() {
                trace!("stashing {} from {:?}", self.registry.get(obj), reg);
                let w = if is_ref { self.ptr() } else { self.width(obj)? };
                let slot = self.frame_mut().spill(obj, is_ref)?;
                self.emit(Inst::Mov(Operand::Mem(slot, w), Operand::Reg(reg, w)));
            }
            self.regs.clear(reg);
        }
        Ok(())
    }

    /// A right-hand operand usable directly by a two-operand instruction.
    /// Keeps the accumulator free for the left operand.
    fn rhs_operand(&mut self, id: ObjectId) -> Result<Operand> {
        match self.resolve(id)? {
            Operand::Reg(Reg::A, w) => {
                self.emit(Inst::Mov(Operand::Reg(Reg::C, w), Operand::Reg(Reg::A, w)));
                self.regs.clear(Reg::A);
                self.regs.set_val(Reg::C, id);
                Ok(Operand::Reg(Reg::C, w))
            }
            op => Ok(op),
        }
    }

    /// Pick a register for a compound base address.
    fn pick_base(&mut self) -> Result<Reg> {
        for reg in &[Reg::Si, Reg::Di] {
            if self.regs.holder(*reg).is_none() {
                return Ok(*reg);
            }
        }
        self.stash(Reg::Si)?;
        Ok(Reg::Si)
    }

    /// Requalify an operand to the width the instruction operates at.
    fn coerce(op: Operand, w: u64) -> Operand {
        match op {
            Operand::Reg(reg, _) => Operand::Reg(reg, w),
            Operand::Mem(addr, _) => Operand::Mem(addr, w),
            other => other,
        }
    }

    /*********************** RESULT PLACEMENT *****************************/

    /// Place a result that lowering left in the accumulator. A temporary
    /// consumed by the very next instruction stays put; anything else is
    /// written to memory now.
    fn persist_val(&mut self, inst: &Instruction) -> Result<()> {
        let result = match inst.result {
            Some(r) => r,
            None => return Ok(()),
        };
        let w = self.width(result)?;
        match self.registry.get(result).sclass() {
            Some(StorageClass::Temp) => {
                if !inst.reused {
                    trace!("spilling {}", self.registry.get(result));
                    let slot = self.frame_mut().spill(result, false)?;
                    self.emit(Inst::Mov(Operand::Mem(slot, w), Operand::Reg(Reg::A, w)));
                }
                Ok(())
            }
            Some(StorageClass::Param)
            | Some(StorageClass::Auto)
            | Some(StorageClass::Member)
            | Some(StorageClass::Private)
            | Some(StorageClass::Public)
            | Some(StorageClass::Extern) => {
                let home = self.home_operand(result)?;
                self.emit(Inst::Mov(home, Operand::Reg(Reg::A, w)));
                Ok(())
            }
            class => Err(GenError::WrongClass {
                label: self.registry.get(result).label().into(),
                class,
            }
            .into()),
        }
    }

    /// Place a reference result that lowering left in a base register.
    fn persist_ref(&mut self, inst: &Instruction, base: Reg) -> Result<()> {
        let result = match inst.result {
            Some(r) => r,
            None => return Ok(()),
        };
        if !self.registry.get(result).is_temp() {
            return Err(GenError::WrongClass {
                label: self.registry.get(result).label().into(),
                class: self.registry.get(result).sclass(),
            }
            .into());
        }
        if !inst.reused {
            let p = self.ptr();
            let slot = self.frame_mut().spill(result, true)?;
            self.emit(Inst::Mov(Operand::Mem(slot, p), Operand::Reg(base, p)));
        }
        Ok(())
    }

    /********************** INSTRUCTION LOWERING **************************/
    // Alphabetical

    /// Move the resolved source into the resolved destination.
    fn ass(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.require(inst.result, "ass")?;
        let left = self.require(inst.left, "ass")?;
        let rsize = self.size(result)?;
        let lsize = self.size(left)?;

        // anything wider than a machine word moves as a byte range
        if rsize > self.word() || lsize > self.word() {
            return self.block_copy(result, left);
        }

        if lsize > rsize {
            warn!(
                "narrowing assignment: {} into {}",
                self.registry.get(left),
                self.registry.get(result)
            );
        }
        let lsign = self.registry.get(left).as_prime().map(|p| p.is_signed());
        let rsign = self.registry.get(result).as_prime().map(|p| p.is_signed());
        if let (Ok(l), Ok(r)) = (lsign, rsign) {
            if l != r {
                warn!(
                    "signedness mismatch: {} into {}",
                    self.registry.get(left),
                    self.registry.get(result)
                );
            }
        }

        match self.registry.get(result).sclass() {
            // a temporary destination is a reference produced by idx/memb:
            // store through it
            Some(StorageClass::Temp) | Some(StorageClass::Member) => {
                self.load(Reg::A, left)?;
                let addr = self.ref_addr(result)?;
                self.emit(Inst::Mov(
                    Operand::Mem(addr, rsize),
                    Operand::Reg(Reg::A, rsize),
                ));
            }
            _ => {
                self.load(Reg::A, left)?;
                let home = self.home_operand(result)?;
                self.emit(Inst::Mov(home, Operand::Reg(Reg::A, rsize)));
                self.regs.set_val(Reg::A, result);
            }
        }
        Ok(())
    }

    /// Copy an object too large for a register, byte by byte.
    fn block_copy(&mut self, result: ObjectId, left: ObjectId) -> Result<()> {
        let rsize = self.size(result)?;
        let lsize = self.size(left)?;
        if rsize != lsize {
            warn!(
                "copying {} bytes between objects of {} and {} bytes",
                rsize.min(lsize),
                lsize,
                rsize
            );
        }

        let p = self.ptr();
        let dst = self.addr_of(result)?;
        self.emit(Inst::Lea(Operand::Reg(Reg::Di, p), dst));
        let src = self.addr_of(left)?;
        self.emit(Inst::Lea(Operand::Reg(Reg::Si, p), src));
        self.emit(Inst::Mov(
            Operand::Reg(Reg::C, p),
            Operand::Imm(rsize.min(lsize) as i64),
        ));
        self.emit(Inst::Cld);
        self.emit(Inst::RepMovsb);

        for reg in &[Reg::Si, Reg::Di, Reg::C] {
            self.regs.clear(*reg);
        }
        Ok(())
    }

    /// Most binary operations: destructive at the destination when the
    /// result overwrites the left operand, through the accumulator
    /// otherwise.
    fn binary(&mut self, inst: &Instruction, f: fn(Operand, Operand) -> Inst) -> Result<()> {
        let result = self.require(inst.result, "binary")?;
        let left = self.require(inst.left, "binary")?;
        let right = self.require(inst.right, "binary")?;
        let w = self.width(result)?;

        if inst.result == inst.left && !self.registry.get(result).is_temp() {
            let mut rhs = Self::coerce(self.rhs_operand(right)?, w);
            if let Operand::Mem(..) = rhs {
                // no x86 instruction takes two explicit memory operands
                self.load(Reg::C, right)?;
                rhs = Operand::Reg(Reg::C, w);
            }
            let home = self.home_operand(result)?;
            self.emit(f(home, rhs));
            self.regs.forget(result);
            return Ok(());
        }

        let rhs = Self::coerce(self.rhs_operand(right)?, w);
        self.load(Reg::A, left)?;
        self.emit(f(Operand::Reg(Reg::A, w), rhs));
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    /// Call a procedure. Arguments are already pushed; the callee's `ret`
    /// reclaims them, and the return value arrives in the accumulator.
    fn call_op(&mut self, inst: &Instruction) -> Result<()> {
        let proc = self.require(inst.left, "call")?;
        let label = self.label_of(proc);
        self.emit(Inst::Call(label));

        // nothing survives the callee
        self.regs.clear_all();

        if inst.result.is_some() {
            let result = self.require(inst.result, "call")?;
            self.regs.set_val(Reg::A, result);
            self.persist_val(inst)?;
        }
        Ok(())
    }

    /// Signed and unsigned division and modulus. The dividend widens into
    /// D:A before the divide; the quotient lands in A and the remainder
    /// in D.
    fn divmod(&mut self, inst: &Instruction, take_remainder: bool) -> Result<()> {
        let result = self.require(inst.result, "div")?;
        let left = self.require(inst.left, "div")?;
        let right = self.require(inst.right, "div")?;

        self.load(Reg::C, right)?;
        self.load(Reg::A, left)?;

        let w = self.width(left)?;
        let wr = self.width(right)?;
        let signed = self.is_signed(left) || self.is_signed(right);

        self.stash(Reg::D)?;
        if signed {
            self.emit(if w == 8 { Inst::Cqo } else { Inst::Cdq });
        } else {
            self.emit(Inst::Xor(Operand::Reg(Reg::D, w), Operand::Reg(Reg::D, w)));
        }
        self.emit(if signed {
            Inst::Idiv(Operand::Reg(Reg::C, wr))
        } else {
            Inst::Div(Operand::Reg(Reg::C, wr))
        });

        if take_remainder {
            let rw = self.width(result)?;
            self.emit(Inst::Mov(Operand::Reg(Reg::A, rw), Operand::Reg(Reg::D, rw)));
        }
        self.regs.clear(Reg::D);
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    /// Load through an address-holding register into the accumulator.
    fn dref(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.require(inst.result, "dref")?;
        let pointer = self.require(inst.left, "dref")?;
        let w = self.width(result)?;

        let addr = if self.regs.find_ref(pointer).is_some()
            || self
                .frame
                .as_ref()
                .and_then(|f| f.spilled(pointer))
                .map_or(false, |(_, is_ref)| is_ref)
        {
            self.ref_addr(pointer)?
        } else {
            // a pointer value: move it into a base register first
            let base = self.pick_base()?;
            self.load(base, pointer)?;
            Addr::base(base, self.ptr())
        };

        self.emit(Inst::Mov(Operand::Reg(Reg::A, w), Operand::Mem(addr, w)));
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    /// The address of an array element. Power-of-two element sizes use
    /// scaled-index addressing; anything else multiplies explicitly.
    fn idx(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.require(inst.result, "idx")?;
        let array = self.require(inst.left, "idx")?;
        let index = self.require(inst.right, "idx")?;

        let child = self
            .registry
            .get(array)
            .as_array()?
            .child()
            .ok_or_else(|| GenError::Unsized(self.registry.get(array).to_string()))?;
        let esize = self.size(child)?;
        let p = self.ptr();

        let mut addr = self.addr_of(array)?;
        if self.registry.get(index).sclass() == Some(StorageClass::Const) {
            let i = self.registry.get(index).as_prime()?.value();
            addr = addr.disp((i * esize) as i64);
        } else {
            self.load(Reg::A, index)?;
            if esize.is_power_of_two() && esize <= 8 {
                addr = addr.index(Reg::A, p, esize);
            } else {
                self.emit(Inst::ImulBy(Operand::Reg(Reg::A, p), esize as i64));
                addr = addr.index(Reg::A, p, 1);
            }
            self.regs.clear(Reg::A);
        }

        let base = self.pick_base()?;
        self.emit(Inst::Lea(Operand::Reg(base, p), addr));
        self.regs.set_ref(base, result);
        self.persist_ref(inst, base)
    }

    /// Jump if the condition is zero.
    fn jz(&mut self, inst: &Instruction) -> Result<()> {
        let target = self.require(inst.left, "jz")?;
        let cond = self.require(inst.right, "jz")?;
        let label = self.label_of(target);

        self.load(Reg::A, cond)?;
        let w = self.width(cond)?;
        self.emit(Inst::Test(Operand::Reg(Reg::A, w), Operand::Reg(Reg::A, w)));
        self.emit(Inst::Jz(label));
        Ok(())
    }

    /// The address of a structure member: the precomputed constant offset
    /// added to the resolved base address.
    fn memb(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.require(inst.result, "memb")?;
        let instance = self.require(inst.left, "memb")?;
        let member = self.require(inst.right, "memb")?;

        let offset = self
            .registry
            .get(member)
            .offset()
            .ok_or_else(|| GenError::Unsized(self.registry.get(member).to_string()))?;

        let p = self.ptr();
        let addr = self.addr_of(instance)?.disp(offset as i64);
        let base = self.pick_base()?;
        self.emit(Inst::Lea(Operand::Reg(base, p), addr));
        self.regs.set_ref(base, result);
        self.persist_ref(inst, base)
    }

    /// Signed and unsigned multiplication; the double-width product spans
    /// D:A.
    fn mul(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.require(inst.result, "mul")?;
        let left = self.require(inst.left, "mul")?;
        let right = self.require(inst.right, "mul")?;

        self.load(Reg::C, right)?;
        self.load(Reg::A, left)?;

        let wr = self.width(right)?;
        let signed = self.is_signed(left) || self.is_signed(right);
        self.stash(Reg::D)?;
        self.emit(if signed {
            Inst::Imul(Operand::Reg(Reg::C, wr))
        } else {
            Inst::Mul(Operand::Reg(Reg::C, wr))
        });

        // the upper half of the product clobbers D
        self.regs.clear(Reg::D);
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    /// Push one argument for an upcoming call, widened to a full parameter
    /// slot.
    fn parm(&mut self, inst: &Instruction) -> Result<()> {
        let value = self.require(inst.left, "parm")?;
        self.load(Reg::A, value)?;
        self.emit(Inst::Push(Operand::Reg(Reg::A, self.ptr())));
        Ok(())
    }

    /// Return from a routine, reclaiming its own parameter bytes.
    fn rtrn(&mut self, inst: &Instruction) -> Result<()> {
        if let Some(value) = inst.left {
            self.load(Reg::A, value)?;
        }
        self.emit(Inst::Leave);
        self.emit(Inst::Ret(self.frame().param_bytes()));
        Ok(())
    }

    /// Shifts and rotates. A non-constant count must sit in the counter
    /// register.
    fn shift(&mut self, inst: &Instruction, f: fn(Operand, Operand) -> Inst) -> Result<()> {
        let result = self.require(inst.result, "shift")?;
        let left = self.require(inst.left, "shift")?;
        let right = self.require(inst.right, "shift")?;
        let w = self.width(result)?;

        let count = if self.registry.get(right).sclass() == Some(StorageClass::Const) {
            Operand::Imm(self.registry.get(right).as_prime()?.value() as i64)
        } else {
            self.load(Reg::C, right)?;
            Operand::Reg(Reg::C, 1)
        };

        if inst.result == inst.left && !self.registry.get(result).is_temp() {
            let home = self.home_operand(result)?;
            self.emit(f(home, count));
            self.regs.forget(result);
            return Ok(());
        }

        self.load(Reg::A, left)?;
        self.emit(f(Operand::Reg(Reg::A, w), count));
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    /// The size of an operand is a compile-time constant, materialized as
    /// an immediate. It is never computed at run time.
    fn size_const(&mut self, inst: &Instruction) -> Result<()> {
        let result = self.require(inst.result, "sz")?;
        let arg = self.require(inst.left, "sz")?;
        let size = self.size(arg)?;
        let w = self.width(result)?;

        self.stash(Reg::A)?;
        self.emit(Inst::Mov(Operand::Reg(Reg::A, w), Operand::Imm(size as i64)));
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    /// Most unary operations: in place when the result overwrites the
    /// operand, through the accumulator otherwise.
    fn unary(&mut self, inst: &Instruction, f: fn(Operand) -> Inst) -> Result<()> {
        let result = self.require(inst.result, "unary")?;
        let left = self.require(inst.left, "unary")?;
        let w = self.width(result)?;

        if inst.result == inst.left && !self.registry.get(result).is_temp() {
            let home = self.home_operand(result)?;
            self.emit(f(home));
            self.regs.forget(result);
            return Ok(());
        }

        self.load(Reg::A, left)?;
        self.emit(f(Operand::Reg(Reg::A, w)));
        self.regs.set_val(Reg::A, result);
        self.persist_val(inst)
    }

    fn is_signed(&self, id: ObjectId) -> bool {
        self.registry
            .get(id)
            .as_prime()
            .map(|p| p.is_signed())
            .unwrap_or(false)
    }
}
