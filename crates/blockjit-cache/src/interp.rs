//! Canonical execution backend: a tag-checked interpreter over a block's instruction stream.

use core::cell::RefCell;

use blockjit_il::{ExecContext, GuestAddr, IlBlock, Inst, MemoryInterface, SlotId};

use crate::alu;
use crate::error::{ExecError, IntegrityError};
use crate::slot::SlotStore;

pub struct IntpBlock<C> {
    insts: Box<[Inst<C>]>,
    slots: RefCell<SlotStore>,
    cycle_count: u32,
}

impl<C> IntpBlock<C> {
    /// Empty stream, no slots. Valid to hold in the cache; executing it reports a missing exit.
    pub fn blank() -> Self {
        Self {
            insts: Box::default(),
            slots: RefCell::new(SlotStore::default()),
            cycle_count: 0,
        }
    }

    /// Deep-copies `il`; the translator keeps ownership of its descriptor.
    pub fn compile(il: &IlBlock<C>, cycle_count: u32) -> Self {
        Self {
            insts: il.insts.as_slice().into(),
            slots: RefCell::new(SlotStore::new(&il.slots)),
            cycle_count,
        }
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Snapshot of the slot store, for debuggers and tests.
    pub fn slots(&self) -> SlotStore {
        self.slots.borrow().clone()
    }
}

impl<C: ExecContext> IntpBlock<C> {
    /// Runs the block and returns the guest address it jumps to. `entry` is only used for
    /// diagnostics.
    pub fn execute(&self, entry: GuestAddr, cpu: &mut C) -> Result<GuestAddr, ExecError> {
        let mut slots = self
            .slots
            .try_borrow_mut()
            .map_err(|_| IntegrityError::BlockBusy { addr: entry })?;
        run(&self.insts, &mut slots, cpu)
    }
}

#[inline]
fn binop(
    slots: &mut SlotStore,
    src: SlotId,
    dst: SlotId,
    f: fn(u32, u32) -> u32,
) -> Result<(), IntegrityError> {
    let rhs = slots.u32(src)?;
    let dst = slots.u32_mut(dst)?;
    *dst = f(*dst, rhs);
    Ok(())
}

#[inline]
fn unop(
    slots: &mut SlotStore,
    slot: SlotId,
    f: impl FnOnce(u32) -> u32,
) -> Result<(), IntegrityError> {
    let v = slots.u32_mut(slot)?;
    *v = f(*v);
    Ok(())
}

/// Comparison-set: ORs bit 0 into `dst` when `pred` holds, otherwise leaves `dst` alone.
#[inline]
fn set_if(
    slots: &mut SlotStore,
    lhs: u32,
    rhs: u32,
    dst: SlotId,
    pred: fn(u32, u32) -> bool,
) -> Result<(), IntegrityError> {
    let dst = slots.u32_mut(dst)?;
    if pred(lhs, rhs) {
        *dst |= 1;
    }
    Ok(())
}

fn run<C: ExecContext>(
    insts: &[Inst<C>],
    slots: &mut SlotStore,
    cpu: &mut C,
) -> Result<GuestAddr, ExecError> {
    for inst in insts {
        match *inst {
            Inst::Fallback { handler, payload } => handler(cpu, payload),
            Inst::Jump { addr } => return Ok(slots.u32(addr)?),
            Inst::Cmov {
                flag,
                expect,
                src,
                dst,
            } => {
                if alu::flag_matches(slots.u32(flag)?, expect) {
                    let v = slots.u32(src)?;
                    *slots.u32_mut(dst)? = v;
                }
            }
            Inst::Cset {
                flag,
                expect,
                imm,
                dst,
            } => {
                if alu::flag_matches(slots.u32(flag)?, expect) {
                    *slots.u32_mut(dst)? = imm;
                }
            }
            Inst::SetSlot { dst, imm } => *slots.u32_mut(dst)? = imm,
            Inst::CallFunc { func, slot } => func(cpu, slots.u32(slot)?),

            Inst::Read16Const { dst, addr } => {
                let v = cpu.memory().read_16(addr)?;
                *slots.u32_mut(dst)? = u32::from(v);
            }
            Inst::Read32Const { dst, addr } => {
                let v = cpu.memory().read_32(addr)?;
                *slots.u32_mut(dst)? = v;
            }
            Inst::Read16Slot { dst, addr } => {
                let v = cpu.memory().read_16(slots.u32(addr)?)?;
                *slots.u32_mut(dst)? = u32::from(v);
            }
            Inst::Read32Slot { dst, addr } => {
                let v = cpu.memory().read_32(slots.u32(addr)?)?;
                *slots.u32_mut(dst)? = v;
            }
            Inst::Write16Slot { addr, src } => {
                let (a, v) = (slots.u32(addr)?, slots.u32(src)?);
                cpu.memory().write_16(a, v as u16)?;
            }
            Inst::Write32Slot { addr, src } => {
                let (a, v) = (slots.u32(addr)?, slots.u32(src)?);
                cpu.memory().write_32(a, v)?;
            }
            Inst::ReadFloatSlot { dst, addr } => {
                let v = cpu.memory().read_float(slots.u32(addr)?)?;
                *slots.float_mut(dst)? = v;
            }
            Inst::WriteFloatSlot { addr, src } => {
                let (a, v) = (slots.u32(addr)?, *slots.float_mut(src)?);
                cpu.memory().write_float(a, v)?;
            }
            Inst::ReadDoubleSlot { dst, addr } => {
                let v = cpu.memory().read_double(slots.u32(addr)?)?;
                *slots.double_mut(dst)? = v;
            }
            Inst::WriteDoubleSlot { addr, src } => {
                let (a, v) = (slots.u32(addr)?, *slots.double_mut(src)?);
                cpu.memory().write_double(a, v)?;
            }
            Inst::SignExtend16 { slot } => unop(slots, slot, alu::sign_extend_16)?,

            Inst::LoadSlot16 { dst, src } => *slots.u32_mut(dst)? = u32::from(src(cpu)),
            Inst::LoadSlot { dst, src } => *slots.u32_mut(dst)? = src(cpu),
            Inst::StoreSlot { src, dst } => dst(cpu, slots.u32(src)?),

            Inst::Add { src, dst } => binop(slots, src, dst, u32::wrapping_add)?,
            Inst::Sub { src, dst } => binop(slots, src, dst, u32::wrapping_sub)?,
            Inst::AddConst { dst, imm } => unop(slots, dst, |v| v.wrapping_add(imm))?,
            Inst::Xor { src, dst } => binop(slots, src, dst, |a, b| a ^ b)?,
            Inst::XorConst { dst, imm } => unop(slots, dst, |v| v ^ imm)?,
            Inst::Mov { src, dst } => binop(slots, src, dst, |_, b| b)?,
            Inst::And { src, dst } => binop(slots, src, dst, |a, b| a & b)?,
            Inst::AndConst { dst, imm } => unop(slots, dst, |v| v & imm)?,
            Inst::Or { src, dst } => binop(slots, src, dst, |a, b| a | b)?,
            Inst::OrConst { dst, imm } => unop(slots, dst, |v| v | imm)?,
            Inst::Not { slot } => unop(slots, slot, |v| !v)?,
            Inst::Discard { slot } => {
                if slots.get(slot).is_none() {
                    return Err(IntegrityError::SlotOutOfRange {
                        slot,
                        slot_count: slots.len(),
                    }
                    .into());
                }
            }
            Inst::SlotToBool { slot } => unop(slots, slot, |v| u32::from(v != 0))?,

            Inst::Shll { slot, amt } => unop(slots, slot, |v| alu::shll(v, amt))?,
            Inst::Shar { slot, amt } => unop(slots, slot, |v| alu::shar(v, amt))?,
            Inst::Shlr { slot, amt } => unop(slots, slot, |v| alu::shlr(v, amt))?,

            Inst::SetGtUnsigned { lhs, rhs, dst } => {
                let (l, r) = (slots.u32(lhs)?, slots.u32(rhs)?);
                set_if(slots, l, r, dst, |a, b| a > b)?;
            }
            Inst::SetGtSigned { lhs, rhs, dst } => {
                let (l, r) = (slots.u32(lhs)?, slots.u32(rhs)?);
                set_if(slots, l, r, dst, alu::gt_signed)?;
            }
            Inst::SetGtSignedConst { lhs, imm, dst } => {
                let l = slots.u32(lhs)?;
                set_if(slots, l, imm as u32, dst, alu::gt_signed)?;
            }
            Inst::SetEq { lhs, rhs, dst } => {
                let (l, r) = (slots.u32(lhs)?, slots.u32(rhs)?);
                set_if(slots, l, r, dst, |a, b| a == b)?;
            }
            Inst::SetGeUnsigned { lhs, rhs, dst } => {
                let (l, r) = (slots.u32(lhs)?, slots.u32(rhs)?);
                set_if(slots, l, r, dst, |a, b| a >= b)?;
            }
            Inst::SetGeSigned { lhs, rhs, dst } => {
                let (l, r) = (slots.u32(lhs)?, slots.u32(rhs)?);
                set_if(slots, l, r, dst, alu::ge_signed)?;
            }
            Inst::SetGeSignedConst { lhs, imm, dst } => {
                let l = slots.u32(lhs)?;
                set_if(slots, l, imm as u32, dst, alu::ge_signed)?;
            }

            Inst::MulU32 { lhs, rhs, dst } => {
                let v = slots.u32(lhs)?.wrapping_mul(slots.u32(rhs)?);
                *slots.u32_mut(dst)? = v;
            }
            Inst::Shad { val, amt } => {
                let amt = slots.u32(amt)?;
                unop(slots, val, |v| alu::shad(v, amt))?;
            }
        }
    }

    // Every block has to end by jumping out.
    tracing::error!(inst_count = insts.len(), "block does not jump out");
    Err(IntegrityError::MissingExit {
        inst_count: insts.len(),
    }
    .into())
}
