//! Alternate backend: closure-threaded code.
//!
//! Each instruction is compiled into a boxed closure with its operands baked in. Slot kinds are
//! checked once, at compile time, so execution works on raw 64-bit cells (`u32` zero-extended,
//! `f32`/`f64` stored as bits) without per-access tag checks. Semantics match [`crate::interp`]
//! exactly; both share [`crate::alu`].

use core::cell::RefCell;

use blockjit_il::{ExecContext, GuestAddr, IlBlock, Inst, MemoryInterface, SlotId};

use crate::alu;
use crate::error::{ExecError, IntegrityError};

enum Flow {
    Next,
    Exit(GuestAddr),
}

type Op<C> = Box<dyn Fn(&mut [u64], &mut C) -> Result<Flow, ExecError>>;

pub struct ThreadedBlock<C> {
    ops: Box<[Op<C>]>,
    regs: RefCell<Box<[u64]>>,
    inst_count: usize,
    cycle_count: u32,
}

impl<C> ThreadedBlock<C> {
    pub fn blank() -> Self {
        Self {
            ops: Box::default(),
            regs: RefCell::new(Box::default()),
            inst_count: 0,
            cycle_count: 0,
        }
    }

    pub fn inst_count(&self) -> usize {
        self.inst_count
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn slot_count(&self) -> usize {
        self.regs.borrow().len()
    }
}

impl<C: ExecContext + 'static> ThreadedBlock<C> {
    pub fn compile(il: &IlBlock<C>, cycle_count: u32) -> Result<Self, IntegrityError> {
        let live = live_len(il);
        validate(il, live)?;
        Ok(Self {
            ops: il.insts[..live].iter().map(|inst| compile_op(*inst)).collect(),
            regs: RefCell::new(vec![0; il.slots.len()].into_boxed_slice()),
            inst_count: il.insts.len(),
            cycle_count,
        })
    }

    pub fn execute(&self, entry: GuestAddr, cpu: &mut C) -> Result<GuestAddr, ExecError> {
        let mut regs = self
            .regs
            .try_borrow_mut()
            .map_err(|_| IntegrityError::BlockBusy { addr: entry })?;
        for op in self.ops.iter() {
            if let Flow::Exit(next) = op(&mut regs[..], cpu)? {
                return Ok(next);
            }
        }
        tracing::error!(inst_count = self.inst_count, "block does not jump out");
        Err(IntegrityError::MissingExit {
            inst_count: self.inst_count,
        }
        .into())
    }
}

/// Instructions up to and including the first `Jump`; nothing after it can run.
fn live_len<C>(il: &IlBlock<C>) -> usize {
    il.insts
        .iter()
        .position(|inst| matches!(inst, Inst::Jump { .. }))
        .map_or(il.insts.len(), |i| i + 1)
}

fn validate<C>(il: &IlBlock<C>, live: usize) -> Result<(), IntegrityError> {
    let slot_count = il.slots.len();
    let mut err = None;
    for inst in &il.insts[..live] {
        if let Inst::Discard { slot } = *inst {
            // Liveness marker: any kind, but the slot has to exist.
            if slot.index() >= slot_count {
                err = Some(IntegrityError::SlotOutOfRange { slot, slot_count });
            }
        } else {
            inst.visit_slots(|slot, expected| {
                if err.is_some() {
                    return;
                }
                err = match il.slots.get(slot.index()) {
                    None => Some(IntegrityError::SlotOutOfRange { slot, slot_count }),
                    Some(&declared) if declared != expected => Some(IntegrityError::SlotKind {
                        slot,
                        expected,
                        declared,
                    }),
                    Some(_) => None,
                };
            });
        }
        if let Some(err) = err.take() {
            tracing::error!(inst = ?inst, "{err}");
            return Err(err);
        }
    }
    Ok(())
}

fn unop<C: 'static>(slot: SlotId, f: impl Fn(u32) -> u32 + 'static) -> Op<C> {
    let s = slot.index();
    Box::new(move |r: &mut [u64], _: &mut C| {
        r[s] = u64::from(f(r[s] as u32));
        Ok(Flow::Next)
    })
}

fn binop<C: 'static>(src: SlotId, dst: SlotId, f: fn(u32, u32) -> u32) -> Op<C> {
    let (s, d) = (src.index(), dst.index());
    Box::new(move |r: &mut [u64], _: &mut C| {
        r[d] = u64::from(f(r[d] as u32, r[s] as u32));
        Ok(Flow::Next)
    })
}

fn set_if<C: 'static>(
    lhs: SlotId,
    rhs: Option<SlotId>,
    imm: u32,
    dst: SlotId,
    pred: fn(u32, u32) -> bool,
) -> Op<C> {
    let (l, d) = (lhs.index(), dst.index());
    let rhs = rhs.map(SlotId::index);
    Box::new(move |r: &mut [u64], _: &mut C| {
        let rv = rhs.map_or(imm, |i| r[i] as u32);
        if pred(r[l] as u32, rv) {
            r[d] |= 1;
        }
        Ok(Flow::Next)
    })
}

fn compile_op<C: ExecContext + 'static>(inst: Inst<C>) -> Op<C> {
    match inst {
        Inst::Fallback { handler, payload } => {
            Box::new(move |_: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                handler(cpu, payload);
                Ok(Flow::Next)
            })
        }
        Inst::Jump { addr } => {
            let a = addr.index();
            Box::new(move |r: &mut [u64], _: &mut C| Ok(Flow::Exit(r[a] as u32)))
        }
        Inst::Cmov {
            flag,
            expect,
            src,
            dst,
        } => {
            let (f, s, d) = (flag.index(), src.index(), dst.index());
            Box::new(move |r: &mut [u64], _: &mut C| {
                if alu::flag_matches(r[f] as u32, expect) {
                    r[d] = r[s];
                }
                Ok(Flow::Next)
            })
        }
        Inst::Cset {
            flag,
            expect,
            imm,
            dst,
        } => {
            let (f, d) = (flag.index(), dst.index());
            Box::new(move |r: &mut [u64], _: &mut C| {
                if alu::flag_matches(r[f] as u32, expect) {
                    r[d] = u64::from(imm);
                }
                Ok(Flow::Next)
            })
        }
        Inst::SetSlot { dst, imm } => unop(dst, move |_| imm),
        Inst::CallFunc { func, slot } => {
            let s = slot.index();
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                func(cpu, r[s] as u32);
                Ok(Flow::Next)
            })
        }

        Inst::Read16Const { dst, addr } => {
            let d = dst.index();
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(cpu.memory().read_16(addr)?);
                Ok(Flow::Next)
            })
        }
        Inst::Read32Const { dst, addr } => {
            let d = dst.index();
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(cpu.memory().read_32(addr)?);
                Ok(Flow::Next)
            })
        }
        Inst::Read16Slot { dst, addr } => {
            let (d, a) = (dst.index(), addr.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(cpu.memory().read_16(r[a] as u32)?);
                Ok(Flow::Next)
            })
        }
        Inst::Read32Slot { dst, addr } => {
            let (d, a) = (dst.index(), addr.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(cpu.memory().read_32(r[a] as u32)?);
                Ok(Flow::Next)
            })
        }
        Inst::Write16Slot { addr, src } => {
            let (a, s) = (addr.index(), src.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                cpu.memory().write_16(r[a] as u32, r[s] as u16)?;
                Ok(Flow::Next)
            })
        }
        Inst::Write32Slot { addr, src } => {
            let (a, s) = (addr.index(), src.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                cpu.memory().write_32(r[a] as u32, r[s] as u32)?;
                Ok(Flow::Next)
            })
        }
        Inst::ReadFloatSlot { dst, addr } => {
            let (d, a) = (dst.index(), addr.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(cpu.memory().read_float(r[a] as u32)?.to_bits());
                Ok(Flow::Next)
            })
        }
        Inst::WriteFloatSlot { addr, src } => {
            let (a, s) = (addr.index(), src.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                cpu.memory().write_float(r[a] as u32, f32::from_bits(r[s] as u32))?;
                Ok(Flow::Next)
            })
        }
        Inst::ReadDoubleSlot { dst, addr } => {
            let (d, a) = (dst.index(), addr.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = cpu.memory().read_double(r[a] as u32)?.to_bits();
                Ok(Flow::Next)
            })
        }
        Inst::WriteDoubleSlot { addr, src } => {
            let (a, s) = (addr.index(), src.index());
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                cpu.memory().write_double(r[a] as u32, f64::from_bits(r[s]))?;
                Ok(Flow::Next)
            })
        }
        Inst::SignExtend16 { slot } => unop(slot, alu::sign_extend_16),

        Inst::LoadSlot16 { dst, src } => {
            let d = dst.index();
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(src(cpu));
                Ok(Flow::Next)
            })
        }
        Inst::LoadSlot { dst, src } => {
            let d = dst.index();
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                r[d] = u64::from(src(cpu));
                Ok(Flow::Next)
            })
        }
        Inst::StoreSlot { src, dst } => {
            let s = src.index();
            Box::new(move |r: &mut [u64], cpu: &mut C| -> Result<Flow, ExecError> {
                dst(cpu, r[s] as u32);
                Ok(Flow::Next)
            })
        }

        Inst::Add { src, dst } => binop(src, dst, u32::wrapping_add),
        Inst::Sub { src, dst } => binop(src, dst, u32::wrapping_sub),
        Inst::AddConst { dst, imm } => unop(dst, move |v| v.wrapping_add(imm)),
        Inst::Xor { src, dst } => binop(src, dst, |a, b| a ^ b),
        Inst::XorConst { dst, imm } => unop(dst, move |v| v ^ imm),
        Inst::Mov { src, dst } => binop(src, dst, |_, b| b),
        Inst::And { src, dst } => binop(src, dst, |a, b| a & b),
        Inst::AndConst { dst, imm } => unop(dst, move |v| v & imm),
        Inst::Or { src, dst } => binop(src, dst, |a, b| a | b),
        Inst::OrConst { dst, imm } => unop(dst, move |v| v | imm),
        Inst::Not { slot } => unop(slot, |v| !v),
        Inst::Discard { .. } => Box::new(|_: &mut [u64], _: &mut C| Ok(Flow::Next)),
        Inst::SlotToBool { slot } => unop(slot, |v| u32::from(v != 0)),

        Inst::Shll { slot, amt } => unop(slot, move |v| alu::shll(v, amt)),
        Inst::Shar { slot, amt } => unop(slot, move |v| alu::shar(v, amt)),
        Inst::Shlr { slot, amt } => unop(slot, move |v| alu::shlr(v, amt)),

        Inst::SetGtUnsigned { lhs, rhs, dst } => set_if(lhs, Some(rhs), 0, dst, |a, b| a > b),
        Inst::SetGtSigned { lhs, rhs, dst } => set_if(lhs, Some(rhs), 0, dst, alu::gt_signed),
        Inst::SetGtSignedConst { lhs, imm, dst } => {
            set_if(lhs, None, imm as u32, dst, alu::gt_signed)
        }
        Inst::SetEq { lhs, rhs, dst } => set_if(lhs, Some(rhs), 0, dst, |a, b| a == b),
        Inst::SetGeUnsigned { lhs, rhs, dst } => set_if(lhs, Some(rhs), 0, dst, |a, b| a >= b),
        Inst::SetGeSigned { lhs, rhs, dst } => set_if(lhs, Some(rhs), 0, dst, alu::ge_signed),
        Inst::SetGeSignedConst { lhs, imm, dst } => {
            set_if(lhs, None, imm as u32, dst, alu::ge_signed)
        }

        Inst::MulU32 { lhs, rhs, dst } => {
            let (l, rr, d) = (lhs.index(), rhs.index(), dst.index());
            Box::new(move |r: &mut [u64], _: &mut C| {
                r[d] = u64::from((r[l] as u32).wrapping_mul(r[rr] as u32));
                Ok(Flow::Next)
            })
        }
        Inst::Shad { val, amt } => {
            let (v, a) = (val.index(), amt.index());
            Box::new(move |r: &mut [u64], _: &mut C| {
                r[v] = u64::from(alu::shad(r[v] as u32, r[a] as u32));
                Ok(Flow::Next)
            })
        }
    }
}
