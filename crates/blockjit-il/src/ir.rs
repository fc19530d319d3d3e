use core::fmt;

use crate::GuestAddr;

/// Declared kind of a block-local slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    U32,
    Float,
    Double,
}

/// Index of a slot within one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Handler for a guest instruction the IL does not translate. Receives the raw instruction word.
pub type FallbackFn<C> = fn(&mut C, u32);
/// Helper invoked with the value of a slot.
pub type CallFn<C> = fn(&mut C, u32);
/// Reads a 32-bit location in the CPU context (e.g. a guest register).
pub type LoadFn<C> = fn(&C) -> u32;
/// Reads a 16-bit location in the CPU context.
pub type LoadFn16<C> = fn(&C) -> u16;
/// Writes a 32-bit location in the CPU context.
pub type StoreFn<C> = fn(&mut C, u32);

/// One translated instruction.
///
/// Every integer op works on 32-bit slot contents with wraparound. The `Set*` comparison ops only
/// ever *set* bit 0 of `dst`; a false comparison leaves `dst` untouched, so the translator has to
/// clear the destination beforehand.
pub enum Inst<C> {
    /// Run `handler(cpu, payload)`.
    Fallback { handler: FallbackFn<C>, payload: u32 },
    /// Leave the block; the next guest address is held in `addr`.
    Jump { addr: SlotId },
    /// `if (flag & 1) == expect { dst = src }`
    Cmov {
        flag: SlotId,
        expect: bool,
        src: SlotId,
        dst: SlotId,
    },
    /// `if (flag & 1) == expect { dst = imm }`
    Cset {
        flag: SlotId,
        expect: bool,
        imm: u32,
        dst: SlotId,
    },
    SetSlot { dst: SlotId, imm: u32 },
    CallFunc { func: CallFn<C>, slot: SlotId },

    Read16Const { dst: SlotId, addr: GuestAddr },
    Read32Const { dst: SlotId, addr: GuestAddr },
    Read16Slot { dst: SlotId, addr: SlotId },
    Read32Slot { dst: SlotId, addr: SlotId },
    Write16Slot { addr: SlotId, src: SlotId },
    Write32Slot { addr: SlotId, src: SlotId },
    ReadFloatSlot { dst: SlotId, addr: SlotId },
    WriteFloatSlot { addr: SlotId, src: SlotId },
    ReadDoubleSlot { dst: SlotId, addr: SlotId },
    WriteDoubleSlot { addr: SlotId, src: SlotId },
    SignExtend16 { slot: SlotId },

    LoadSlot16 { dst: SlotId, src: LoadFn16<C> },
    LoadSlot { dst: SlotId, src: LoadFn<C> },
    StoreSlot { src: SlotId, dst: StoreFn<C> },

    Add { src: SlotId, dst: SlotId },
    Sub { src: SlotId, dst: SlotId },
    AddConst { dst: SlotId, imm: u32 },
    Xor { src: SlotId, dst: SlotId },
    XorConst { dst: SlotId, imm: u32 },
    Mov { src: SlotId, dst: SlotId },
    And { src: SlotId, dst: SlotId },
    AndConst { dst: SlotId, imm: u32 },
    Or { src: SlotId, dst: SlotId },
    OrConst { dst: SlotId, imm: u32 },
    Not { slot: SlotId },
    /// Marks `slot` dead. No runtime effect.
    Discard { slot: SlotId },
    /// `slot = (slot != 0) as u32`
    SlotToBool { slot: SlotId },

    Shll { slot: SlotId, amt: u32 },
    Shar { slot: SlotId, amt: u32 },
    Shlr { slot: SlotId, amt: u32 },

    SetGtUnsigned { lhs: SlotId, rhs: SlotId, dst: SlotId },
    SetGtSigned { lhs: SlotId, rhs: SlotId, dst: SlotId },
    SetGtSignedConst { lhs: SlotId, imm: i32, dst: SlotId },
    SetEq { lhs: SlotId, rhs: SlotId, dst: SlotId },
    SetGeUnsigned { lhs: SlotId, rhs: SlotId, dst: SlotId },
    SetGeSigned { lhs: SlotId, rhs: SlotId, dst: SlotId },
    SetGeSignedConst { lhs: SlotId, imm: i32, dst: SlotId },

    MulU32 { lhs: SlotId, rhs: SlotId, dst: SlotId },
    /// Dynamic arithmetic shift: `amt >= 0` shifts `val` left, `amt < 0` shifts it right
    /// arithmetically by `-amt`.
    Shad { val: SlotId, amt: SlotId },
}

// Manual impls: a derive would require `C: Clone`, but fn pointers are `Copy` for any `C`.
impl<C> Clone for Inst<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Inst<C> {}

impl<C> fmt::Debug for Inst<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        let mut first = true;
        let mut res = Ok(());
        self.visit_slots(|slot, _| {
            if res.is_ok() {
                res = write!(f, "{}{slot}", if first { " " } else { ", " });
                first = false;
            }
        });
        res
    }
}

impl<C> Inst<C> {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Fallback { .. } => "fallback",
            Self::Jump { .. } => "jump",
            Self::Cmov { .. } => "cmov",
            Self::Cset { .. } => "cset",
            Self::SetSlot { .. } => "set_slot",
            Self::CallFunc { .. } => "call_func",
            Self::Read16Const { .. } => "read_16_constaddr",
            Self::Read32Const { .. } => "read_32_constaddr",
            Self::Read16Slot { .. } => "read_16_slot",
            Self::Read32Slot { .. } => "read_32_slot",
            Self::Write16Slot { .. } => "write_16_slot",
            Self::Write32Slot { .. } => "write_32_slot",
            Self::ReadFloatSlot { .. } => "read_float_slot",
            Self::WriteFloatSlot { .. } => "write_float_slot",
            Self::ReadDoubleSlot { .. } => "read_double_slot",
            Self::WriteDoubleSlot { .. } => "write_double_slot",
            Self::SignExtend16 { .. } => "sign_extend_16",
            Self::LoadSlot16 { .. } => "load_slot16",
            Self::LoadSlot { .. } => "load_slot",
            Self::StoreSlot { .. } => "store_slot",
            Self::Add { .. } => "add",
            Self::Sub { .. } => "sub",
            Self::AddConst { .. } => "add_const32",
            Self::Xor { .. } => "xor",
            Self::XorConst { .. } => "xor_const32",
            Self::Mov { .. } => "mov",
            Self::And { .. } => "and",
            Self::AndConst { .. } => "and_const32",
            Self::Or { .. } => "or",
            Self::OrConst { .. } => "or_const32",
            Self::Not { .. } => "not",
            Self::Discard { .. } => "discard_slot",
            Self::SlotToBool { .. } => "slot_to_bool",
            Self::Shll { .. } => "shll",
            Self::Shar { .. } => "shar",
            Self::Shlr { .. } => "shlr",
            Self::SetGtUnsigned { .. } => "set_gt_unsigned",
            Self::SetGtSigned { .. } => "set_gt_signed",
            Self::SetGtSignedConst { .. } => "set_gt_signed_const",
            Self::SetEq { .. } => "set_eq",
            Self::SetGeUnsigned { .. } => "set_ge_unsigned",
            Self::SetGeSigned { .. } => "set_ge_signed",
            Self::SetGeSignedConst { .. } => "set_ge_signed_const",
            Self::MulU32 { .. } => "mul_u32",
            Self::Shad { .. } => "shad",
        }
    }

    /// Visits every slot operand together with the kind the op accesses it as.
    ///
    /// `Discard` reports its slot as `U32` even though it never reads it. Callers that check
    /// kinds should only check that a discarded slot exists.
    pub fn visit_slots(&self, mut f: impl FnMut(SlotId, SlotKind)) {
        use SlotKind::{Double, Float, U32};
        match *self {
            Self::Fallback { .. } => {}
            Self::Jump { addr } => f(addr, U32),
            Self::Cmov { flag, src, dst, .. } => {
                f(flag, U32);
                f(src, U32);
                f(dst, U32);
            }
            Self::Cset { flag, dst, .. } => {
                f(flag, U32);
                f(dst, U32);
            }
            Self::SetSlot { dst, .. }
            | Self::Read16Const { dst, .. }
            | Self::Read32Const { dst, .. }
            | Self::LoadSlot16 { dst, .. }
            | Self::LoadSlot { dst, .. }
            | Self::AddConst { dst, .. }
            | Self::XorConst { dst, .. }
            | Self::AndConst { dst, .. }
            | Self::OrConst { dst, .. } => f(dst, U32),
            Self::CallFunc { slot, .. }
            | Self::SignExtend16 { slot }
            | Self::Not { slot }
            | Self::Discard { slot }
            | Self::SlotToBool { slot }
            | Self::Shll { slot, .. }
            | Self::Shar { slot, .. }
            | Self::Shlr { slot, .. } => f(slot, U32),
            Self::StoreSlot { src, .. } => f(src, U32),
            Self::Read16Slot { dst, addr } | Self::Read32Slot { dst, addr } => {
                f(addr, U32);
                f(dst, U32);
            }
            Self::Write16Slot { addr, src } | Self::Write32Slot { addr, src } => {
                f(addr, U32);
                f(src, U32);
            }
            Self::ReadFloatSlot { dst, addr } => {
                f(addr, U32);
                f(dst, Float);
            }
            Self::WriteFloatSlot { addr, src } => {
                f(addr, U32);
                f(src, Float);
            }
            Self::ReadDoubleSlot { dst, addr } => {
                f(addr, U32);
                f(dst, Double);
            }
            Self::WriteDoubleSlot { addr, src } => {
                f(addr, U32);
                f(src, Double);
            }
            Self::Add { src, dst }
            | Self::Sub { src, dst }
            | Self::Xor { src, dst }
            | Self::Mov { src, dst }
            | Self::And { src, dst }
            | Self::Or { src, dst } => {
                f(src, U32);
                f(dst, U32);
            }
            Self::SetGtUnsigned { lhs, rhs, dst }
            | Self::SetGtSigned { lhs, rhs, dst }
            | Self::SetEq { lhs, rhs, dst }
            | Self::SetGeUnsigned { lhs, rhs, dst }
            | Self::SetGeSigned { lhs, rhs, dst }
            | Self::MulU32 { lhs, rhs, dst } => {
                f(lhs, U32);
                f(rhs, U32);
                f(dst, U32);
            }
            Self::SetGtSignedConst { lhs, dst, .. } | Self::SetGeSignedConst { lhs, dst, .. } => {
                f(lhs, U32);
                f(dst, U32);
            }
            Self::Shad { val, amt } => {
                f(amt, U32);
                f(val, U32);
            }
        }
    }
}

/// A decoded guest block as produced by the translator.
pub struct IlBlock<C> {
    pub insts: Vec<Inst<C>>,
    pub slots: Vec<SlotKind>,
}

impl<C> Clone for IlBlock<C> {
    fn clone(&self) -> Self {
        Self {
            insts: self.insts.clone(),
            slots: self.slots.clone(),
        }
    }
}

impl<C> fmt::Debug for IlBlock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IlBlock")
            .field("insts", &self.insts)
            .field("slots", &self.slots)
            .finish()
    }
}

impl<C> IlBlock<C> {
    pub fn new(insts: Vec<Inst<C>>, slots: Vec<SlotKind>) -> Self {
        Self { insts, slots }
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Incremental builder for [`IlBlock`]s.
pub struct IlBuilder<C> {
    insts: Vec<Inst<C>>,
    slots: Vec<SlotKind>,
}

impl<C> Default for IlBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> IlBuilder<C> {
    pub fn new() -> Self {
        Self {
            insts: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub fn alloc_slot(&mut self, kind: SlotKind) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(kind);
        id
    }

    pub fn push(&mut self, inst: Inst<C>) -> &mut Self {
        self.insts.push(inst);
        self
    }

    /// Allocates a `U32` slot holding `imm`.
    pub fn const_u32(&mut self, imm: u32) -> SlotId {
        let dst = self.alloc_slot(SlotKind::U32);
        self.push(Inst::SetSlot { dst, imm });
        dst
    }

    /// Appends `SetSlot` + `Jump` to leave the block at `target`.
    pub fn jump_to(&mut self, target: GuestAddr) -> &mut Self {
        let addr = self.const_u32(target);
        self.push(Inst::Jump { addr })
    }

    pub fn finish(self) -> IlBlock<C> {
        IlBlock {
            insts: self.insts,
            slots: self.slots,
        }
    }
}
