use blockjit_il::{SlotId, SlotKind};

use crate::error::IntegrityError;

/// One typed virtual register. The variant is the slot's declared kind and never changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Slot {
    U32(u32),
    Float(f32),
    Double(f64),
}

impl Slot {
    pub fn zeroed(kind: SlotKind) -> Self {
        match kind {
            SlotKind::U32 => Self::U32(0),
            SlotKind::Float => Self::Float(0.0),
            SlotKind::Double => Self::Double(0.0),
        }
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Self::U32(_) => SlotKind::U32,
            Self::Float(_) => SlotKind::Float,
            Self::Double(_) => SlotKind::Double,
        }
    }
}

/// Slot array owned by one compiled block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlotStore {
    slots: Box<[Slot]>,
}

impl SlotStore {
    pub fn new(kinds: &[SlotKind]) -> Self {
        Self {
            slots: kinds.iter().copied().map(Slot::zeroed).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id.index())
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut Slot, IntegrityError> {
        let slot_count = self.slots.len();
        self.slots
            .get_mut(id.index())
            .ok_or(IntegrityError::SlotOutOfRange { slot: id, slot_count })
    }

    #[inline]
    pub fn u32_mut(&mut self, id: SlotId) -> Result<&mut u32, IntegrityError> {
        match self.slot_mut(id)? {
            Slot::U32(v) => Ok(v),
            other => Err(kind_mismatch(id, SlotKind::U32, other.kind())),
        }
    }

    #[inline]
    pub fn u32(&mut self, id: SlotId) -> Result<u32, IntegrityError> {
        self.u32_mut(id).map(|v| *v)
    }

    pub fn float_mut(&mut self, id: SlotId) -> Result<&mut f32, IntegrityError> {
        match self.slot_mut(id)? {
            Slot::Float(v) => Ok(v),
            other => Err(kind_mismatch(id, SlotKind::Float, other.kind())),
        }
    }

    pub fn double_mut(&mut self, id: SlotId) -> Result<&mut f64, IntegrityError> {
        match self.slot_mut(id)? {
            Slot::Double(v) => Ok(v),
            other => Err(kind_mismatch(id, SlotKind::Double, other.kind())),
        }
    }
}

#[cold]
fn kind_mismatch(slot: SlotId, expected: SlotKind, declared: SlotKind) -> IntegrityError {
    tracing::error!(%slot, ?expected, ?declared, "slot kind mismatch");
    IntegrityError::SlotKind {
        slot,
        expected,
        declared,
    }
}
