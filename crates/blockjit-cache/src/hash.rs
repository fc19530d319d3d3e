use std::rc::Rc;

use blockjit_il::GuestAddr;

use crate::store::EntryRef;

/// Number of slots in the direct-mapped front-end.
pub const HASH_TABLE_LEN: usize = 1 << 16;
pub const HASH_TABLE_MASK: usize = HASH_TABLE_LEN - 1;

const _: () = assert!(HASH_TABLE_LEN.is_power_of_two());

/// Direct-mapped index in front of the [`crate::AddressStore`].
///
/// Everything in here also lives in the store, but not the other way round. A collision simply
/// overwrites the slot; there is no probing or chaining. Every hit is checked against the entry's
/// own address, so a slot that belongs to a different address is reported as a miss.
pub struct HashFrontEnd<C> {
    slots: Box<[Option<EntryRef<C>>]>,
}

impl<C> Default for HashFrontEnd<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> HashFrontEnd<C> {
    pub fn new() -> Self {
        Self {
            slots: (0..HASH_TABLE_LEN).map(|_| None).collect(),
        }
    }

    #[inline]
    pub fn index(addr: GuestAddr) -> usize {
        addr as usize & HASH_TABLE_MASK
    }

    #[inline]
    pub fn lookup(&self, addr: GuestAddr) -> Option<&EntryRef<C>> {
        self.slots[Self::index(addr)]
            .as_ref()
            .filter(|entry| entry.addr() == addr)
    }

    #[inline]
    pub fn remember(&mut self, addr: GuestAddr, entry: &EntryRef<C>) {
        debug_assert_eq!(entry.addr(), addr);
        self.slots[Self::index(addr)] = Some(Rc::clone(entry));
    }

    pub fn reset(&mut self) {
        self.slots.fill(None);
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
