//! Integer semantics shared by both execution backends.

#[inline]
pub fn shll(val: u32, amt: u32) -> u32 {
    val.checked_shl(amt).unwrap_or(0)
}

#[inline]
pub fn shlr(val: u32, amt: u32) -> u32 {
    val.checked_shr(amt).unwrap_or(0)
}

/// Arithmetic right shift; amounts of 32 or more fill with the sign bit.
#[inline]
pub fn shar(val: u32, amt: u32) -> u32 {
    ((val as i32) >> amt.min(31)) as u32
}

/// Dynamic shift: the sign of `amt` picks the direction.
#[inline]
pub fn shad(val: u32, amt: u32) -> u32 {
    let amt = amt as i32;
    if amt >= 0 {
        shll(val, amt as u32)
    } else {
        shar(val, amt.unsigned_abs())
    }
}

#[inline]
pub fn flag_matches(flag: u32, expect: bool) -> bool {
    (flag & 1 != 0) == expect
}

#[inline]
pub fn gt_signed(lhs: u32, rhs: u32) -> bool {
    (lhs as i32) > (rhs as i32)
}

#[inline]
pub fn ge_signed(lhs: u32, rhs: u32) -> bool {
    (lhs as i32) >= (rhs as i32)
}

#[inline]
pub fn sign_extend_16(val: u32) -> u32 {
    val as u16 as i16 as i32 as u32
}
