//! Big-endian loads for the flattened device tree.
//!
//! The device tree blob is big-endian throughout while the CPU is
//! little-endian, so every 32- and 64-bit value read from it goes through
//! these helpers.

/// Interpret 4 bytes as a big-endian `u32`.
#[inline(always)]
pub const fn be32(b: [u8; 4]) -> u32 {
    u32::from_be_bytes(b)
}

/// Read a big-endian `u32` at `addr`.
///
/// # Safety
///
/// `addr` must point at 4 readable bytes. No alignment is required; the
/// structure block only guarantees 4-byte alignment of tokens, but property
/// values may be read at arbitrary offsets.
#[inline]
pub unsafe fn read_be32(addr: usize) -> u32 {
    be32((addr as *const [u8; 4]).read_unaligned())
}

/// Read a big-endian `u64` at `addr`.
///
/// # Safety
///
/// `addr` must point at 8 readable bytes.
#[inline]
pub unsafe fn read_be64(addr: usize) -> u64 {
    u64::from_be_bytes((addr as *const [u8; 8]).read_unaligned())
}

/// Decode an address made of one or two big-endian cells, the encoding a
/// `reg` property uses. `len` is the byte length available for the address
/// part; values shorter than one cell decode to 0.
///
/// # Safety
///
/// `addr` must point at `len` readable bytes.
pub unsafe fn read_be_cells(addr: usize, len: usize) -> u64 {
    if len >= 8 {
        read_be64(addr)
    } else if len >= 4 {
        read_be32(addr) as u64
    } else {
        0
    }
}
