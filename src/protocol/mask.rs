//! Payload masking (RFC 6455 §5.3).
//!
//! `masked[i] = payload[i] ^ key[i % 4]`. The transform is its own inverse, so the same
//! functions mask and unmask.

/// Bytewise XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Word-at-a-time XOR masking. Produces exactly the same output as [`apply_mask`].
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_u32;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    // the tail starts on a multiple of four, so it lines up with mask[0]
    apply_mask(chunks.into_remainder(), mask);
}
