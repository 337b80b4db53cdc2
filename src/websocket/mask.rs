/// XORs `data` with the 4-byte masking key, as done for every client-to-server frame.
///
/// Applying the same key twice restores the original payload.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
