use crate::common::types::PAGE_SIZE;

use super::HEADER_SIZE;

/// Derive default (leaf_max_size, internal_max_size) for a key type from the
/// page size. The estimate assumes bincode encodes the key in about its
/// in-memory width plus the length prefix; variable-width keys get headroom
/// through the cap.
pub fn default_max_sizes<K>() -> (usize, usize) {
    let key_width = std::mem::size_of::<K>().max(8) + 2;
    let leaf = (PAGE_SIZE - HEADER_SIZE) / (key_width + 8);
    let internal = (PAGE_SIZE - HEADER_SIZE) / (key_width + 4);
    (leaf.clamp(4, 128), internal.clamp(4, 128))
}
