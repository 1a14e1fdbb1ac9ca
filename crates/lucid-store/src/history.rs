use lucid_core::LucidError;

/// Map a negative history offset to a vector position.
///
/// `-1` is the most recent entry. Non-negative offsets and offsets reaching
/// past the start of the history are rejected.
pub fn resolve_offset(index: isize, len: usize) -> Result<usize, LucidError> {
    if index >= 0 {
        return Err(LucidError::invalid(format!(
            "history index must be negative, got {index}"
        )));
    }
    let back = index.unsigned_abs();
    if back > len {
        return Err(LucidError::invalid(format!(
            "history index {index} out of range for {len} entries"
        )));
    }
    Ok(len - back)
}
