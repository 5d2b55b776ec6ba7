// Variable-length integers used by the diff stream.
//
// Base-128, big-endian: most-significant group first. Every byte except the
// final one has bit 7 set.

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
const MAX_VARINT_LEN: usize = 10;

/// If any of these bits are set before a shift, `<< 7` would overflow.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarIntError {
    #[error("varint overflows 64 bits")]
    Overflow,
    #[error("truncated varint")]
    Underflow,
}

/// Append `num` to `out`.
pub fn push_u64(out: &mut Vec<u8>, num: u64) {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let mut i = MAX_VARINT_LEN;
    let mut rest = num;
    loop {
        i -= 1;
        scratch[i] = (rest as u8 & 0x7F) | 0x80;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    scratch[MAX_VARINT_LEN - 1] &= 0x7F;
    out.extend_from_slice(&scratch[i..]);
}

pub fn push_usize(out: &mut Vec<u8>, num: usize) {
    push_u64(out, num as u64);
}

/// Decode a `u64` from the front of `data`. Returns `(value, bytes_consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Underflow)
}

pub fn read_usize(data: &[u8]) -> Result<(usize, usize), VarIntError> {
    let (val, len) = read_u64(data)?;
    let val = usize::try_from(val).map_err(|_| VarIntError::Overflow)?;
    Ok((val, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(num: u64) -> Vec<u8> {
        let mut out = Vec::new();
        push_u64(&mut out, num);
        out
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(127), [0x7F]);
        assert_eq!(encoded(128), [0x81, 0x00]);
        assert_eq!(encoded(16_383), [0xFF, 0x7F]);
        assert_eq!(encoded(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn read_reports_consumed_bytes() {
        let mut buf = encoded(300);
        buf.push(0xAA);
        assert_eq!(read_u64(&buf), Ok((300, 2)));
    }

    #[test]
    fn read_rejects_truncation_and_overflow() {
        assert_eq!(read_u64(&[0x81]), Err(VarIntError::Underflow));
        assert_eq!(read_u64(&[]), Err(VarIntError::Underflow));
        assert_eq!(read_u64(&[0xFF; 11]), Err(VarIntError::Overflow));
    }
}
