// Rolling checksum and source block index.
//
// The checksum is Adler-style over a fixed window: `a` is the byte sum and
// `b` the position-weighted sum, both kept modulo 2^32 so a roll is exact.
// Source blocks are indexed at window-aligned offsets; the table has no
// chaining and the last write wins.

/// Width of the matching window in bytes.
pub const WINDOW: usize = 16;

/// Offset added to every byte so runs of zeros still move the checksum.
const CHAR_OFFSET: u32 = 31;

/// Offset added to stored positions so 0 means "empty bucket".
const POS_OFFSET: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingHash {
    a: u32,
    b: u32,
}

impl RollingHash {
    /// Checksum of `window`, which must be exactly [`WINDOW`] bytes.
    pub fn new(window: &[u8]) -> Self {
        debug_assert_eq!(window.len(), WINDOW);
        let mut a = 0u32;
        let mut b = 0u32;
        for (i, &byte) in window.iter().enumerate() {
            let v = u32::from(byte) + CHAR_OFFSET;
            a = a.wrapping_add(v);
            b = b.wrapping_add(((WINDOW - i) as u32).wrapping_mul(v));
        }
        Self { a, b }
    }

    /// Slide the window one byte: drop `out`, append `inp`.
    #[inline]
    pub fn roll(&mut self, out: u8, inp: u8) {
        let out = u32::from(out) + CHAR_OFFSET;
        let inp = u32::from(inp) + CHAR_OFFSET;
        self.a = self.a.wrapping_sub(out).wrapping_add(inp);
        self.b = self
            .b
            .wrapping_sub((WINDOW as u32).wrapping_mul(out))
            .wrapping_add(self.a);
    }

    #[inline]
    pub fn digest(&self) -> u32 {
        (self.b << 16) | (self.a & 0xFFFF)
    }
}

/// Hash index over window-aligned source blocks.
pub struct BlockIndex {
    buckets: Vec<usize>,
    mask: usize,
}

impl BlockIndex {
    pub fn build(source: &[u8]) -> Self {
        let blocks = source.len() / WINDOW;
        let size = (blocks * 2).next_power_of_two().max(64);
        let mut index = Self {
            buckets: vec![0; size],
            mask: size - 1,
        };
        for block in 0..blocks {
            let pos = block * WINDOW;
            let digest = RollingHash::new(&source[pos..pos + WINDOW]).digest();
            let bucket = index.bucket(digest);
            index.buckets[bucket] = pos + POS_OFFSET;
        }
        index
    }

    #[inline]
    fn bucket(&self, digest: u32) -> usize {
        // Fold the weighted half into the low bits before masking.
        ((digest ^ (digest >> 16)).wrapping_mul(0x9E37_79B1) as usize) & self.mask
    }

    /// Candidate source offset for `digest`. The caller must verify bytes.
    #[inline]
    pub fn lookup(&self, digest: u32) -> Option<usize> {
        match self.buckets[self.bucket(digest)] {
            0 => None,
            stored => Some(stored - POS_OFFSET),
        }
    }
}

/// Length of the common prefix of `a` and `b`.
#[inline]
pub fn forward_match(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Length of the common suffix of `a` and `b`.
#[inline]
pub fn backward_match(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Number of leading bytes of `data` equal to `byte`.
#[inline]
pub fn run_length(data: &[u8], byte: u8) -> usize {
    data.iter().take_while(|&&b| b == byte).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roll_matches_fresh_checksum() {
        let data: Vec<u8> = (0..200u32).map(|i| (i * 7 + 3) as u8).collect();
        let mut h = RollingHash::new(&data[..WINDOW]);
        for start in 1..=data.len() - WINDOW {
            h.roll(data[start - 1], data[start + WINDOW - 1]);
            assert_eq!(h, RollingHash::new(&data[start..start + WINDOW]), "at {start}");
        }
    }

    #[test]
    fn index_finds_aligned_block() {
        let source: Vec<u8> = (0..WINDOW as u8 + 5).collect();
        let index = BlockIndex::build(&source);
        let digest = RollingHash::new(&source[..WINDOW]).digest();
        assert_eq!(index.lookup(digest), Some(0));
    }

    #[test]
    fn empty_index_finds_nothing() {
        let index = BlockIndex::build(b"short");
        assert_eq!(index.lookup(0), None);
        assert_eq!(index.lookup(u32::MAX), None);
    }

    #[test]
    fn match_helpers() {
        assert_eq!(forward_match(b"abcdef", b"abcxyz"), 3);
        assert_eq!(backward_match(b"xxdef", b"yydef"), 3);
        assert_eq!(run_length(b"aaaab", b'a'), 4);
        assert_eq!(run_length(b"", b'a'), 0);
    }
}
