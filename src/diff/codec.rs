// Diff stream encoder/decoder.
//
// Stream layout:
//
//   magic "OXD\x01"
//   varint source_len, u32 BE adler32(source)
//   varint target_len, u32 BE adler32(target)
//   instructions...
//   END
//
// Instructions:
//   ADD  (0x01) varint len, len literal bytes
//   COPY (0x02) varint source_addr, varint len
//   RUN  (0x03) varint len, 1 byte
//   END  (0x00)
//
// The source checksum lets a diff applied to the wrong base bytes fail
// before any output is produced.

use super::rolling::{BlockIndex, RollingHash, WINDOW, backward_match, forward_match, run_length};
use super::varint::{self, VarIntError};

pub const DIFF_MAGIC: [u8; 4] = *b"OXD\x01";

const OP_END: u8 = 0x00;
const OP_ADD: u8 = 0x01;
const OP_COPY: u8 = 0x02;
const OP_RUN: u8 = 0x03;

/// Runs shorter than this are cheaper as literals.
const MIN_RUN: usize = 12;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("not a diff stream")]
    BadMagic,
    #[error("diff was computed against a different source ({0})")]
    SourceMismatch(&'static str),
    #[error("invalid diff stream: {0}")]
    InvalidInput(String),
    #[error("target checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl From<VarIntError> for DiffError {
    fn from(e: VarIntError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Replaceable diff backend
// ---------------------------------------------------------------------------

/// Byte-level diff backend used by the package builder and reassembly.
pub trait ByteDiff: Send + Sync {
    /// Produce a diff that turns `source` into `target`.
    fn diff(&self, source: &[u8], target: &[u8]) -> Vec<u8>;

    /// Apply `delta` to `source`.
    fn patch(&self, source: &[u8], delta: &[u8]) -> Result<Vec<u8>, DiffError>;
}

/// Built-in block-matching backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockDiff;

impl ByteDiff for BlockDiff {
    fn diff(&self, source: &[u8], target: &[u8]) -> Vec<u8> {
        encode(source, target)
    }

    fn patch(&self, source: &[u8], delta: &[u8]) -> Result<Vec<u8>, DiffError> {
        decode(source, delta)
    }
}

fn adler32(data: &[u8]) -> u32 {
    let mut hasher = simd_adler32::Adler32::new();
    hasher.write(data);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

struct Emitter<'t> {
    out: Vec<u8>,
    target: &'t [u8],
    /// Start of the literal region not yet emitted.
    pending: usize,
}

impl Emitter<'_> {
    fn flush_literal(&mut self, end: usize) {
        if end > self.pending {
            self.out.push(OP_ADD);
            varint::push_usize(&mut self.out, end - self.pending);
            self.out.extend_from_slice(&self.target[self.pending..end]);
        }
        self.pending = end;
    }

    fn copy(&mut self, start: usize, addr: usize, len: usize) {
        self.flush_literal(start);
        self.out.push(OP_COPY);
        varint::push_usize(&mut self.out, addr);
        varint::push_usize(&mut self.out, len);
        self.pending = start + len;
    }

    fn run(&mut self, start: usize, len: usize) {
        self.flush_literal(start);
        self.out.push(OP_RUN);
        varint::push_usize(&mut self.out, len);
        self.out.push(self.target[start]);
        self.pending = start + len;
    }
}

/// Encode a diff turning `source` into `target`.
pub fn encode(source: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + target.len() / 8);
    out.extend_from_slice(&DIFF_MAGIC);
    varint::push_usize(&mut out, source.len());
    out.extend_from_slice(&adler32(source).to_be_bytes());
    varint::push_usize(&mut out, target.len());
    out.extend_from_slice(&adler32(target).to_be_bytes());

    let index = (source.len() >= WINDOW).then(|| BlockIndex::build(source));
    let mut emit = Emitter {
        out,
        target,
        pending: 0,
    };

    let mut pos = 0usize;
    let mut hash: Option<RollingHash> = None;

    while pos + WINDOW <= target.len() {
        let run = run_length(&target[pos..], target[pos]);
        if run >= MIN_RUN {
            emit.run(pos, run);
            pos += run;
            hash = None;
            continue;
        }

        let mut h = hash.unwrap_or_else(|| RollingHash::new(&target[pos..pos + WINDOW]));

        if let Some(candidate) = index.as_ref().and_then(|i| i.lookup(h.digest())) {
            let fwd = forward_match(&source[candidate..], &target[pos..]);
            if fwd >= WINDOW {
                let back = backward_match(&source[..candidate], &target[emit.pending..pos]);
                emit.copy(pos - back, candidate - back, back + fwd);
                pos += fwd;
                hash = None;
                continue;
            }
        }

        if pos + WINDOW < target.len() {
            h.roll(target[pos], target[pos + WINDOW]);
            hash = Some(h);
        }
        pos += 1;
    }

    emit.flush_literal(target.len());
    emit.out.push(OP_END);
    emit.out
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

struct Cursor<'d> {
    data: &'d [u8],
    pos: usize,
}

impl<'d> Cursor<'d> {
    fn usize(&mut self) -> Result<usize, DiffError> {
        let (val, len) = varint::read_usize(&self.data[self.pos..])?;
        self.pos += len;
        Ok(val)
    }

    fn bytes(&mut self, len: usize) -> Result<&'d [u8], DiffError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| DiffError::InvalidInput("unexpected end of stream".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, DiffError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32_be(&mut self) -> Result<u32, DiffError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Lengths and checksums declared at the start of a diff stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffHeader {
    pub source_len: usize,
    pub source_adler32: u32,
    pub target_len: usize,
    pub target_adler32: u32,
}

fn read_header(cur: &mut Cursor<'_>) -> Result<DiffHeader, DiffError> {
    if cur.bytes(DIFF_MAGIC.len()).ok() != Some(&DIFF_MAGIC[..]) {
        return Err(DiffError::BadMagic);
    }
    Ok(DiffHeader {
        source_len: cur.usize()?,
        source_adler32: cur.u32_be()?,
        target_len: cur.usize()?,
        target_adler32: cur.u32_be()?,
    })
}

/// Parse only the header of `delta`.
pub fn header(delta: &[u8]) -> Result<DiffHeader, DiffError> {
    read_header(&mut Cursor {
        data: delta,
        pos: 0,
    })
}

/// Apply a diff produced by [`encode`] to `source`.
pub fn decode(source: &[u8], delta: &[u8]) -> Result<Vec<u8>, DiffError> {
    let mut cur = Cursor {
        data: delta,
        pos: 0,
    };
    let DiffHeader {
        source_len,
        source_adler32,
        target_len,
        target_adler32: target_sum,
    } = read_header(&mut cur)?;
    if source_len != source.len() {
        return Err(DiffError::SourceMismatch("length"));
    }
    if source_adler32 != adler32(source) {
        return Err(DiffError::SourceMismatch("checksum"));
    }

    let mut out = Vec::with_capacity(target_len.min(delta.len().saturating_mul(64)));

    loop {
        let remaining = target_len - out.len();
        match cur.byte()? {
            OP_END => break,
            OP_ADD => {
                let len = cur.usize()?;
                if len > remaining {
                    return Err(DiffError::InvalidInput("ADD overruns target".into()));
                }
                out.extend_from_slice(cur.bytes(len)?);
            }
            OP_COPY => {
                let addr = cur.usize()?;
                let len = cur.usize()?;
                if len > remaining {
                    return Err(DiffError::InvalidInput("COPY overruns target".into()));
                }
                let chunk = addr
                    .checked_add(len)
                    .and_then(|end| source.get(addr..end))
                    .ok_or_else(|| DiffError::InvalidInput("COPY outside source".into()))?;
                out.extend_from_slice(chunk);
            }
            OP_RUN => {
                let len = cur.usize()?;
                let byte = cur.byte()?;
                if len > remaining {
                    return Err(DiffError::InvalidInput("RUN overruns target".into()));
                }
                out.resize(out.len() + len, byte);
            }
            other => {
                return Err(DiffError::InvalidInput(format!(
                    "unknown instruction {other:#04X}"
                )));
            }
        }
    }

    if cur.pos != delta.len() {
        return Err(DiffError::InvalidInput("trailing bytes after END".into()));
    }
    if out.len() != target_len {
        return Err(DiffError::InvalidInput(format!(
            "target length {} does not match declared {target_len}",
            out.len()
        )));
    }
    let actual = adler32(&out);
    if actual != target_sum {
        return Err(DiffError::ChecksumMismatch {
            expected: target_sum,
            actual,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
