//! Binary diffing of individual payload files.
//!
//! [`BlockDiff`] is the built-in backend: a greedy block matcher over a
//! rolling checksum, emitting a compact instruction stream that is verified
//! against both the source and the reconstructed target.

pub mod codec;
pub mod rolling;
pub mod varint;

pub use codec::{BlockDiff, ByteDiff, DIFF_MAGIC, DiffError, DiffHeader, decode, encode, header};
