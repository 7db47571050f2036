use std::marker::PhantomData;

use byteorder::{ByteOrder, NativeEndian};
use thiserror::Error;

use crate::buffer::Buff;
use crate::params::multi_ceil;

const HEADER_BYTES: usize = 2;

/// The fixed header carried by every [`StreamData`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Position within the wrapping sequence-id space; `seq_id mod (N+2)`
    /// identifies the frame's slot within its parity group.
    pub seq_id: u16,
}

/// A wire frame: a [`Header`] plus a fixed-width, zero-padded payload image
/// of `T`. `N` is the parity group's data-slot count.
#[derive(Debug, Clone)]
pub struct StreamData<T, const N: usize> {
    pub header: Header,
    pub(crate) data: Buff,
    _marker: PhantomData<T>,
}

/// A malformed byte slice handed to [`StreamData::from_bytes`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("frame payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl<T, const N: usize> StreamData<T, N> {
    /// Payload width in bytes: `size_of::<T>()` padded up to a multiple of `N`.
    pub const fn payload_len() -> usize {
        multi_ceil(std::mem::size_of::<T>(), N)
    }

    pub(crate) fn new(seq_id: u16, data: Buff) -> Self {
        debug_assert_eq!(data.len(), Self::payload_len());
        Self {
            header: Header { seq_id },
            data,
            _marker: PhantomData,
        }
    }

    /// Encodes this frame to its bit-exact wire representation.
    pub fn to_bytes(&self) -> Buff {
        let mut out = crate::buffer::BuffMut::new();
        out.resize(HEADER_BYTES, 0);
        NativeEndian::write_u16(&mut out[..HEADER_BYTES], self.header.seq_id);
        out.extend_from_slice(&self.data);
        out.freeze()
    }

    /// Decodes a frame from its wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_BYTES {
            return Err(FrameError::TooShort {
                expected: HEADER_BYTES,
                actual: bytes.len(),
            });
        }
        let expected = HEADER_BYTES + Self::payload_len();
        if bytes.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let seq_id = NativeEndian::read_u16(&bytes[..HEADER_BYTES]);
        let data = Buff::copy_from_slice(&bytes[HEADER_BYTES..]);
        Ok(Self::new(seq_id, data))
    }
}
