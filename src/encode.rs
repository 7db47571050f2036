use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::block::xor_into;
use crate::buffer::{Buff, BuffMut};
use crate::frame::StreamData;
use crate::params::{is_prime, multi_ceil};
use crate::raw::item_as_bytes;
use crate::status::Status;

/// Encodes a stream of `T` into framed stream units, emitting a horizontal (P)
/// and diagonal (Q) parity frame after every `N` data items.
///
/// `N` must be at least 2, and `N + 1` must be prime (the EVENODD
/// precondition). Violating either is a compile error.
pub struct EncodeBuffer<T, const N: usize> {
    in_buf: Vec<Buff>,
    out_buf: VecDeque<StreamData<T, N>>,
    pub(crate) seq_id: u16,
    block_bytes: usize,
    _marker: PhantomData<T>,
}

impl<T, const N: usize> EncodeBuffer<T, N> {
    #[allow(clippy::let_unit_value)]
    const _CHECK: () = {
        assert!(N >= 2, "parity group size must be at least 2");
        assert!(is_prime(N + 1), "N + 1 must be prime for EVENODD recovery");
    };

    /// Creates an empty encoder with no buffered groups.
    pub fn new() -> Self
    where
        T: Copy,
    {
        // Force evaluation of the compile-time parameter check.
        let () = Self::_CHECK;
        let bytes = multi_ceil(std::mem::size_of::<T>(), N);
        Self {
            in_buf: Vec::with_capacity(N),
            out_buf: VecDeque::new(),
            seq_id: 0,
            block_bytes: bytes / N,
            _marker: PhantomData,
        }
    }

    fn payload_bytes(&self) -> usize {
        self.block_bytes * N
    }

    /// Stages one data item, producing its data frame immediately and, once
    /// every `N`th item completes a group, its P and Q parity frames too.
    pub fn enq(&mut self, item: &T) -> Status
    where
        T: Copy,
    {
        let mut padded = BuffMut::new();
        padded.extend_from_slice(item_as_bytes(item));
        padded.resize(self.payload_bytes(), 0);
        let data = padded.freeze();

        self.in_buf.push(data.clone());
        self.push_out(data);

        if self.in_buf.len() == N {
            let (p, q) = self.compute_parity();
            self.in_buf.push(p.clone());
            self.push_out(p);
            self.push_out(q);
            self.in_buf.clear();
            tracing::trace!(seq_id = self.seq_id, "emitted parity group");
            Status::OkParityGenerated
        } else {
            Status::Ok
        }
    }

    fn compute_parity(&self) -> (Buff, Buff) {
        let n = self.block_bytes;
        let mut p = vec![0u8; self.payload_bytes()];
        for block in &self.in_buf {
            xor_into(&mut p, block);
        }

        // Diagonal parity: Q[j] = XOR over i in [0, N) of row[(i+j) mod (N+1)]'s
        // block i, where row N is P. Each (row, col) pair visited here lands on
        // diagonal j == block::q_number(row, col, N) (the two are equivalent),
        // so this sum and decode's per-diagonal recovery agree on the same code.
        let mut q = vec![0u8; self.payload_bytes()];
        for j in 0..N {
            for i in 0..N {
                let row = (i + j) % (N + 1);
                let src: &[u8] = if row == N {
                    &p[i * n..(i + 1) * n]
                } else {
                    &self.in_buf[row][i * n..(i + 1) * n]
                };
                xor_into(&mut q[j * n..(j + 1) * n], src);
            }
        }

        (Buff::copy_from_slice(&p), Buff::copy_from_slice(&q))
    }

    fn push_out(&mut self, data: Buff) {
        let frame = StreamData::new(self.seq_id, data);
        self.out_buf.push_back(frame);
        self.seq_id = self.seq_id.wrapping_add(1);
        let wrap_at = ((u16::MAX as usize) / (N + 2) * (N + 2)) as u16;
        if self.seq_id == wrap_at {
            self.seq_id = 0;
        }
    }

    /// Pops the oldest queued stream unit.
    pub fn deq(&mut self) -> (Status, Option<StreamData<T, N>>) {
        match self.out_buf.pop_front() {
            Some(frame) => (Status::Ok, Some(frame)),
            None => (Status::NoElement, None),
        }
    }

    /// Clears all buffered state and restarts the sequence counter at 0.
    pub fn reset(&mut self) {
        self.in_buf.clear();
        self.out_buf.clear();
        self.seq_id = 0;
    }

    /// Number of stream units currently queued for `deq`.
    pub fn count(&self) -> usize {
        self.out_buf.len()
    }
}

impl<T: Copy, const N: usize> Default for EncodeBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_enq_stages_one_data_frame() {
        let mut enc: EncodeBuffer<u32, 4> = EncodeBuffer::new();
        let status = enc.enq(&0x1122_3344u32);
        assert_eq!(status, Status::Ok);
        assert_eq!(enc.count(), 1);
        let (_, frame) = enc.deq();
        let frame = frame.unwrap();
        assert_eq!(frame.header.seq_id, 0);
    }

    #[test]
    fn full_group_emits_n_plus_2_frames() {
        let mut enc: EncodeBuffer<u32, 4> = EncodeBuffer::new();
        for i in 0..3u32 {
            assert_eq!(enc.enq(&i), Status::Ok);
        }
        assert_eq!(enc.enq(&3u32), Status::OkParityGenerated);
        assert_eq!(enc.count(), 6);
        let seq_ids: Vec<u16> = std::iter::from_fn(|| enc.deq().1)
            .map(|f| f.header.seq_id)
            .collect();
        assert_eq!(seq_ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn p_parity_is_row_xor() {
        let mut enc: EncodeBuffer<u32, 4> = EncodeBuffer::new();
        let xs = [0x11u32, 0x22, 0x33, 0x44];
        for x in xs {
            enc.enq(&x);
        }
        let frames: Vec<_> = std::iter::from_fn(|| enc.deq().1).collect();
        let p = &frames[4];
        let mut expect = vec![0u8; p.data.len()];
        for f in &frames[..4] {
            xor_into(&mut expect, &f.data);
        }
        assert_eq!(&p.data[..], &expect[..]);
    }

    #[test]
    fn seq_id_wraps_on_group_boundary() {
        let mut enc: EncodeBuffer<u32, 4> = EncodeBuffer::new();
        let wrap_at = (u16::MAX as usize) / 6 * 6;
        enc.seq_id = (wrap_at - 1) as u16;
        enc.enq(&1u32);
        let (_, frame) = enc.deq();
        assert_eq!(frame.unwrap().header.seq_id, (wrap_at - 1) as u16);
        assert_eq!(enc.seq_id, 0);
    }
}
