use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::block::{q_number, xor_into};
use crate::frame::StreamData;
use crate::params::{is_prime, multi_ceil, multi_floor};
use crate::raw::bytes_to_item;
use crate::status::Status;

/// Decodes framed stream units back into the original `T` sequence,
/// transparently recovering up to two losses per parity group.
pub struct DecodeBuffer<T, const N: usize> {
    in_buf: Vec<(usize, Vec<u8>)>,
    missing_slots: Vec<usize>,
    out_buf: VecDeque<Vec<u8>>,
    expect_seq_id: u16,
    next_floor: u16,
    prev_seq_id: u16,
    loss_cnt: u8,
    first_call: bool,
    block_bytes: usize,
    _marker: PhantomData<T>,
}

const GROUP_TOO_LARGE: &str = "unrecoverable: more than one group's worth of loss";

impl<T, const N: usize> DecodeBuffer<T, N> {
    #[allow(clippy::let_unit_value)]
    const _CHECK: () = {
        assert!(N >= 2, "parity group size must be at least 2");
        assert!(is_prime(N + 1), "N + 1 must be prime for EVENODD recovery");
    };

    /// Creates an empty decoder awaiting the first frame.
    pub fn new() -> Self {
        let () = Self::_CHECK;
        let bytes = multi_ceil(std::mem::size_of::<T>(), N);
        Self {
            in_buf: Vec::with_capacity(N),
            missing_slots: Vec::with_capacity(2),
            out_buf: VecDeque::new(),
            expect_seq_id: 0,
            next_floor: (N + 2) as u16,
            prev_seq_id: 0,
            loss_cnt: 0,
            first_call: true,
            block_bytes: bytes / N,
            _marker: PhantomData,
        }
    }

    fn payload_bytes(&self) -> usize {
        self.block_bytes * N
    }

    fn group_floor(&self, seq_id: u16) -> u16 {
        multi_floor(seq_id as usize, N + 2) as u16
    }

    fn group_ceil_after(&self, seq_id: u16) -> u16 {
        multi_ceil(seq_id as usize + 1, N + 2) as u16
    }

    fn reinit_at(&mut self, seq_id: u16) {
        self.in_buf.clear();
        self.missing_slots.clear();
        self.expect_seq_id = self.group_floor(seq_id);
        self.next_floor = self.group_ceil_after(self.expect_seq_id);
        self.loss_cnt = 0;
        self.first_call = true;
        tracing::debug!(seq_id, "encoder reset detected, resynchronizing");
    }

    /// Admits one received stream unit, in channel order. Always returns `Ok`;
    /// loss and resynchronization are handled internally and surfaced only
    /// through logging.
    pub fn enq(&mut self, frame: &StreamData<T, N>) -> Status {
        let seq_id = frame.header.seq_id;

        if !self.first_call && seq_id <= self.prev_seq_id {
            self.reinit_at(seq_id);
        }

        loop {
            if seq_id < self.expect_seq_id {
                // duplicate or stale retransmit; drop silently
                break;
            }
            if seq_id >= self.next_floor {
                self.next_period();
                continue;
            }

            let gap = (seq_id - self.expect_seq_id) as usize;
            let slot = (seq_id as usize) % (N + 2);
            match gap {
                0 => {
                    self.in_buf.push((slot, frame.data.to_vec()));
                    if self.loss_cnt == 0 {
                        self.out_buf.push_back(frame.data.to_vec());
                    }
                    self.expect_seq_id = seq_id.wrapping_add(1);
                }
                1 => {
                    self.missing_slots
                        .push((self.expect_seq_id as usize) % (N + 2));
                    self.in_buf.push((slot, frame.data.to_vec()));
                    self.loss_cnt += 1;
                    self.expect_seq_id = seq_id.wrapping_add(1);
                }
                2 => {
                    self.missing_slots
                        .push((self.expect_seq_id as usize) % (N + 2));
                    self.missing_slots
                        .push(((self.expect_seq_id as usize) + 1) % (N + 2));
                    self.in_buf.push((slot, frame.data.to_vec()));
                    self.loss_cnt += 2;
                    self.expect_seq_id = seq_id.wrapping_add(1);
                }
                _ => {
                    tracing::warn!(seq_id, gap, "group abandoned: too many consecutive losses");
                    self.loss_cnt = self.loss_cnt.saturating_add(3);
                }
            }
            break;
        }

        self.first_call = false;

        if self.loss_cnt >= 3 {
            self.next_period();
        } else if self.in_buf.len() == N {
            self.decode();
            self.next_period();
        }

        self.prev_seq_id = seq_id;
        Status::Ok
    }

    fn next_period(&mut self) {
        self.in_buf.clear();
        self.missing_slots.clear();
        self.loss_cnt = 0;
        self.expect_seq_id = self.next_floor;
        self.next_floor = self.group_ceil_after(self.expect_seq_id);
    }

    fn decode(&mut self) {
        match self.loss_cnt {
            0 => {}
            1 => self.decode_one_loss(),
            _ => self.decode_two_loss(),
        }
    }

    fn decode_one_loss(&mut self) {
        let missing = self.missing_slots[0];
        if missing >= N {
            // Missing slot was P or Q; data is already complete and was
            // streamed during enq. Nothing left to recover or emit here, as
            // every data slot already went through the fast path.
            return;
        }

        let bytes = self.payload_bytes();
        let mut recovered = vec![0u8; bytes];
        let mut found_p = false;
        for (slot, data) in &self.in_buf {
            if *slot == N {
                xor_into(&mut recovered, data);
                found_p = true;
            } else if *slot < N {
                xor_into(&mut recovered, data);
            }
        }
        assert!(found_p, "P slot must be present when exactly one data slot is missing");

        let mut by_slot = vec![None; N];
        for (slot, data) in &self.in_buf {
            if *slot < N {
                by_slot[*slot] = Some(data.clone());
            }
        }
        by_slot[missing] = Some(recovered);

        for slot in missing..N {
            self.out_buf.push_back(by_slot[slot].take().expect("slot recovered or present"));
        }
    }

    fn decode_two_loss(&mut self) {
        let mut missing = self.missing_slots.clone();
        missing.sort_unstable();
        let d_min = missing[0];
        let d_max = missing[1];
        assert!(
            d_max <= N,
            "{GROUP_TOO_LARGE}: Q is always present when loss_cnt reaches exactly 2"
        );

        let bytes = self.payload_bytes();
        let n = self.block_bytes;
        let mut grid: Vec<Vec<u8>> = vec![vec![0u8; bytes]; N + 1];
        let mut q: Option<Vec<u8>> = None;
        for (slot, data) in &self.in_buf {
            if *slot == N + 1 {
                q = Some(data.clone());
            } else {
                grid[*slot] = data.clone();
            }
        }
        let q = q.expect("Q slot must be present for a two-loss decode");

        // q_count[d] = number of still-missing rows landing on diagonal d,
        // for d in 0..N (diagonal N is exempt and pinned at 0).
        let mut q_count = vec![0i32; N + 1];
        for &row in &[d_min, d_max] {
            for j in 0..N {
                let qn = q_number(row, j, N);
                if qn != N {
                    q_count[qn] += 1;
                }
            }
        }

        let mut remaining_cols: Vec<usize> = (0..N).collect();
        let max_iterations = 4 * N + 1;
        let mut iterations = 0;
        while !remaining_cols.is_empty() {
            iterations += 1;
            assert!(
                iterations <= max_iterations,
                "two-loss recovery failed to converge within the safety bound"
            );

            let mut progressed = false;
            let mut next_cols = Vec::with_capacity(remaining_cols.len());
            for &j in &remaining_cols {
                let qn_min = q_number(d_min, j, N);
                let qn_max = q_number(d_max, j, N);
                let (recover_row, recover_qn, other_row) = if q_count[qn_min] == 1 {
                    (d_min, qn_min, d_max)
                } else if q_count[qn_max] == 1 {
                    (d_max, qn_max, d_min)
                } else {
                    next_cols.push(j);
                    continue;
                };

                // Recover `recover_row`'s block at column `j` from Q's diagonal sum:
                // every other (row, col) pair landing on diagonal `recover_qn` is
                // known, since q_count[recover_qn] == 1.
                let mut recovered = q[recover_qn * n..(recover_qn + 1) * n].to_vec();
                for row in 0..=N {
                    if row == recover_row {
                        continue;
                    }
                    let col = (row + N + 1 - recover_qn) % (N + 1);
                    if col < N {
                        xor_into(&mut recovered, &grid[row][col * n..(col + 1) * n]);
                    }
                }
                grid[recover_row][j * n..(j + 1) * n].copy_from_slice(&recovered);

                // Recover the other missing row at the same column via P (row N).
                let mut p_sum = grid[N][j * n..(j + 1) * n].to_vec();
                for k in 0..N {
                    if k == other_row {
                        continue;
                    }
                    xor_into(&mut p_sum, &grid[k][j * n..(j + 1) * n]);
                }
                grid[other_row][j * n..(j + 1) * n].copy_from_slice(&p_sum);

                q_count[recover_qn] -= 1;
                let other_qn = if recover_row == d_min { qn_max } else { qn_min };
                q_count[other_qn] -= 1;
                progressed = true;
            }
            assert!(
                progressed || next_cols.is_empty(),
                "two-loss recovery made no progress this round"
            );
            remaining_cols = next_cols;
        }

        for slot in d_min..N {
            self.out_buf.push_back(grid[slot].clone());
        }
    }

    /// Pops the oldest recovered item.
    pub fn deq(&mut self) -> (Status, Option<T>)
    where
        T: Copy,
    {
        match self.out_buf.pop_front() {
            Some(bytes) => (Status::Ok, Some(bytes_to_item(&bytes))),
            None => (Status::NoElement, None),
        }
    }

    /// Clears all buffered state, returning the decoder to its initial state.
    pub fn reset(&mut self) {
        self.in_buf.clear();
        self.missing_slots.clear();
        self.out_buf.clear();
        self.expect_seq_id = 0;
        self.next_floor = (N + 2) as u16;
        self.prev_seq_id = 0;
        self.loss_cnt = 0;
        self.first_call = true;
    }

    /// Number of recovered items currently queued for `deq`.
    pub fn count(&self) -> usize {
        self.out_buf.len()
    }
}

impl<T, const N: usize> Default for DecodeBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::encode::EncodeBuffer;
    use crate::frame::StreamData;
    use crate::status::Status;

    use super::*;

    fn encode_group<const N: usize>(xs: &[u32]) -> Vec<StreamData<u32, N>> {
        let mut enc: EncodeBuffer<u32, N> = EncodeBuffer::new();
        for x in xs {
            enc.enq(x);
        }
        std::iter::from_fn(|| enc.deq().1).collect()
    }

    fn drain<const N: usize>(dec: &mut DecodeBuffer<u32, N>) -> Vec<u32> {
        std::iter::from_fn(|| match dec.deq() {
            (Status::Ok, Some(v)) => Some(v),
            _ => None,
        })
        .collect()
    }

    #[test]
    fn zero_loss_round_trip() {
        const N: usize = 4;
        let xs = [10u32, 20, 30, 40];
        let frames = encode_group::<N>(&xs);
        let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
        for f in &frames {
            dec.enq(f);
        }
        assert_eq!(drain(&mut dec), xs.to_vec());
    }

    #[test]
    fn every_single_drop_recovers_all_data() {
        const N: usize = 4;
        let xs = [1u32, 2, 3, 4];
        for drop in 0..N + 2 {
            let frames = encode_group::<N>(&xs);
            let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
            for (slot, f) in frames.iter().enumerate() {
                if slot == drop {
                    continue;
                }
                dec.enq(f);
            }
            assert_eq!(drain(&mut dec), xs.to_vec(), "single drop at slot {drop}");
        }
    }

    #[test]
    fn every_pair_drop_recovers_all_data() {
        const N: usize = 4;
        let xs = [5u32, 6, 7, 8];
        for d1 in 0..N + 2 {
            for d2 in d1 + 1..N + 2 {
                let frames = encode_group::<N>(&xs);
                let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
                for (slot, f) in frames.iter().enumerate() {
                    if slot == d1 || slot == d2 {
                        continue;
                    }
                    dec.enq(f);
                }
                assert_eq!(
                    drain(&mut dec),
                    xs.to_vec(),
                    "pair drop at slots {d1},{d2}"
                );
            }
        }
    }

    #[test]
    fn every_pair_drop_recovers_all_data_larger_n() {
        const N: usize = 6;
        let xs = [1u32, 2, 3, 4, 5, 6];
        for d1 in 0..N + 2 {
            for d2 in d1 + 1..N + 2 {
                let frames = encode_group::<N>(&xs);
                let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
                for (slot, f) in frames.iter().enumerate() {
                    if slot == d1 || slot == d2 {
                        continue;
                    }
                    dec.enq(f);
                }
                assert_eq!(
                    drain(&mut dec),
                    xs.to_vec(),
                    "pair drop at slots {d1},{d2} (N=6)"
                );
            }
        }
    }

    #[test]
    fn three_losses_abandon_group_without_corruption() {
        const N: usize = 4;
        let xs = [1u32, 2, 3, 4];
        let frames = encode_group::<N>(&xs);
        let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
        for (slot, f) in frames.iter().enumerate() {
            if slot < 3 {
                continue;
            }
            dec.enq(f);
        }
        let out = drain(&mut dec);
        // at most the data streamed before the first loss is recognizable
        assert!(out.len() <= xs.len());
        for (got, want) in out.iter().zip(xs.iter()) {
            assert_eq!(got, want);
        }
    }

    #[test]
    fn three_leading_losses_drop_the_whole_group() {
        const N: usize = 4;
        let xs = [1u32, 2, 3, 4];
        let frames = encode_group::<N>(&xs);
        let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
        for (slot, f) in frames.iter().enumerate() {
            if slot < 3 {
                continue;
            }
            dec.enq(f);
        }
        assert!(drain(&mut dec).is_empty());
    }

    #[test]
    fn seq_id_wraps_on_group_boundary_for_decoder() {
        const N: usize = 4;
        let wrap_at = ((u16::MAX as usize) / (N + 2) * (N + 2)) as u16;
        let mut enc: EncodeBuffer<u32, N> = EncodeBuffer::new();
        enc.seq_id = wrap_at - (N as u16 + 2);
        let xs = [1u32, 2, 3, 4];
        for x in xs {
            enc.enq(&x);
        }
        let frames: Vec<_> = std::iter::from_fn(|| enc.deq().1).collect();
        assert_eq!(frames.last().unwrap().header.seq_id, wrap_at - 1);

        let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
        dec.expect_seq_id = wrap_at - (N as u16 + 2);
        dec.next_floor = wrap_at;
        dec.first_call = false;
        dec.prev_seq_id = wrap_at - (N as u16 + 3);
        for f in &frames {
            dec.enq(f);
        }
        assert_eq!(drain(&mut dec), xs.to_vec());
        assert_eq!(dec.next_floor, wrap_at);

        // The next group the encoder emits restarts at seq_id 0; the decoder
        // must recognize this the same way it recognizes any encoder reset.
        let next_frames = encode_group::<N>(&[5u32, 6, 7, 8]);
        for f in &next_frames {
            dec.enq(f);
        }
        assert_eq!(drain(&mut dec), vec![5, 6, 7, 8]);
    }

    #[test]
    fn encoder_reset_resynchronizes() {
        const N: usize = 4;
        let xs = [1u32, 2, 3, 4];
        let frames = encode_group::<N>(&xs);
        let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
        for f in &frames {
            dec.enq(f);
        }
        drain(&mut dec);

        // Second sender instance restarts seq_id at 0 mid-stream.
        let frames2 = encode_group::<N>(&[9u32, 10, 11, 12]);
        for f in &frames2 {
            dec.enq(f);
        }
        assert_eq!(drain(&mut dec), vec![9, 10, 11, 12]);
    }

    #[test]
    fn random_payloads_survive_any_single_or_double_drop() {
        use rand::Rng;

        fn check<const N: usize>(rng: &mut impl Rng) {
            let xs: Vec<u32> = (0..N).map(|_| rng.gen()).collect();
            for d1 in 0..N + 2 {
                let frames = encode_group::<N>(&xs);
                let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
                for (slot, f) in frames.iter().enumerate() {
                    if slot == d1 {
                        continue;
                    }
                    dec.enq(f);
                }
                assert_eq!(drain(&mut dec), xs, "N={N} single drop at slot {d1}");

                for d2 in d1 + 1..N + 2 {
                    let frames = encode_group::<N>(&xs);
                    let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
                    for (slot, f) in frames.iter().enumerate() {
                        if slot == d1 || slot == d2 {
                            continue;
                        }
                        dec.enq(f);
                    }
                    assert_eq!(drain(&mut dec), xs, "N={N} pair drop at slots {d1},{d2}");
                }
            }
        }

        let mut rng = rand::thread_rng();
        check::<4>(&mut rng);
        check::<6>(&mut rng);
        check::<12>(&mut rng);
    }

    #[test]
    fn reset_then_replay_matches_fresh_instance() {
        const N: usize = 4;
        let xs = [1u32, 2, 3, 4];
        let frames = encode_group::<N>(&xs);

        let mut dec: DecodeBuffer<u32, N> = DecodeBuffer::new();
        for f in &frames {
            dec.enq(f);
        }
        drain(&mut dec);
        dec.reset();

        for f in &frames {
            dec.enq(f);
        }
        assert_eq!(drain(&mut dec), xs.to_vec());
    }
}
