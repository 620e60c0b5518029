// Copyright lowRISC contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! The sparse, gap-tolerant firmware image buffer.
//!
//! Backed by a [`BTreeMap`] keyed by offset rather than a hand-rolled skip
//! list: the map itself gives ordered, O(log N) insertion and predecessor/
//! successor lookup, which is all the merge algorithm below needs.

use std::collections::BTreeMap;
use std::ops::Bound;

/// One contiguous run of firmware bytes at a target address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemBlock {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl MemBlock {
    /// Builds a block, panicking if `offset + data.len()` would overflow a
    /// `u64` -- the one invariant a `MemBlock` must uphold.
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        offset
            .checked_add(data.len() as u64)
            .expect("MemBlock offset + length overflowed u64 address space");
        Self { offset, data }
    }
}

/// An ordered, non-overlapping collection of [`MemBlock`]s with a streaming
/// read cursor.
///
/// Blocks that touch or overlap on insertion are coalesced transitively;
/// for overlapping addresses, the most recently inserted block's bytes win.
#[derive(Default)]
pub struct SparseImage {
    blocks: BTreeMap<u64, Vec<u8>>,
    cursor_key: Option<u64>,
    cursor_pos: usize,
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds an existing block whose range touches or overlaps
    /// `[offset, offset + len)`, if any.
    ///
    /// Only the nearest predecessor and nearest successor need checking:
    /// blocks never overlap each other (that invariant is what this
    /// function helps maintain), so if the nearest candidate on a side
    /// doesn't touch/overlap, none further in that direction can either.
    fn find_merge_candidate(&self, offset: u64, len: u64) -> Option<u64> {
        let touches = |k: u64, klen: u64| offset <= k + klen && k <= offset + len;

        if let Some((&k, v)) = self.blocks.range(..=offset).next_back() {
            if touches(k, v.len() as u64) {
                return Some(k);
            }
        }
        if let Some((&k, v)) = self.blocks.range(offset..).next() {
            if touches(k, v.len() as u64) {
                return Some(k);
            }
        }
        None
    }

    /// Places `block` into the image, with later writes winning on
    /// overlapping addresses and transitive coalescing of touching
    /// neighbors.
    ///
    /// Invalidates any live read cursor; callers must [`Self::rewind`]
    /// before streaming again after an insert.
    pub fn insert(&mut self, block: MemBlock) {
        let mut acc_offset = block.offset;
        let mut acc_data = block.data;

        while let Some(key) = self.find_merge_candidate(acc_offset, acc_data.len() as u64) {
            let exists = self.blocks.remove(&key).expect("key came from this map");
            let exists_end = key + exists.len() as u64;
            let acc_end = acc_offset + acc_data.len() as u64;

            let new_start = acc_offset.min(key);
            let new_end = acc_end.max(exists_end);
            let mut merged = vec![0u8; (new_end - new_start) as usize];

            // Older data first, then the accumulator on top: the
            // accumulator always represents the more recently written
            // side of the merge, whether that's the original `block` or a
            // chain of merges that already absorbed it.
            let exists_rel = (key - new_start) as usize;
            merged[exists_rel..exists_rel + exists.len()].copy_from_slice(&exists);
            let acc_rel = (acc_offset - new_start) as usize;
            merged[acc_rel..acc_rel + acc_data.len()].copy_from_slice(&acc_data);

            acc_offset = new_start;
            acc_data = merged;
        }

        self.blocks.insert(acc_offset, acc_data);
        self.cursor_key = None;
        self.cursor_pos = 0;
    }

    /// Adds `delta` to every stored block's offset and to the cursor's
    /// logical position, preserving order.
    pub fn shift(&mut self, delta: i64) {
        let shifted = self
            .blocks
            .iter()
            .map(|(&offset, data)| {
                let new_offset = apply_shift(offset, delta);
                (new_offset, data.clone())
            })
            .collect();
        self.blocks = shifted;
        if let Some(key) = self.cursor_key {
            self.cursor_key = Some(apply_shift(key, delta));
        }
    }

    /// Sum of `length` over all stored blocks (gaps excluded).
    pub fn total_size(&self) -> u64 {
        self.blocks.values().map(|v| v.len() as u64).sum()
    }

    /// Moves the cursor to the first block, byte 0.
    pub fn rewind(&mut self) {
        self.cursor_key = self.blocks.keys().next().copied();
        self.cursor_pos = 0;
    }

    /// The absolute address the next [`Self::read`] call will start at, or
    /// `None` if the cursor is exhausted.
    pub fn current_address(&self) -> Option<u64> {
        self.cursor_key.map(|key| key + self.cursor_pos as u64)
    }

    /// Returns the next up-to-`max_len` bytes from the cursor, never
    /// crossing a block boundary, advancing the cursor by the returned
    /// length. Returns an empty `Vec` once no more blocks remain.
    pub fn read(&mut self, max_len: usize) -> Vec<u8> {
        let Some(key) = self.cursor_key else {
            return Vec::new();
        };
        let data = self
            .blocks
            .get(&key)
            .expect("cursor_key always names a live block");

        let remaining = &data[self.cursor_pos..];
        let take = remaining.len().min(max_len);
        let chunk = remaining[..take].to_vec();
        self.cursor_pos += take;

        if self.cursor_pos >= data.len() {
            self.cursor_key = self
                .blocks
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(|(&k, _)| k);
            self.cursor_pos = 0;
        }

        chunk
    }

    /// Block count, for diagnostics and tests.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

fn apply_shift(offset: u64, delta: i64) -> u64 {
    (offset as i64)
        .checked_add(delta)
        .and_then(|v| u64::try_from(v).ok())
        .expect("shift produced an out-of-range offset")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: u64, bytes: &[u8]) -> MemBlock {
        MemBlock::new(offset, bytes.to_vec())
    }

    #[test]
    fn insert_keeps_blocks_sorted_and_non_touching() {
        let mut img = SparseImage::new();
        img.insert(block(500, &[1, 2, 3]));
        img.insert(block(0, &[9, 9]));
        img.insert(block(100, &[1; 50]));
        assert_eq!(img.block_count(), 3);
        assert_eq!(img.total_size(), 55);
    }

    #[test]
    fn touching_blocks_merge() {
        let mut img = SparseImage::new();
        img.insert(block(0, &[1, 2, 3, 4])); // [0,4)
        img.insert(block(4, &[5, 6])); // touches at 4, merges to [0,6)
        assert_eq!(img.block_count(), 1);
        assert_eq!(img.total_size(), 6);
        img.rewind();
        assert_eq!(img.read(256), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn later_write_wins_on_overlapping_inserts() {
        // [100..200) then [150..300) (different bytes) then [200..210);
        // result is one block [100..310), later writer wins in the overlaps.
        let mut img = SparseImage::new();
        img.insert(block(100, &[1u8; 100])); // [100,200)
        img.insert(block(150, &[2u8; 150])); // [150,300), wins 150..200
        img.insert(block(200, &[3u8; 10])); // [200,210), wins over the second write there

        assert_eq!(img.block_count(), 1);
        img.rewind();
        let bytes = img.read(1000);
        assert_eq!(bytes.len(), 210);
        assert_eq!(&bytes[0..50], &[1u8; 50][..]); // 100..150 untouched
        assert_eq!(&bytes[50..100], &[2u8; 50][..]); // 150..200 from 2nd write
        assert_eq!(&bytes[100..110], &[3u8; 10][..]); // 200..210 from 3rd write
    }

    #[test]
    fn rewind_then_drain_yields_total_size_partitioned_at_block_boundaries() {
        let mut img = SparseImage::new();
        img.insert(block(0, &[1u8; 300]));
        img.insert(block(1000, &[2u8; 10]));
        img.rewind();

        let mut drained = Vec::new();
        let mut chunks = 0;
        loop {
            let chunk = img.read(256);
            if chunk.is_empty() {
                break;
            }
            chunks += 1;
            drained.extend(chunk);
        }
        assert_eq!(drained.len(), img.total_size() as usize);
        // 300-byte block splits into 256+44, plus the 10-byte block: 3 chunks
        assert_eq!(chunks, 3);
    }

    #[test]
    fn shift_then_unshift_restores_offsets() {
        let mut img = SparseImage::new();
        img.insert(block(0x0000_0000, &[1, 2, 3, 4]));
        img.insert(block(0x0000_1000, &[5, 6]));

        img.shift(0x0800_0000);
        img.shift(-0x0800_0000);

        let offsets: Vec<u64> = img.iter_offsets();
        assert_eq!(offsets, vec![0x0000_0000, 0x0000_1000]);
    }

    #[test]
    fn current_address_tracks_cursor_across_reads() {
        let mut img = SparseImage::new();
        img.insert(block(0x1000, &[0u8; 10]));
        img.rewind();
        assert_eq!(img.current_address(), Some(0x1000));
        img.read(4);
        assert_eq!(img.current_address(), Some(0x1004));
        img.read(6);
        assert_eq!(img.current_address(), None);
    }

    impl SparseImage {
        fn iter_offsets(&self) -> Vec<u64> {
            self.blocks.keys().copied().collect()
        }
    }
}
