// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Bucket sieving: radix sort of sieve updates as they are produced.
//!
//! A factor base entry larger than the bucket region hits a given
//! region only a few times, so subtracting its weight directly would
//! cost one cache miss per hit. Instead the fill pass appends each hit
//! to the bucket of its region, and the apply pass later replays one
//! bucket at a time against a region that fits in cache.
//!
//! Updates are packed (position, hint) pairs. Checkpoints ("slices")
//! record every bucket's write cursor so that the updates contributed
//! by one batch of factor base entries can be replayed independently,
//! in particular in increasing weight order.
//!
//! When the number of fine buckets is large, keeping all write cursors
//! live is cache and TLB hostile; a [`FunnelArray`] then performs a
//! first coarse radix pass (kilo-buckets, or kilo+mega for very large
//! areas), tagging each update with the low byte(s) of its destination
//! bucket. Flushing the funnel produces exactly the same fine bucket
//! contents as direct writes.

use crate::checksum::Checksum;

/// A packed bucket update. The position occupies the low bits, the
/// hint (if any) the bits above it.
pub type Packed = u32;

/// Shift-and-mask packing of (position, hint) pairs.
///
/// `hint_bits` may be zero: the prime identity is then recovered from
/// slice checkpoints alone.
#[derive(Clone, Copy, Debug)]
pub struct Codec {
    pos_bits: u32,
    hint_bits: u32,
}

impl Codec {
    pub fn new(pos_bits: u32, hint_bits: u32) -> Codec {
        // pos_bits < 32: pack shifts the hint by pos_bits even when
        // hint_bits is zero.
        assert!(1 <= pos_bits && pos_bits < 32 && pos_bits + hint_bits <= 32);
        Codec { pos_bits, hint_bits }
    }

    pub fn region_size(&self) -> usize {
        1 << self.pos_bits
    }

    pub fn pos_bits(&self) -> u32 {
        self.pos_bits
    }

    #[inline]
    pub fn pack(&self, pos: u32, hint: u32) -> Packed {
        assert!((pos as u64) >> self.pos_bits == 0, "position {pos} out of range");
        assert!((hint as u64) >> self.hint_bits == 0, "hint {hint} out of range");
        (hint << self.pos_bits) | pos
    }

    #[inline]
    pub fn unpack(&self, u: Packed) -> (u32, u32) {
        let pmask = ((1u64 << self.pos_bits) - 1) as u32;
        let hmask = ((1u64 << self.hint_bits) - 1) as u32;
        (u & pmask, (u >> self.pos_bits) & hmask)
    }

    /// Split a global linear position into (bucket index, offset).
    #[inline]
    pub fn split(&self, pos: u64) -> (usize, u32) {
        (
            (pos >> self.pos_bits) as usize,
            (pos & ((1u64 << self.pos_bits) - 1)) as u32,
        )
    }
}

// Checkpoint table growth, in rows of n_buckets cursors.
const INITIAL_SLICE_ALLOC: usize = 256;
const INCREASE_SLICE_ALLOC: usize = 128;

/// Pre-allocated, append-only storage of updates partitioned by bucket.
///
/// All buckets live in a single flat arena; bucket k owns slots
/// `k*bucket_size..(k+1)*bucket_size` with independent write and read
/// cursors. One instance is filled once per region set, consumed once
/// or twice, then reset.
pub struct BucketArray {
    codec: Codec,
    n_buckets: usize,
    bucket_size: usize,
    updates: Vec<Packed>,
    write: Vec<u32>,
    read: Vec<u32>,
    // Row s holds every bucket's write cursor when checkpoint s was
    // added; updates of slice s live between rows s and s+1.
    slice_start: Vec<u32>,
    slice_index: Vec<u32>,
    alloc_slices: usize,
    checked: bool,
    overflows: u64,
    first_overflow: Option<(usize, Packed)>,
}

impl BucketArray {
    pub fn new(codec: Codec, n_buckets: usize, bucket_size: usize, checked: bool) -> BucketArray {
        assert!(n_buckets > 0 && bucket_size > 0);
        BucketArray {
            codec,
            n_buckets,
            bucket_size,
            updates: vec![0; n_buckets * bucket_size],
            write: vec![0; n_buckets],
            read: vec![0; n_buckets],
            slice_start: Vec::with_capacity(INITIAL_SLICE_ALLOC * n_buckets),
            slice_index: Vec::with_capacity(INITIAL_SLICE_ALLOC),
            alloc_slices: INITIAL_SLICE_ALLOC,
            checked,
            overflows: 0,
            first_overflow: None,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Append an update to bucket k.
    ///
    /// In checked mode (the default) an update overflowing the bucket
    /// is dropped and counted, never written over the neighbouring
    /// bucket. The unchecked mode skips the bound test; it is only
    /// sound after a checked run with identical parameters.
    #[inline]
    pub fn push(&mut self, k: usize, u: Packed) {
        let w = self.write[k] as usize;
        if self.checked {
            if w >= self.bucket_size {
                if self.overflows == 0 {
                    self.first_overflow = Some((k, u));
                }
                self.overflows += 1;
                return;
            }
            self.updates[k * self.bucket_size + w] = u;
        } else {
            debug_assert!(w < self.bucket_size);
            unsafe {
                *self.updates.get_unchecked_mut(k * self.bucket_size + w) = u;
            }
        }
        self.write[k] = (w + 1) as u32;
    }

    /// Append an explicit zero update as an end marker, for consumers
    /// that scan instead of tracking lengths. Beware that a genuine
    /// update at position 0 with hint 0 is encoded identically.
    pub fn push_sentinel(&mut self, k: usize) {
        self.push(k, 0);
    }

    /// Record every bucket's current write cursor under the given id.
    /// Must be called before the contributions it names; slice s then
    /// covers the updates pushed between checkpoints s and s+1.
    pub fn add_checkpoint(&mut self, id: u32) {
        if self.slice_index.len() == self.alloc_slices {
            self.alloc_slices += INCREASE_SLICE_ALLOC;
            self.slice_start
                .reserve_exact(INCREASE_SLICE_ALLOC * self.n_buckets);
            self.slice_index.reserve_exact(INCREASE_SLICE_ALLOC);
        }
        self.slice_start.extend_from_slice(&self.write);
        self.slice_index.push(id);
    }

    pub fn n_checkpoints(&self) -> usize {
        self.slice_index.len()
    }

    pub fn checkpoint_id(&self, s: usize) -> u32 {
        self.slice_index[s]
    }

    /// The updates of bucket k contributed by slice s, i.e. between
    /// checkpoints s and s+1 (up to the live write cursor for the last
    /// slice). Restartable per (bucket, slice) pair.
    pub fn slice(&self, k: usize, s: usize) -> &[Packed] {
        assert!(s < self.slice_index.len());
        let lo = self.slice_start[s * self.n_buckets + k] as usize;
        let hi = if s + 1 < self.slice_index.len() {
            self.slice_start[(s + 1) * self.n_buckets + k] as usize
        } else {
            self.write[k] as usize
        };
        &self.updates[k * self.bucket_size + lo..k * self.bucket_size + hi]
    }

    /// Direct scan of bucket k from start to the live write cursor.
    pub fn scan(&self, k: usize) -> &[Packed] {
        &self.updates[k * self.bucket_size..k * self.bucket_size + self.write[k] as usize]
    }

    pub fn len(&self, k: usize) -> usize {
        self.write[k] as usize
    }

    /// Sequential reading iterator over bucket k.
    #[inline]
    pub fn next_update(&mut self, k: usize) -> Option<Packed> {
        let r = self.read[k];
        if r >= self.write[k] {
            return None;
        }
        self.read[k] = r + 1;
        Some(self.updates[k * self.bucket_size + r as usize])
    }

    pub fn is_end(&self, k: usize) -> bool {
        self.read[k] == self.write[k]
    }

    pub fn rewind(&mut self, k: usize) {
        self.read[k] = 0;
    }

    /// Step the read cursor back by one, to read the most recently
    /// read update again.
    pub fn rewind_by_1(&mut self, k: usize) {
        if self.read[k] > 0 {
            self.read[k] -= 1;
        }
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn first_overflow(&self) -> Option<(usize, Packed)> {
        self.first_overflow
    }

    /// Fraction of capacity used by the fullest bucket.
    pub fn max_full(&self) -> f64 {
        let wmax = self.write.iter().copied().max().unwrap_or(0);
        wmax as f64 / self.bucket_size as f64
    }

    /// Fold all bucket contents into a checksum. The fold is
    /// commutative so the result does not depend on bucket order.
    pub fn checksum(&self, cks: &mut Checksum) {
        for k in 0..self.n_buckets {
            for &u in self.scan(k) {
                cks.update(u);
            }
        }
    }

    /// Forget all contents and checkpoints, for the next region set.
    /// The backing arena is kept.
    pub fn reset(&mut self) {
        self.write.fill(0);
        self.read.fill(0);
        self.slice_start.clear();
        self.slice_index.clear();
        self.overflows = 0;
        self.first_overflow = None;
    }
}

/// Coarse bucket array used as a funnel in front of a [`BucketArray`]
/// with many buckets. Entries carry 1 (kilo) or 2 (mega) extra bytes
/// identifying the destination fine bucket; flushing demultiplexes
/// them, producing the same fine contents as direct writes.
pub struct FunnelArray {
    indir: usize,
    n_coarse: usize,
    coarse_size: usize,
    // (indir + 4)-byte little-endian entries: tag bytes, then the
    // packed update.
    data: Vec<u8>,
    write: Vec<u32>,
    overflows: u64,
}

impl FunnelArray {
    /// One indirection byte: each coarse bucket covers 256 fine buckets.
    pub fn kilo(n_fine: usize, fine_size: usize) -> FunnelArray {
        FunnelArray::with_indir(1, n_fine, fine_size)
    }

    /// Two indirection bytes, for very large fine bucket counts.
    /// A mega array flushes into a kilo array, not directly into the
    /// fine one.
    pub fn mega(n_fine: usize, fine_size: usize) -> FunnelArray {
        FunnelArray::with_indir(2, n_fine, fine_size)
    }

    fn with_indir(indir: usize, n_fine: usize, fine_size: usize) -> FunnelArray {
        let fan = 1usize << (8 * indir);
        let n_coarse = (n_fine + fan - 1) / fan;
        let coarse_size = fan * fine_size;
        FunnelArray {
            indir,
            n_coarse,
            coarse_size,
            data: vec![0; n_coarse * coarse_size * (indir + 4)],
            write: vec![0; n_coarse],
            overflows: 0,
        }
    }

    pub fn n_coarse(&self) -> usize {
        self.n_coarse
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    #[inline]
    pub fn push(&mut self, fine: usize, u: Packed) {
        let kb = fine >> (8 * self.indir);
        let w = self.write[kb] as usize;
        if w >= self.coarse_size {
            self.overflows += 1;
            return;
        }
        let esize = self.indir + 4;
        let off = (kb * self.coarse_size + w) * esize;
        for b in 0..self.indir {
            self.data[off + b] = (fine >> (8 * b)) as u8;
        }
        self.data[off + self.indir..off + esize].copy_from_slice(&u.to_le_bytes());
        self.write[kb] = (w + 1) as u32;
    }

    fn entry(&self, kb: usize, idx: usize) -> (usize, Packed) {
        let esize = self.indir + 4;
        let off = (kb * self.coarse_size + idx) * esize;
        let mut tag = 0usize;
        for b in 0..self.indir {
            tag |= (self.data[off + b] as usize) << (8 * b);
        }
        let mut le = [0u8; 4];
        le.copy_from_slice(&self.data[off + self.indir..off + esize]);
        (tag, Packed::from_le_bytes(le))
    }

    /// Demultiplex a kilo array into the fine bucket array.
    pub fn flush_into(&self, fine: &mut BucketArray) {
        assert_eq!(self.indir, 1);
        for kb in 0..self.n_coarse {
            for idx in 0..self.write[kb] as usize {
                let (tag, u) = self.entry(kb, idx);
                fine.push((kb << 8) | tag, u);
            }
        }
    }

    /// Demultiplex a mega array into a kilo array.
    pub fn flush_into_kilo(&self, kilo: &mut FunnelArray) {
        assert_eq!(self.indir, 2);
        assert_eq!(kilo.indir, 1);
        for mb in 0..self.n_coarse {
            for idx in 0..self.write[mb] as usize {
                let (tag, u) = self.entry(mb, idx);
                kilo.push((mb << 16) | tag, u);
            }
        }
    }

    /// Forget buffered entries (the overflow count is cumulative and
    /// survives, so a fill pass can report it once at the end).
    pub fn clear(&mut self) {
        self.write.fill(0);
    }
}

#[test]
fn test_codec_roundtrip() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for (pbits, hbits) in [(14, 9), (16, 16), (16, 0), (4, 0), (24, 8)] {
        let c = Codec::new(pbits, hbits);
        for _ in 0..1000 {
            let pos = rng.gen_range(0..1u64 << pbits) as u32;
            let hint = if hbits == 0 {
                0
            } else {
                rng.gen_range(0..1u64 << hbits) as u32
            };
            assert_eq!(c.unpack(c.pack(pos, hint)), (pos, hint));
        }
    }
    let c = Codec::new(14, 9);
    assert_eq!(c.split(0x12345), (0x4, 0x2345));
}

#[test]
#[should_panic]
fn test_codec_pack_checked() {
    let c = Codec::new(14, 0);
    c.pack(1 << 14, 0);
}

#[test]
#[should_panic]
fn test_codec_full_width() {
    // 32 position bits would make pack shift by the full word width.
    Codec::new(32, 0);
}

#[test]
fn test_checkpoint_replay() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let codec = Codec::new(10, 6);
    let mut ba = BucketArray::new(codec, 7, 200, true);
    // Interleave pushes and checkpoints; concatenating all slices in
    // order must reproduce the direct scan exactly.
    for s in 0..12u32 {
        ba.add_checkpoint(s);
        for _ in 0..rng.gen_range(0..80) {
            let k = rng.gen_range(0..7);
            ba.push(k, rng.gen_range(0..1 << 16));
        }
    }
    assert_eq!(ba.overflows(), 0);
    assert_eq!(ba.n_checkpoints(), 12);
    for k in 0..7 {
        let mut replay = vec![];
        for s in 0..ba.n_checkpoints() {
            replay.extend_from_slice(ba.slice(k, s));
        }
        assert_eq!(&replay[..], ba.scan(k));
    }
}

#[test]
fn test_checkpoint_table_growth() {
    let codec = Codec::new(8, 0);
    let mut ba = BucketArray::new(codec, 2, 1200, true);
    // Exceed the initial slice allocation.
    for s in 0..INITIAL_SLICE_ALLOC as u32 + 100 {
        ba.add_checkpoint(s);
        ba.push(0, s % 256);
    }
    assert_eq!(ba.n_checkpoints(), INITIAL_SLICE_ALLOC + 100);
    assert_eq!(ba.checkpoint_id(300), 300);
    assert_eq!(ba.slice(0, 300), &[300u32 % 256]);
    assert_eq!(ba.slice(1, 300), &[] as &[Packed]);
}

#[test]
fn test_push_overflow_checked() {
    let codec = Codec::new(8, 0);
    let size = 32;
    let mut ba = BucketArray::new(codec, 3, size, true);
    for i in 0..size {
        ba.push(1, (i + 1) as Packed);
    }
    assert_eq!(ba.overflows(), 0);
    // The (size+1)-th push is dropped and reported.
    ba.push(1, 0xdead);
    assert_eq!(ba.overflows(), 1);
    assert_eq!(ba.first_overflow(), Some((1, 0xdead)));
    assert_eq!(ba.scan(1)[0], 1);
    assert_eq!(ba.len(1), size);
    // Neighbouring buckets untouched.
    assert_eq!(ba.len(0), 0);
    assert_eq!(ba.len(2), 0);
    assert!((ba.max_full() - 1.0).abs() < 1e-9);
}

#[test]
fn test_read_cursor() {
    let codec = Codec::new(8, 0);
    let mut ba = BucketArray::new(codec, 1, 16, true);
    ba.push(0, 3);
    ba.push(0, 4);
    ba.push_sentinel(0);
    assert_eq!(ba.next_update(0), Some(3));
    ba.rewind_by_1(0);
    assert_eq!(ba.next_update(0), Some(3));
    assert_eq!(ba.next_update(0), Some(4));
    assert_eq!(ba.next_update(0), Some(0));
    assert!(ba.is_end(0));
    assert_eq!(ba.next_update(0), None);
    ba.rewind(0);
    assert_eq!(ba.next_update(0), Some(3));
    ba.reset();
    assert_eq!(ba.len(0), 0);
    assert_eq!(ba.n_checkpoints(), 0);
}

#[test]
fn test_bucket_checksum() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let codec = Codec::new(8, 0);
    let mut ba = BucketArray::new(codec, 5, 150, true);
    let mut naive = 0u64;
    for _ in 0..300 {
        let u: Packed = rng.gen_range(0..1 << 8);
        ba.push(rng.gen_range(0..5), u);
        naive = (naive + u as u64) % 4093;
    }
    let mut cks = Checksum::new(4093);
    ba.checksum(&mut cks);
    assert_eq!(cks.value() as u64, naive);
}

#[test]
fn test_funnel_equivalence() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let codec = Codec::new(8, 0);
    let n_fine = 1000;
    let fine_size = 40;
    let mut direct = BucketArray::new(codec, n_fine, fine_size, true);
    let mut funneled = BucketArray::new(codec, n_fine, fine_size, true);
    let mut kilo = FunnelArray::kilo(n_fine, fine_size);
    let mut mega = FunnelArray::mega(n_fine, fine_size);
    let mut kilo2 = FunnelArray::kilo(n_fine, fine_size);
    for _ in 0..5000 {
        let k = rng.gen_range(0..n_fine);
        let u = rng.gen_range(0..1 << 8);
        direct.push(k, u);
        kilo.push(k, u);
        mega.push(k, u);
    }
    kilo.flush_into(&mut funneled);
    assert_eq!(funneled.overflows(), 0);
    for k in 0..n_fine {
        assert_eq!(direct.scan(k), funneled.scan(k));
    }
    // Mega goes through an extra kilo stage.
    let mut funneled2 = BucketArray::new(codec, n_fine, fine_size, true);
    mega.flush_into_kilo(&mut kilo2);
    kilo2.flush_into(&mut funneled2);
    for k in 0..n_fine {
        assert_eq!(direct.scan(k), funneled2.scan(k));
    }
}
