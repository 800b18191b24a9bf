// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Fill pass: walk the factor base and radix-sort hits into buckets.
//!
//! The factor base is pre-sorted by weight; for each weight class the
//! buckets are checkpointed, then every entry of the class is reduced
//! to a short p-lattice basis and its hits in the strip are enumerated
//! with one vector addition per point. Only the canonical
//! representative of each projective pair {(i,j), (-i,-j)} is emitted
//! (j > 0, or j = 0 with i > 0), so no point is counted twice and the
//! origin is never pushed.
//!
//! When hints are enabled, a weight class is checkpointed in chunks of
//! 2^hint_bits entries and the hint is the entry offset inside its
//! chunk, so a purged update identifies its exact prime without
//! rescanning the whole factor base.
//!
//! A bucket overflow discovered after the pass is fatal: it means the
//! a-priori bucket capacity estimate was wrong, which is the central
//! configuration invariant of the engine.

use crate::bucket::{BucketArray, FunnelArray};
use crate::fbase::{Entry, FBase};
use crate::lattice::{self, GrayBasis, Shape};
use crate::params::Config;

#[derive(Clone, Copy, Debug, Default)]
pub struct FillStats {
    /// Updates pushed into buckets.
    pub pushed: u64,
    /// Entries skipped (projective or no starting point).
    pub skipped: usize,
}

// Destination of fill updates: either the fine bucket array, or a
// coarse funnel flushed at checkpoint boundaries.
trait Sink {
    fn checkpoint(&mut self, id: u32);
    fn push(&mut self, pos: u64, hint: u32);
}

struct Direct<'a> {
    ba: &'a mut BucketArray,
}

impl<'a> Sink for Direct<'a> {
    fn checkpoint(&mut self, id: u32) {
        self.ba.add_checkpoint(id);
    }

    #[inline]
    fn push(&mut self, pos: u64, hint: u32) {
        let codec = self.ba.codec();
        let (k, off) = codec.split(pos);
        self.ba.push(k, codec.pack(off, hint));
    }
}

struct Funneled<'a> {
    ba: &'a mut BucketArray,
    funnel: &'a mut FunnelArray,
}

impl<'a> Funneled<'a> {
    fn flush(&mut self) {
        self.funnel.flush_into(self.ba);
        self.funnel.clear();
    }
}

impl<'a> Sink for Funneled<'a> {
    fn checkpoint(&mut self, id: u32) {
        // Flushing before the checkpoint keeps the fine checkpoint
        // table identical to the one direct filling would produce.
        self.flush();
        self.ba.add_checkpoint(id);
    }

    #[inline]
    fn push(&mut self, pos: u64, hint: u32) {
        let codec = self.ba.codec();
        let (k, off) = codec.split(pos);
        self.funnel.push(k, codec.pack(off, hint));
    }
}

/// Enumerate the canonical strip hits of one reduced entry.
fn fill_entry(e: &Entry, shape: &Shape, mut emit: impl FnMut(i64, i64)) -> bool {
    let Some(pl) = lattice::reduce(e) else {
        return false;
    };
    let gb = GrayBasis::new(&pl, e.p, shape);
    let b = gb.vecs.len() as u32;
    let span0 = 1u64 << gb.a;
    let mut g = 0u64;
    let mut row = gb.origin;
    for t in 0..1u64 << b {
        // Nested innermost walk along v0.
        let (mut i, mut j) = row;
        for _ in 0..span0 {
            if j > 0 || (j == 0 && i > 0) {
                emit(i, j);
            }
            i += gb.v0.0;
            j += gb.v0.1;
        }
        if t + 1 < 1 << b {
            // Gray code step: flip one bit of the c1 coefficient, i.e.
            // add or subtract a single doubled vector.
            let bit = (t + 1).trailing_zeros() as usize;
            g ^= 1 << bit;
            let v = gb.vecs[bit];
            if g >> bit & 1 == 1 {
                row = (row.0 + v.0, row.1 + v.1);
            } else {
                row = (row.0 - v.0, row.1 - v.1);
            }
        }
    }
    true
}

/// Fill buckets directly (fine bucket counts small enough that all
/// write cursors stay cache-resident).
pub fn fill(ba: &mut BucketArray, fb: &FBase, shape: &Shape, cfg: &Config) -> FillStats {
    let stats = walk(fb, shape, cfg, &mut Direct { ba: &mut *ba });
    check_overflow(ba);
    stats
}

/// Fill through a coarse funnel.
pub fn fill_funnel(
    ba: &mut BucketArray,
    funnel: &mut FunnelArray,
    fb: &FBase,
    shape: &Shape,
    cfg: &Config,
) -> FillStats {
    let stats = {
        let mut sink = Funneled {
            ba: &mut *ba,
            funnel: &mut *funnel,
        };
        let stats = walk(fb, shape, cfg, &mut sink);
        sink.flush();
        stats
    };
    if funnel.overflows() > 0 {
        panic!(
            "funnel overflowed ({} updates dropped): coarse bucket capacity too small",
            funnel.overflows()
        );
    }
    check_overflow(ba);
    stats
}

fn walk(fb: &FBase, shape: &Shape, cfg: &Config, sink: &mut dyn Sink) -> FillStats {
    let mut stats = FillStats::default();
    let (wmin, wmax) = fb.weight_range();
    let wmin = std::cmp::max(wmin, cfg.min_weight);
    let chunk_size = if cfg.hint_bits > 0 {
        1usize << cfg.hint_bits
    } else {
        usize::MAX
    };
    for w in wmin..=wmax {
        let class = fb.weight_class(w);
        if class.is_empty() {
            continue;
        }
        let mut start = class.start;
        while start < class.end {
            let chunk_end = std::cmp::min(start.saturating_add(chunk_size), class.end);
            sink.checkpoint(w as u32);
            for (off, idx) in (start..chunk_end).enumerate() {
                let e = fb.entry(idx);
                if e.is_projective() {
                    // Unsupported configuration, expected skip.
                    stats.skipped += 1;
                    continue;
                }
                let hint = if cfg.hint_bits > 0 { off as u32 } else { 0 };
                let mut pushed = 0;
                let ok = fill_entry(&e, shape, |i, j| {
                    if let Some(pos) = shape.position(i, j) {
                        sink.push(pos, hint);
                        pushed += 1;
                    }
                });
                if !ok {
                    // No starting point for this entry, skip it.
                    stats.skipped += 1;
                }
                stats.pushed += pushed;
            }
            start = chunk_end;
        }
    }
    stats
}

fn check_overflow(ba: &BucketArray) {
    if ba.overflows() > 0 {
        let (k, u) = ba.first_overflow().unwrap();
        let (pos, _) = ba.codec().unpack(u);
        panic!(
            "bucket {} overflowed its capacity {} ({} updates dropped, first position {}): \
             bucket capacity estimate too small",
            k,
            ba.bucket_size(),
            ba.overflows(),
            pos,
        );
    }
}

#[cfg(test)]
fn all_positions(ba: &BucketArray) -> Vec<u64> {
    let codec = ba.codec();
    let mut got = vec![];
    for k in 0..ba.n_buckets() {
        for &u in ba.scan(k) {
            let (pos, _) = codec.unpack(u);
            got.push(((k as u64) << codec.pos_bits()) | pos as u64);
        }
    }
    got.sort_unstable();
    got
}

#[cfg(test)]
fn brute_force(e: &Entry, shape: &Shape) -> Vec<u64> {
    let mut want = vec![];
    let half = shape.i_span() / 2;
    for j in shape.j0 as i64..(shape.j0 + shape.j_rows) as i64 {
        for i in -half..half {
            if j == 0 && i <= 0 {
                continue;
            }
            if (i - e.r as i64 * j).rem_euclid(e.p as i64) == 0 {
                want.push(shape.position(i, j).unwrap());
            }
        }
    }
    want
}

#[test]
fn test_fill_coverage() {
    // Positions produced by the fill pass must equal a brute force
    // scan of the strip for the divisibility relation.
    use crate::bucket::{BucketArray, Codec};
    let shape = Shape::new(6, 0, 8);
    let cfg = Config::new(5);
    let codec = Codec::new(cfg.pos_bits, cfg.hint_bits);
    for (p, r) in [(7u32, 3u32), (5, 0), (11, 10), (97, 45), (1009, 1)] {
        let e = Entry::new(p, r);
        let fb = FBase::from_entries(vec![e]);
        let n = cfg.n_regions(shape.max_pos());
        let mut ba = BucketArray::new(codec, n, 256, true);
        let stats = fill(&mut ba, &fb, &shape, &cfg);
        let got = all_positions(&ba);
        let want = brute_force(&e, &shape);
        assert_eq!(got, want, "p={p} r={r}");
        assert_eq!(stats.pushed as usize, want.len());
        assert_eq!(stats.skipped, 0);
        // One checkpoint per weight class.
        assert_eq!(ba.n_checkpoints(), 1);
        assert_eq!(ba.checkpoint_id(0), e.weight as u32);
    }
}

#[test]
fn test_fill_skips() {
    use crate::bucket::{BucketArray, Codec};
    let shape = Shape::new(6, 0, 8);
    let cfg = Config::new(5);
    let codec = Codec::new(cfg.pos_bits, cfg.hint_bits);
    // A projective entry contributes nothing but a skip.
    let fb = FBase::from_entries(vec![Entry::new(7, 3), Entry::new(13, 13)]);
    let n = cfg.n_regions(shape.max_pos());
    let mut ba = BucketArray::new(codec, n, 256, true);
    let stats = fill(&mut ba, &fb, &shape, &cfg);
    assert_eq!(stats.skipped, 1);
    assert_eq!(all_positions(&ba), brute_force(&Entry::new(7, 3), &shape));
}

#[test]
fn test_fill_weight_grouping() {
    use crate::bucket::{BucketArray, Codec};
    let shape = Shape::new(7, 0, 16);
    let mut cfg = Config::new(6);
    cfg.hint_bits = 4;
    let codec = Codec::new(cfg.pos_bits, cfg.hint_bits);
    let m = crate::Uint::from(987654321u64);
    let fb = FBase::rational(&m, 60);
    let n = cfg.n_regions(shape.max_pos());
    let mut ba = BucketArray::new(codec, n, 4096, true);
    fill(&mut ba, &fb, &shape, &cfg);
    // Checkpoint ids (weights) are nondecreasing, and within every
    // bucket each slice's updates carry hints below the chunk size.
    let mut prev = 0;
    for s in 0..ba.n_checkpoints() {
        let id = ba.checkpoint_id(s);
        assert!(id >= prev);
        prev = id;
        for k in 0..n {
            for &u in ba.slice(k, s) {
                let (_, hint) = codec.unpack(u);
                assert!(hint < 16);
            }
        }
    }
}

#[test]
fn test_fill_funnel_equivalence() {
    use crate::bucket::{BucketArray, Codec, FunnelArray};
    let shape = Shape::new(6, 0, 80);
    let cfg = Config::new(4);
    let codec = Codec::new(cfg.pos_bits, cfg.hint_bits);
    let m = crate::Uint::from(1234577u64);
    let fb = FBase::rational(&m, 40);
    let n = cfg.n_regions(shape.max_pos());
    assert!(n > 256);
    let mut direct = BucketArray::new(codec, n, 512, true);
    let s1 = fill(&mut direct, &fb, &shape, &cfg);
    let mut fine = BucketArray::new(codec, n, 512, true);
    let mut kilo = FunnelArray::kilo(n, 512);
    let s2 = fill_funnel(&mut fine, &mut kilo, &fb, &shape, &cfg);
    assert_eq!(s1.pushed, s2.pushed);
    assert_eq!(direct.n_checkpoints(), fine.n_checkpoints());
    for k in 0..n {
        assert_eq!(direct.scan(k), fine.scan(k));
        for s in 0..direct.n_checkpoints() {
            assert_eq!(direct.slice(k, s), fine.slice(k, s));
        }
    }
}
