// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Sieve configuration.
//!
//! All tunable quantities are carried by an explicit [`Config`] value
//! instead of process-wide constants, so that several independent sieve
//! configurations can coexist (isolated unit tests need this).
//!
//! The single most load-bearing parameter is the per-bucket capacity
//! computed by [`bucket_capacity`]: it is an a-priori density estimate,
//! and a bucket filling beyond it during the fill pass means the
//! estimate was wrong for the chosen factor base.

use crate::fbase::FBase;

/// Largest prime below 2^32, the default checksum modulus.
pub const CHECKSUM_MODULUS: u32 = 4294967291;

#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// log2 of the bucket region size (positions per bucket).
    /// At most 16 so that in-region positions fit the u16 survivor
    /// records produced by the purge pass.
    pub pos_bits: u32,
    /// Width of the per-update prime hint. May be zero, in which case
    /// the prime identity is tracked only through slice checkpoints.
    pub hint_bits: u32,
    /// Entries of weight below this bound are not bucket-sieved
    /// (they belong to a line siever, outside this crate).
    pub min_weight: u8,
    /// Bounds-checked pushes (the default). The unchecked fast path
    /// must only be enabled after a checked run with identical
    /// parameters has validated the capacity estimate.
    pub checked: bool,
    /// Modulus for region checksums.
    pub checksum_modulus: u32,
    /// Initial log-norm budget of every sieve cell.
    pub norm_target: u8,
    /// Remaining budget below which a cell is a smooth candidate.
    pub threshold: u8,
}

impl Config {
    pub fn new(pos_bits: u32) -> Config {
        assert!(1 <= pos_bits && pos_bits <= 16);
        Config {
            pos_bits,
            hint_bits: 0,
            min_weight: 0,
            checked: true,
            checksum_modulus: CHECKSUM_MODULUS,
            norm_target: 255,
            threshold: 0,
        }
    }

    /// Opt out of bucket overflow checks. Requires a prior successful
    /// checked run with the same factor base and shape.
    pub fn unchecked(mut self) -> Config {
        self.checked = false;
        self
    }

    pub fn region_size(&self) -> usize {
        1 << self.pos_bits
    }

    /// Number of bucket regions covering positions 0..max_pos.
    pub fn n_regions(&self, max_pos: u64) -> usize {
        ((max_pos + (1 << self.pos_bits) - 1) >> self.pos_bits) as usize
    }
}

/// A-priori bucket capacity estimate for a factor base.
///
/// An entry of prime p hits a fraction 1/p of all positions, so the
/// expected number of updates per region is region_size/p, summed over
/// bucketed entries. The headroom factor absorbs the uneven
/// distribution across regions (the j=0 row only contributes canonical
/// representatives).
pub fn bucket_capacity(fb: &FBase, cfg: &Config) -> usize {
    let rsize = cfg.region_size() as f64;
    let mut fill = 0.0;
    for idx in 0..fb.len() {
        let e = fb.entry(idx);
        if e.weight >= cfg.min_weight && !e.is_projective() {
            fill += rsize / e.p as f64;
        }
    }
    bucket_misalignment((1.4 * fill) as usize + 16)
}

// Keep bucket sizes away from multiples of the cache line period so
// that the per-bucket write cursors do not alias the same cache sets.
fn bucket_misalignment(sz: usize) -> usize {
    let sz = (sz + 7) & !7;
    if sz % 256 == 0 {
        sz + 8
    } else {
        sz
    }
}

#[test]
#[should_panic]
fn test_region_too_large() {
    // Positions of a region must fit in u16 survivor records.
    Config::new(18);
}

#[test]
fn test_n_regions() {
    assert_eq!(Config::new(16).region_size(), 1 << 16);
    let cfg = Config::new(14);
    assert_eq!(cfg.region_size(), 16384);
    assert_eq!(cfg.n_regions(16384), 1);
    assert_eq!(cfg.n_regions(16385), 2);
    assert_eq!(cfg.n_regions(1 << 20), 64);
}

#[test]
fn test_bucket_misalignment() {
    assert_eq!(bucket_misalignment(250), 256 + 8);
    assert_eq!(bucket_misalignment(1000), 1000);
}
