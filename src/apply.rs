// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Apply and purge passes: consume one bucket against a sieve region.
//!
//! The apply pass replays a bucket in weight order and subtracts each
//! update's weight from the remaining log-norm budget of its cell. The
//! budget never goes negative: a violation means the enumeration or
//! the weight grouping is broken, and the run aborts rather than
//! produce silently wrong smoothness candidates.
//!
//! The purge pass rewrites the surviving hits (cells whose remaining
//! budget fell below the reporting threshold) into compact records
//! carrying the originating checkpoint, so that resieving can
//! re-derive the exact prime by revisiting one slice of the factor
//! base instead of all of it.

use crate::bucket::BucketArray;

/// Replay bucket k against a region, subtracting weights in ascending
/// checkpoint order. Returns the number of updates applied.
pub fn apply(ba: &BucketArray, k: usize, region: &mut [u8]) -> u64 {
    let codec = ba.codec();
    assert_eq!(region.len(), codec.region_size());
    let mut applied = 0;
    for s in 0..ba.n_checkpoints() {
        let w = ba.checkpoint_id(s) as u8;
        for &u in ba.slice(k, s) {
            let (pos, _) = codec.unpack(u);
            let cell = region[pos as usize];
            assert!(
                cell >= w,
                "sieve accounting violation: bucket {k} position {pos} weight {w} cell {cell}"
            );
            region[pos as usize] = cell - w;
            applied += 1;
        }
    }
    applied
}

/// A surviving hit, rewritten with its originating checkpoint.
/// Together with the fill chunking rule, (slice, hint) identifies the
/// exact factor base entry (see `FBase::entry_of_hint`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Survivor {
    pub pos: u16,
    pub slice: u32,
    pub hint: u32,
}

/// Keep the updates of bucket k whose cell survived the apply pass,
/// discarding everything else.
pub fn purge(ba: &BucketArray, k: usize, region: &[u8], threshold: u8) -> Vec<Survivor> {
    let codec = ba.codec();
    assert!(codec.region_size() <= 1 << 16);
    assert_eq!(region.len(), codec.region_size());
    let mut out = vec![];
    for s in 0..ba.n_checkpoints() {
        for &u in ba.slice(k, s) {
            let (pos, hint) = codec.unpack(u);
            if region[pos as usize] <= threshold {
                out.push(Survivor {
                    pos: pos as u16,
                    slice: s as u32,
                    hint,
                });
            }
        }
    }
    out
}

/// Positions whose remaining budget is at most the threshold, i.e.
/// trial division candidates for the consumer of the region.
pub fn candidates(region: &[u8], threshold: u8) -> Vec<u16> {
    assert!(region.len() <= 1 << 16);
    let mut res = vec![];
    if threshold == u8::MAX {
        return (0..region.len()).map(|i| i as u16).collect();
    }
    let t = threshold + 1;
    let t16 = wide::u8x16::splat(t);
    let mut i = 0;
    while i + 16 <= region.len() {
        unsafe {
            // Cast as [u8;16] to avoid assuming alignment.
            let blk16 = (&region[i] as *const u8) as *const [u8; 16];
            let blk16w = wide::u8x16::new(*blk16);
            if t16 != blk16w.min(t16) {
                // Some element is <= threshold
                for j in 0..16 {
                    if (*blk16)[j] <= threshold {
                        res.push((i + j) as u16);
                    }
                }
            }
        }
        i += 16;
    }
    while i < region.len() {
        if region[i] <= threshold {
            res.push(i as u16);
        }
        i += 1;
    }
    res
}

#[test]
fn test_apply_scenario() {
    use crate::bucket::Codec;
    // Region of 16 positions, one entry of weight 3 hitting
    // positions 2, 5, 9, 13.
    let codec = Codec::new(4, 0);
    let mut ba = BucketArray::new(codec, 1, 8, true);
    ba.add_checkpoint(3);
    for pos in [2u32, 5, 9, 13] {
        ba.push(0, codec.pack(pos, 0));
    }
    let mut region = [10u8; 16];
    let applied = apply(&ba, 0, &mut region);
    assert_eq!(applied, 4);
    assert_eq!(
        region,
        [10, 10, 7, 10, 10, 7, 10, 10, 10, 7, 10, 10, 10, 7, 10, 10]
    );
}

#[test]
fn test_apply_weight_order() {
    use crate::bucket::Codec;
    let codec = Codec::new(4, 0);
    let mut ba = BucketArray::new(codec, 2, 8, true);
    ba.add_checkpoint(2);
    ba.push(0, codec.pack(1, 0));
    ba.push(1, codec.pack(3, 0));
    ba.add_checkpoint(5);
    ba.push(0, codec.pack(1, 0));
    let mut region = [9u8; 16];
    apply(&ba, 0, &mut region);
    assert_eq!(region[1], 9 - 2 - 5);
    region.fill(9);
    apply(&ba, 1, &mut region);
    assert_eq!(region[3], 9 - 2);
}

#[test]
#[should_panic(expected = "accounting violation")]
fn test_apply_accounting_violation() {
    use crate::bucket::Codec;
    let codec = Codec::new(4, 0);
    let mut ba = BucketArray::new(codec, 1, 8, true);
    ba.add_checkpoint(7);
    ba.push(0, codec.pack(3, 0));
    ba.push(0, codec.pack(3, 0));
    let mut region = [10u8; 16];
    // Second subtraction would need 7 but only 3 remain.
    apply(&ba, 0, &mut region);
}

#[test]
fn test_purge() {
    use crate::bucket::Codec;
    let codec = Codec::new(4, 5);
    let mut ba = BucketArray::new(codec, 1, 16, true);
    ba.add_checkpoint(4);
    ba.push(0, codec.pack(2, 11));
    ba.push(0, codec.pack(7, 12));
    ba.add_checkpoint(6);
    ba.push(0, codec.pack(7, 1));
    ba.push(0, codec.pack(9, 2));
    let mut region = [40u8; 16];
    apply(&ba, 0, &mut region);
    // Cells 7 (40-4-6) and 9 (40-6) went lowest; keep budgets <= 34.
    let survivors = purge(&ba, 0, &region, 34);
    assert_eq!(
        survivors,
        vec![
            Survivor { pos: 7, slice: 0, hint: 12 },
            Survivor { pos: 7, slice: 1, hint: 1 },
            Survivor { pos: 9, slice: 1, hint: 2 },
        ]
    );
}

#[test]
fn test_candidates() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    // Length not a multiple of 16 to exercise the scalar tail.
    let region: Vec<u8> = (0..1000).map(|_| rng.gen_range(20..250)).collect();
    for threshold in [19u8, 30, 100, 249] {
        let naive: Vec<u16> = region
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b <= threshold)
            .map(|(i, _)| i as u16)
            .collect();
        assert_eq!(candidates(&region, threshold), naive, "t={threshold}");
    }
    assert_eq!(candidates(&region[..32], 255).len(), 32);
}
