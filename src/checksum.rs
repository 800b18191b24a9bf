// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Order-independent checksums for cross-run comparison.
//!
//! Bucket contents and sieved region bytes are folded by addition
//! modulo a fixed prime. Addition is commutative and associative, so
//! the combined value does not depend on the order in which buckets or
//! regions are processed, nor on how the work was split among threads.
//! It does depend on the region size, which is a fixed configuration
//! parameter, so checksums are only comparable between runs with
//! identical parameters. They are printed as plain decimal values.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checksum {
    modulus: u32,
    sum: u32,
}

impl Checksum {
    pub fn new(modulus: u32) -> Checksum {
        assert!(modulus > 1);
        Checksum { modulus, sum: 0 }
    }

    pub fn value(&self) -> u32 {
        self.sum
    }

    #[inline]
    pub fn update(&mut self, x: u32) {
        self.sum = ((self.sum as u64 + x as u64) % self.modulus as u64) as u32;
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) {
        // Partial sums of at most 1M bytes cannot overflow u64.
        for chunk in bytes.chunks(1 << 20) {
            let mut acc: u64 = 0;
            for &b in chunk {
                acc += b as u64;
            }
            self.sum = ((self.sum as u64 + acc) % self.modulus as u64) as u32;
        }
    }

    /// Fold another partial checksum into this one.
    pub fn combine(&mut self, other: &Checksum) {
        assert_eq!(self.modulus, other.modulus);
        self.update(other.sum);
    }
}

#[test]
fn test_checksum_order_independent() {
    use crate::params::CHECKSUM_MODULUS;
    use rand::seq::SliceRandom;
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let updates: Vec<u32> = (0..2000).map(|_| rng.gen()).collect();

    let mut direct = Checksum::new(CHECKSUM_MODULUS);
    for &u in &updates {
        direct.update(u);
    }

    // Split into two arbitrary disjoint sub-orderings, fold each
    // independently, combine: same final value.
    let mut shuffled = updates.clone();
    shuffled.shuffle(&mut rng);
    let (a, b) = shuffled.split_at(723);
    let mut ca = Checksum::new(CHECKSUM_MODULUS);
    let mut cb = Checksum::new(CHECKSUM_MODULUS);
    for &u in a {
        ca.update(u);
    }
    for &u in b {
        cb.update(u);
    }
    ca.combine(&cb);
    assert_eq!(direct.value(), ca.value());
}

#[test]
fn test_checksum_bytes() {
    let mut c1 = Checksum::new(997);
    c1.update_bytes(&[1, 2, 3, 250]);
    let mut c2 = Checksum::new(997);
    c2.update_bytes(&[250, 3]);
    let mut c3 = Checksum::new(997);
    c3.update_bytes(&[2, 1]);
    c2.combine(&c3);
    assert_eq!(c1.value(), c2.value());
    assert_eq!(c1.value(), 256 % 997);
}
