// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Factor base for the lattice siever.
//!
//! An entry (p, r) stands for the prime ideal dividing the lattice
//! points {(i,j) : i ≡ r·j mod p}; r ≥ p encodes a projective root
//! (p divides the leading coefficient), a configuration the fill pass
//! skips. The weight of an entry is the bit length of p, the amount
//! subtracted from a sieve cell per hit.
//!
//! Entries are ordered by nondecreasing weight. The fill pass relies
//! on this to checkpoint buckets once per weight class and never sorts
//! anything itself.

use num_traits::ToPrimitive;

use crate::Uint;

// Factor base primes fit in 24 bits, so weights fit comfortably.
pub const MAX_WEIGHT: usize = 24;

#[derive(Clone, Copy, Debug)]
pub struct Entry {
    pub p: u32,
    pub r: u32,
    pub weight: u8,
}

impl Entry {
    pub fn new(p: u32, r: u32) -> Entry {
        Entry {
            p,
            r,
            weight: (32 - u32::leading_zeros(p)) as u8,
        }
    }

    pub fn is_projective(&self) -> bool {
        self.r >= self.p
    }
}

#[derive(Clone, Debug)]
pub struct FBase {
    pub primes: Vec<u32>,
    pub roots: Vec<u32>,
    pub weights: Vec<u8>,
    // idx_by_weight[w] is the index of the first entry of weight >= w.
    pub idx_by_weight: [usize; MAX_WEIGHT + 2],
}

impl FBase {
    /// Rational side factor base: root of x - m modulo each prime.
    pub fn rational(m: &Uint, size: u32) -> FBase {
        let entries = primes(size)
            .into_iter()
            .map(|p| {
                let r = (*m % Uint::from(p)).to_u32().unwrap();
                Entry::new(p, r)
            })
            .collect();
        FBase::from_entries(entries)
    }

    /// Build from explicit entries, which must already be sorted by
    /// nondecreasing weight.
    pub fn from_entries(entries: Vec<Entry>) -> FBase {
        let mut primes = vec![];
        let mut roots = vec![];
        let mut weights = vec![];
        let mut idx_by_weight = [0; MAX_WEIGHT + 2];
        let mut w = 0;
        let mut prev = 0u8;
        for e in entries {
            assert!(e.p > 1 && (e.weight as usize) <= MAX_WEIGHT);
            assert!(e.weight >= prev, "entries not sorted by weight");
            prev = e.weight;
            if e.weight as usize >= w {
                for idx in w..=e.weight as usize {
                    idx_by_weight[idx] = primes.len();
                }
                w = e.weight as usize + 1;
            }
            primes.push(e.p);
            roots.push(e.r);
            weights.push(e.weight);
        }
        for idx in w..idx_by_weight.len() {
            idx_by_weight[idx] = primes.len();
        }
        FBase {
            primes,
            roots,
            weights,
            idx_by_weight,
        }
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn entry(&self, idx: usize) -> Entry {
        Entry {
            p: self.primes[idx],
            r: self.roots[idx],
            weight: self.weights[idx],
        }
    }

    pub fn bound(&self) -> u32 {
        *self.primes.last().unwrap()
    }

    /// Smallest and largest weights present.
    pub fn weight_range(&self) -> (u8, u8) {
        assert!(self.len() > 0);
        (self.weights[0], *self.weights.last().unwrap())
    }

    /// Indices of the entries of weight w.
    pub fn weight_class(&self, w: u8) -> std::ops::Range<usize> {
        let w = w as usize;
        if w > MAX_WEIGHT {
            return self.len()..self.len();
        }
        self.idx_by_weight[w]..self.idx_by_weight[w + 1]
    }

    /// Resolve a purged update back to its entry: chunk is the rank of
    /// the checkpoint inside its weight class, hint the offset inside
    /// the chunk (see fill).
    pub fn entry_of_hint(&self, w: u8, chunk: usize, chunk_size: usize, hint: u32) -> Entry {
        let class = self.weight_class(w);
        self.entry(class.start + chunk * chunk_size + hint as usize)
    }
}

/// The n first prime numbers, by Eratosthenes over odd integers.
pub fn primes(n: u32) -> Vec<u32> {
    let n = n as usize;
    if n == 0 {
        return vec![];
    }
    // n-th prime is below n(log n + log log n) for n >= 6.
    let bound = std::cmp::max(64, {
        let lf = (n as f64).ln();
        (n as f64 * (lf + lf.ln().max(0.0))) as usize + 16
    });
    let mut composite = vec![false; bound / 2];
    let mut primes = vec![2u32];
    let mut i = 1;
    while primes.len() < n && i < composite.len() {
        if !composite[i] {
            let p = 2 * i + 1;
            primes.push(p as u32);
            let mut k = p * p / 2;
            while k < composite.len() {
                composite[k] = true;
                k += p;
            }
        }
        i += 1;
    }
    assert_eq!(primes.len(), n);
    primes
}

#[test]
fn test_primes() {
    let ps = primes(10000);
    assert_eq!(ps.len(), 10000);
    assert_eq!(ps[0], 2);
    assert_eq!(ps[24], 97);
    assert_eq!(ps.last(), Some(&104729));
}

#[test]
fn test_weight_classes() {
    use std::str::FromStr;
    let m = Uint::from_str("1234567890123456789").unwrap();
    let fb = FBase::rational(&m, 100);
    assert_eq!(fb.len(), 100);
    let (wmin, wmax) = fb.weight_range();
    assert_eq!(wmin, 2); // p = 2, 3
    let mut total = 0;
    for w in wmin..=wmax {
        let class = fb.weight_class(w);
        for idx in class.clone() {
            let e = fb.entry(idx);
            assert_eq!(e.weight, w);
            assert_eq!(e.r, (m % Uint::from(e.p)).to_u32().unwrap());
            assert!(!e.is_projective());
        }
        total += class.len();
    }
    assert_eq!(total, fb.len());
    // Chunked hint resolution.
    let class = fb.weight_class(9);
    assert!(class.len() > 3);
    let e = fb.entry_of_hint(9, 1, 2, 1);
    assert_eq!(e.p, fb.entry(class.start + 3).p);
}
