// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Geometry of the sieve area and p-lattice enumeration bases.
//!
//! The sieve area is the set of coordinates (i,j) with
//! -I/2 <= i < I/2 and j0 <= j < j0+j_rows, mapped to the linear
//! position ((j-j0) << i_bits) | (i + I/2). Distinct j strips give
//! disjoint position spaces, so worker threads can each own a strip.
//!
//! For an affine entry (p, r), the hits form the lattice
//! {(i,j) : i ≡ r·j mod p}, generated by (p,0) and (r,1). Gauss
//! reduction shortens this basis; the fill pass then walks the lattice
//! with one vector addition per point, using nested iteration along
//! the first reduced vector and a binary Gray code over doublings of
//! the second (see [`GrayBasis`]).

use num_integer::Integer;

use crate::fbase::Entry;

#[derive(Clone, Copy, Debug)]
pub struct Shape {
    pub i_bits: u32,
    pub j0: u32,
    pub j_rows: u32,
}

impl Shape {
    pub fn new(i_bits: u32, j0: u32, j_rows: u32) -> Shape {
        assert!(1 <= i_bits && i_bits < 32 && j_rows > 0);
        Shape { i_bits, j0, j_rows }
    }

    pub fn i_span(&self) -> i64 {
        1i64 << self.i_bits
    }

    /// Size of the linear position space of this strip.
    pub fn max_pos(&self) -> u64 {
        (self.j_rows as u64) << self.i_bits
    }

    /// Linear position of (i,j), or None when outside the strip.
    #[inline]
    pub fn position(&self, i: i64, j: i64) -> Option<u64> {
        let half = 1i64 << (self.i_bits - 1);
        if i < -half || i >= half {
            return None;
        }
        if j < self.j0 as i64 || j >= (self.j0 + self.j_rows) as i64 {
            return None;
        }
        Some((((j - self.j0 as i64) as u64) << self.i_bits) | (i + half) as u64)
    }

    /// Inverse of [`Shape::position`].
    pub fn coords(&self, pos: u64) -> (i64, i64) {
        let half = 1i64 << (self.i_bits - 1);
        let i = (pos & ((1u64 << self.i_bits) - 1)) as i64 - half;
        let j = (pos >> self.i_bits) as i64 + self.j0 as i64;
        (i, j)
    }
}

/// A Gauss-reduced basis of the p-lattice of an entry.
#[derive(Clone, Copy, Debug)]
pub struct PLattice {
    pub v0: (i64, i64),
    pub v1: (i64, i64),
}

fn norm(v: (i64, i64)) -> i64 {
    v.0 * v.0 + v.1 * v.1
}

fn dot(u: (i64, i64), v: (i64, i64)) -> i64 {
    u.0 * v.0 + u.1 * v.1
}

/// Lagrange-Gauss reduction of ((p,0), (r,1)).
///
/// Returns None for projective entries: there is no affine starting
/// point and the entry is skipped, not errored.
pub fn reduce(e: &Entry) -> Option<PLattice> {
    if e.is_projective() {
        return None;
    }
    let mut u = (e.p as i64, 0i64);
    let mut v = (e.r as i64, 1i64);
    loop {
        if norm(u) < norm(v) {
            std::mem::swap(&mut u, &mut v);
        }
        let nv = norm(v);
        // Nearest integer to dot/nv.
        let q = (2 * dot(u, v) + nv).div_floor(&(2 * nv));
        if q == 0 {
            break;
        }
        u = (u.0 - q * v.0, u.1 - q * v.1);
    }
    // v is now the shorter vector.
    Some(PLattice { v0: v, v1: u })
}

/// Enumeration basis covering a strip.
///
/// Coefficient ranges come from Cramer bounds: any strip point equals
/// c0·v0 + c1·v1 with |c0| <= (imax·|v1.j| + jmax·|v1.i|)/p (and
/// symmetrically for c1), so walking c0 over [-2^(a-1), 2^(a-1)) and
/// c1 over [-2^(b-1), 2^(b-1)) visits every strip point of the
/// lattice. c0 is the nested innermost direction; c1 is enumerated by
/// a binary Gray code over the doubled vectors, one vector addition or
/// subtraction per step.
#[derive(Clone, Debug)]
pub struct GrayBasis {
    pub origin: (i64, i64),
    pub v0: (i64, i64),
    /// log2 of the c0 span.
    pub a: u32,
    /// Doublings of v1: v1, 2·v1, ..., 2^(b-1)·v1.
    pub vecs: Vec<(i64, i64)>,
}

impl GrayBasis {
    pub fn new(pl: &PLattice, p: u32, shape: &Shape) -> GrayBasis {
        let imax = 1i64 << (shape.i_bits - 1);
        let jmax = (shape.j0 + shape.j_rows) as i64;
        let c0b = (imax * pl.v1.1.abs() + jmax * pl.v1.0.abs()) / p as i64 + 1;
        let c1b = (imax * pl.v0.1.abs() + jmax * pl.v0.0.abs()) / p as i64 + 1;
        let a = span_bits(c0b);
        let b = span_bits(c1b);
        assert!(a + b <= 34, "enumeration span too large (p={p})");
        let h0 = 1i64 << (a - 1);
        let h1 = 1i64 << (b - 1);
        let origin = (
            -h0 * pl.v0.0 - h1 * pl.v1.0,
            -h0 * pl.v0.1 - h1 * pl.v1.1,
        );
        let vecs = (0..b)
            .map(|k| (pl.v1.0 << k, pl.v1.1 << k))
            .collect();
        GrayBasis {
            origin,
            v0: pl.v0,
            a,
            vecs,
        }
    }
}

// Smallest a with 2^(a-1) >= bound + 1.
fn span_bits(bound: i64) -> u32 {
    let mut a = 1;
    while (1i64 << (a - 1)) < bound + 1 {
        a += 1;
    }
    a
}

#[test]
fn test_position_roundtrip() {
    let s = Shape::new(10, 16, 64);
    assert_eq!(s.max_pos(), 64 << 10);
    assert_eq!(s.position(0, 15), None);
    assert_eq!(s.position(512, 20), None);
    for (i, j) in [(-512, 16), (511, 79), (0, 40), (-3, 16)] {
        let pos = s.position(i, j).unwrap();
        assert!(pos < s.max_pos());
        assert_eq!(s.coords(pos), (i, j));
    }
}

#[test]
fn test_reduce() {
    for (p, r) in [(2u32, 1u32), (127, 35), (1009, 1), (65537, 40000), (3, 0)] {
        let e = Entry::new(p, r);
        let pl = reduce(&e).unwrap();
        // Both vectors are lattice vectors.
        for v in [pl.v0, pl.v1] {
            assert_eq!((v.0 - r as i64 * v.1).rem_euclid(p as i64), 0, "p={p} r={r}");
        }
        // Determinant is ±p.
        assert_eq!((pl.v0.0 * pl.v1.1 - pl.v0.1 * pl.v1.0).abs(), p as i64);
        // v0 is the shorter vector.
        assert!(norm(pl.v0) <= norm(pl.v1));
    }
    // Projective root: no starting point.
    let e = Entry::new(17, 17);
    assert!(reduce(&e).is_none());
}

#[test]
fn test_gray_basis_covers() {
    // Every lattice point of the strip must be inside the enumerated
    // coefficient box.
    let shape = Shape::new(8, 0, 50);
    for (p, r) in [(53u32, 17u32), (257, 100), (1013, 512)] {
        let e = Entry::new(p, r);
        let pl = reduce(&e).unwrap();
        let gb = GrayBasis::new(&pl, p, &shape);
        let b = gb.vecs.len() as u32;
        let det = pl.v0.0 * pl.v1.1 - pl.v0.1 * pl.v1.0;
        for j in 0..50i64 {
            for i in -128..128i64 {
                if (i - r as i64 * j).rem_euclid(p as i64) != 0 {
                    continue;
                }
                // Solve (i,j) = c0 v0 + c1 v1 by Cramer.
                let d0 = i * pl.v1.1 - j * pl.v1.0;
                let d1 = pl.v0.0 * j - pl.v0.1 * i;
                assert_eq!(d0 % det, 0);
                assert_eq!(d1 % det, 0);
                let (c0, c1) = (d0 / det, d1 / det);
                assert!(-(1i64 << (gb.a - 1)) <= c0 && c0 < (1i64 << (gb.a - 1)));
                assert!(-(1i64 << (b - 1)) <= c1 && c1 < (1i64 << (b - 1)));
            }
        }
    }
}
