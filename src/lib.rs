// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

pub mod bucket;
pub mod checksum;
pub mod fbase;
pub mod lattice;
pub mod params;

// Sieve passes
pub mod apply;
pub mod fill;

// Driver
pub mod las;

// Input numbers for the rational-side demo siever.
pub type Uint = bnum::types::U256;
