// Copyright 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Bibliography:
//!
//! J. Franke, T. Kleinjung, Continued fractions and lattice sieving
//! https://www.mathi.uni-heidelberg.de/~thorsten/paper/latsieve.ps
//!
//! https://en.wikipedia.org/wiki/General_number_field_sieve

use std::str::FromStr;

use yamalas::fbase::FBase;
use yamalas::las;
use yamalas::params::Config;
use yamalas::Uint;

fn main() {
    let arg = arguments::parse(std::env::args()).unwrap();
    if arg.orphans.len() != 1 {
        println!(
            "Usage: ylas [--threads N] [--ibits B] [--jrows J] [--fb SIZE] [--threshold T] NUMBER"
        );
        return;
    }
    let threads = arg.get::<usize>("threads");
    let i_bits = arg.get::<u32>("ibits").unwrap_or(14);
    let j_rows = arg.get::<u32>("jrows").unwrap_or(1024);
    let fb_size = arg.get::<u32>("fb").unwrap_or(10000);
    let n = Uint::from_str(&arg.orphans[0]).expect("could not read decimal number");
    if n.bits() < 2 {
        panic!("Number too small");
    }
    eprintln!("Input number {}", n);
    let m = isqrt(&n);
    eprintln!("Rational root m = {} ({} bits)", m, m.bits());
    let fb = FBase::rational(&m, fb_size);
    eprintln!("Smoothness bound {}", fb.bound());
    eprintln!("Factor base size {}", fb.len());

    let mut cfg = Config::new(14);
    cfg.hint_bits = 8;
    // Smaller entries belong to a line siever, not to buckets.
    cfg.min_weight = 8;
    // Every cell starts from an upper bound on log2 |i - m·j| over
    // the sieve area, with a small margin.
    let jbits = 32 - u32::leading_zeros(j_rows);
    cfg.norm_target = (m.bits() + jbits + 8) as u8;
    cfg.threshold = arg
        .get::<u8>("threshold")
        .unwrap_or(cfg.norm_target / 3);
    eprintln!(
        "Sieve area {}x{} norm target {} threshold {}",
        1u64 << i_bits,
        j_rows,
        cfg.norm_target,
        cfg.threshold
    );

    let tpool: Option<rayon::ThreadPool> = threads.map(|t| {
        eprintln!("Using a pool of {} threads", t);
        rayon::ThreadPoolBuilder::new()
            .num_threads(t)
            .build()
            .expect("cannot create thread pool")
    });
    let tpool = tpool.as_ref();

    let t0 = std::time::Instant::now();
    let report = las::sieve(&fb, i_bits, j_rows, threads.unwrap_or(1), &cfg, tpool);
    eprintln!(
        "Sieved {} updates ({} entries skipped) in {:.3}s, fullest bucket {:.1}%",
        report.pushed,
        report.skipped,
        t0.elapsed().as_secs_f64(),
        100.0 * report.max_full,
    );
    println!("survivors {}", report.survivors);
    println!("checksum {}", report.checksum.value());
}

// Integer square root by Newton's method.
fn isqrt(n: &Uint) -> Uint {
    use num_traits::One;
    let mut r = Uint::one() << (n.bits() / 2 + 1);
    loop {
        let r2 = (r + *n / r) >> 1;
        if r2 >= r {
            return r;
        }
        r = r2;
    }
}
