use brunch::Bench;
use std::str::FromStr;
use yamalas::bucket::{BucketArray, Codec};
use yamalas::fbase::{self, FBase};
use yamalas::lattice::Shape;
use yamalas::params::{self, Config};
use yamalas::{apply, fill, Uint};

const M128: &str = "138775954839724585441297917764657773201";

fn bench_config() -> (FBase, Shape, Config) {
    let m = Uint::from_str(M128).unwrap();
    let fb = FBase::rational(&m, 5000);
    let shape = Shape::new(12, 0, 256);
    let mut cfg = Config::new(12);
    cfg.hint_bits = 8;
    cfg.min_weight = 8;
    (fb, shape, cfg)
}

brunch::benches! {
    // Eratosthenes sieve
    Bench::new("sieve 10000 primes")
    .run_seeded(10000, fbase::primes),
    // Raw bucket pushes
    {
        let codec = Codec::new(14, 8);
        Bench::new("push 1M updates into 64 buckets")
        .run_seeded(codec, |codec| {
            let mut ba = BucketArray::new(codec, 64, 1 << 14, true);
            for i in 0..1u64 << 20 {
                let (k, off) = codec.split(i % (64 << 14));
                ba.push(k, codec.pack(off, 0));
                if i % (1 << 14) == 0 {
                    ba.reset();
                }
            }
            ba.len(0)
        })
    },
    // Fill pass on a real factor base
    {
        let (fb, shape, cfg) = bench_config();
        let codec = Codec::new(cfg.pos_bits, cfg.hint_bits);
        let n = cfg.n_regions(shape.max_pos());
        let cap = params::bucket_capacity(&fb, &cfg);
        Bench::new("fill 5000 primes (128-bit m, 4096x256 area)")
        .run_seeded((), |_| {
            let mut ba = BucketArray::new(codec, n, cap, true);
            fill::fill(&mut ba, &fb, &shape, &cfg).pushed
        })
    },
    // Apply pass
    {
        let (fb, shape, cfg) = bench_config();
        let codec = Codec::new(cfg.pos_bits, cfg.hint_bits);
        let n = cfg.n_regions(shape.max_pos());
        let cap = params::bucket_capacity(&fb, &cfg);
        let mut ba = BucketArray::new(codec, n, cap, true);
        fill::fill(&mut ba, &fb, &shape, &cfg);
        Bench::new("apply 5000 primes (4096x256 area)")
        .run_seeded(&ba, |ba| {
            let mut applied = 0;
            let mut region = vec![0u8; cfg.region_size()];
            for k in 0..n {
                region.fill(200);
                applied += apply::apply(ba, k, &mut region);
            }
            applied
        })
    },
}
