use core::hint::black_box;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use criterion::Throughput;
use fixtable::hash::Fibonacci64;
use fixtable::hash::MurmurFinalizer;
use fixtable::probe::LinearProbing;
use fixtable::reduce::FastModulo;
use fixtable::BalancedKicking;
use fixtable::Chained;
use fixtable::Cuckoo;
use fixtable::Probing;
use fixtable::RobinHood;
use rand::rngs::OsRng;
use rand::TryRngCore;

type ChainedTable = Chained<u64, u64, MurmurFinalizer, FastModulo, 2>;
type ProbingTable = Probing<u64, u64, MurmurFinalizer, FastModulo, LinearProbing, 1, 500>;
type RobinHoodTable = RobinHood<u64, u64, MurmurFinalizer, FastModulo, LinearProbing, 1>;
type CuckooTable =
    Cuckoo<u64, u64, MurmurFinalizer, Fibonacci64, FastModulo, FastModulo, BalancedKicking, 4>;

const SIZES: &[usize] = &[1 << 12, 1 << 16, 1 << 20];

/// Open-addressing builds run at two-thirds load; cuckoo handles more but
/// gets the same headroom so the comparison stays apples-to-apples.
const OVERALLOCATION_NUM: usize = 3;
const OVERALLOCATION_DEN: usize = 2;

fn dataset(size: usize) -> Vec<u64> {
    let mut rng = OsRng;
    let mut keys = Vec::with_capacity(size);
    let mut seen = hashbrown::HashSet::with_capacity(size);
    while keys.len() < size {
        let key = rng.try_next_u64().unwrap();
        if key != u64::MAX && seen.insert(key) {
            keys.push(key);
        }
    }
    keys
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");

    for &size in SIZES {
        let keys = dataset(size);
        let capacity = size * OVERALLOCATION_NUM / OVERALLOCATION_DEN;
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("chained/{size}"), |b| {
            b.iter(|| {
                let table: ChainedTable = Chained::new(capacity, MurmurFinalizer);
                for &key in &keys {
                    black_box(table.insert(key, key));
                }
                table
            })
        });
        group.bench_function(format!("linear_probing/{size}"), |b| {
            b.iter(|| {
                let table: ProbingTable = Probing::new(capacity, MurmurFinalizer);
                for &key in &keys {
                    black_box(table.insert(key, key).unwrap());
                }
                table
            })
        });
        group.bench_function(format!("robinhood/{size}"), |b| {
            b.iter(|| {
                let table: RobinHoodTable = RobinHood::new(capacity, MurmurFinalizer);
                for &key in &keys {
                    black_box(table.insert(key, key).unwrap());
                }
                table
            })
        });
        group.bench_function(format!("cuckoo/{size}"), |b| {
            b.iter(|| {
                let table: CuckooTable =
                    Cuckoo::new(capacity, MurmurFinalizer, Fibonacci64);
                for &key in &keys {
                    table.insert(key, key).unwrap();
                }
                table
            })
        });
        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                let mut map = hashbrown::HashMap::with_capacity(capacity);
                for &key in &keys {
                    black_box(map.insert(key, key));
                }
                map
            })
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for &size in SIZES {
        let keys = dataset(size);
        let capacity = size * OVERALLOCATION_NUM / OVERALLOCATION_DEN;
        group.throughput(Throughput::Elements(size as u64));

        let chained: ChainedTable = Chained::new(capacity, MurmurFinalizer);
        let probing: ProbingTable = Probing::new(capacity, MurmurFinalizer);
        let robinhood: RobinHoodTable = RobinHood::new(capacity, MurmurFinalizer);
        let cuckoo: CuckooTable = Cuckoo::new(capacity, MurmurFinalizer, Fibonacci64);
        let mut map = hashbrown::HashMap::with_capacity(capacity);
        for &key in &keys {
            chained.insert(key, key);
            probing.insert(key, key).unwrap();
            robinhood.insert(key, key).unwrap();
            cuckoo.insert(key, key).unwrap();
            map.insert(key, key);
        }

        group.bench_function(format!("chained/{size}"), |b| {
            b.iter(|| {
                for &key in &keys {
                    black_box(chained.lookup(key));
                }
            })
        });
        group.bench_function(format!("linear_probing/{size}"), |b| {
            b.iter(|| {
                for &key in &keys {
                    black_box(probing.lookup(key));
                }
            })
        });
        group.bench_function(format!("robinhood/{size}"), |b| {
            b.iter(|| {
                for &key in &keys {
                    black_box(robinhood.lookup(key));
                }
            })
        });
        group.bench_function(format!("cuckoo/{size}"), |b| {
            b.iter(|| {
                for &key in &keys {
                    black_box(cuckoo.lookup(key));
                }
            })
        });
        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                for &key in &keys {
                    black_box(map.get(&key));
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_lookup);
criterion_main!(benches);
