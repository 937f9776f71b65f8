use clap::Parser;
use fixtable::hash::Fibonacci64;
use fixtable::hash::MurmurFinalizer;
use fixtable::probe::LinearProbing;
use fixtable::probe::QuadraticProbing;
use fixtable::reduce::FastModulo;
use fixtable::BalancedKicking;
use fixtable::Chained;
use fixtable::Cuckoo;
use fixtable::Probing;
use fixtable::RobinHood;
use fixtable::Statistics;
use rand::rngs::OsRng;
use rand::TryRngCore;

#[derive(Parser, Debug)]
struct Args {
    /// Number of keys to insert into each table.
    #[arg(short = 'n', long = "keys", default_value_t = 100_000)]
    keys: usize,

    /// Capacity headroom in percent (100 = no overallocation).
    #[arg(short = 'o', long = "overallocation", default_value_t = 150)]
    overallocation: usize,
}

fn print_report(name: String, hash: String, reducer: String, byte_size: usize, stats: &Statistics) {
    println!("{name} (hash: {hash}, reducer: {reducer}, {byte_size} bytes)");
    for (metric, value) in stats {
        println!("  {metric:<24} {value}");
    }
    println!();
}

fn main() {
    let args = Args::parse();

    let mut rng = OsRng;
    let mut keys: Vec<u64> = Vec::with_capacity(args.keys);
    while keys.len() < args.keys {
        let key = rng.try_next_u64().unwrap();
        if key != u64::MAX {
            keys.push(key);
        }
    }
    keys.sort_unstable();
    keys.dedup();

    let capacity = keys.len() * args.overallocation / 100;
    println!(
        "building tables over {} random keys, capacity {}\n",
        keys.len(),
        capacity
    );

    type ChainedTable = Chained<u64, u64, MurmurFinalizer, FastModulo, 2>;
    let chained: ChainedTable = Chained::new(capacity, MurmurFinalizer);
    for &key in &keys {
        chained.insert(key, key);
    }
    print_report(
        ChainedTable::name(),
        ChainedTable::hash_name(),
        ChainedTable::reducer_name(),
        chained.byte_size(),
        &chained.statistics(),
    );

    type LinearTable = Probing<u64, u64, MurmurFinalizer, FastModulo, LinearProbing, 1, 500>;
    let linear: LinearTable = Probing::new(capacity, MurmurFinalizer);
    for &key in &keys {
        linear.insert(key, key).expect("build failed");
    }
    print_report(
        LinearTable::name(),
        LinearTable::hash_name(),
        LinearTable::reducer_name(),
        linear.byte_size(),
        &linear.lookup_statistics(&keys),
    );

    type QuadraticRh = RobinHood<u64, u64, MurmurFinalizer, FastModulo, QuadraticProbing, 1>;
    let robinhood: QuadraticRh = RobinHood::new(capacity, MurmurFinalizer);
    for &key in &keys {
        robinhood.insert(key, key).expect("build failed");
    }
    print_report(
        QuadraticRh::name(),
        QuadraticRh::hash_name(),
        QuadraticRh::reducer_name(),
        robinhood.byte_size(),
        &robinhood.lookup_statistics(&keys),
    );

    type CuckooTable =
        Cuckoo<u64, u64, MurmurFinalizer, Fibonacci64, FastModulo, FastModulo, BalancedKicking, 4>;
    let cuckoo: CuckooTable = Cuckoo::new(capacity, MurmurFinalizer, Fibonacci64);
    for &key in &keys {
        cuckoo.insert(key, key).expect("build failed");
    }
    print_report(
        CuckooTable::name(),
        CuckooTable::hash_name(),
        CuckooTable::reducer_name(),
        cuckoo.byte_size(),
        &cuckoo.lookup_statistics(&keys),
    );
}
