//! Two-way cuckoo hash table over small buckets.
//!
//! Every key has two candidate buckets, `i1 = reduce1(hash1(k))` and
//! `i2 = reduce2(hash2(k))`; when the two coincide, `i2` is nudged to the
//! next directory entry so a key always has two distinct homes. Inserts
//! first look for the key in either bucket (overwriting the payload on a
//! match), then hand both buckets to the kicking policy. If the policy
//! evicts an incumbent, the displaced pair re-enters the insert loop with an
//! incremented kick count; chains longer than [`MAX_KICK_CYCLE_LENGTH`]
//! fail the build.
//!
//! ## Locking
//!
//! Each insert takes the spinlocks of both candidate buckets. The pair is
//! always acquired in ascending index order, which is what makes two
//! concurrent inserts with overlapping candidate pairs deadlock-free. Both
//! locks are released before an eviction restart, so a kick chain never
//! holds more than two locks and never holds any across loop iterations.
//!
//! A kick-chain overflow poisons the table through a sticky atomic flag:
//! eviction reentries observe it and bail out instead of spinning on a table
//! that can no longer accept the displaced entry.
//!
//! Unlike the chained table, slots within a bucket are not kept compacted;
//! occupancy is counted by scanning all `B` slots.

use std::cell::UnsafeCell;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use cfg_if::cfg_if;

use crate::error::BuildError;
use crate::hash::HashFn;
use crate::key::Key;
use crate::kick::KickingPolicy;
use crate::reduce::Reducer;
use crate::spinlock::SpinLock;
use crate::Statistics;

cfg_if! {
    if #[cfg(feature = "short-kick-cycles")] {
        /// Longest tolerated eviction chain before an insert fails the build.
        pub const MAX_KICK_CYCLE_LENGTH: usize = 5_000;
    } else {
        /// Longest tolerated eviction chain before an insert fails the build.
        pub const MAX_KICK_CYCLE_LENGTH: usize = 50_000;
    }
}

/// A key/payload pair inside a cuckoo bucket.
#[derive(Debug, Clone, Copy)]
pub struct Slot<K, V> {
    /// Stored key; the sentinel when the slot is empty.
    pub key: K,
    /// Stored payload; indeterminate when the slot is empty.
    pub payload: V,
}

/// A fixed-size array of slots; the unit the kicking policies operate on.
#[derive(Debug, Clone, Copy)]
pub struct Bucket<K, V, const B: usize> {
    /// The slots of this bucket, in no particular order.
    pub slots: [Slot<K, V>; B],
}

impl<K: Key, V: Copy + Default, const B: usize> Bucket<K, V, B> {
    /// A bucket with every slot empty.
    pub fn empty() -> Self {
        Bucket {
            slots: [Slot {
                key: K::SENTINEL,
                payload: V::default(),
            }; B],
        }
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.key != K::SENTINEL)
            .count()
    }
}

/// Fixed-capacity cuckoo hash table.
///
/// `B` is the bucket size; the directory holds `capacity.div_ceil(B)`
/// buckets. Inserts may be issued concurrently from multiple threads;
/// lookups are unsynchronized and are only valid once writers have
/// quiesced.
pub struct Cuckoo<K, V, H1, H2, R1, R2, KP, const B: usize = 4> {
    hashfn1: H1,
    hashfn2: H2,
    reductionfn1: R1,
    reductionfn2: R2,
    kickingfn: KP,
    capacity: usize,
    buckets: Box<[UnsafeCell<Bucket<K, V, B>>]>,
    locks: Box<[SpinLock]>,
    has_failed: AtomicBool,
    total_kicks: AtomicUsize,
    max_kicks: AtomicUsize,
}

// SAFETY: all mutation goes through `insert`, which holds the spinlocks of
// both touched buckets, or through `&mut self` methods. Lookups are
// unsynchronized by contract and must not overlap inserts. The kick
// counters and failure flag are atomics.
unsafe impl<K, V, H1, H2, R1, R2, KP, const B: usize> Sync for Cuckoo<K, V, H1, H2, R1, R2, KP, B>
where
    K: Key,
    V: Copy + Send,
    H1: Sync,
    H2: Sync,
    R1: Sync,
    R2: Sync,
    KP: Sync,
{
}

impl<K, V, H1, H2, R1, R2, KP, const B: usize> Cuckoo<K, V, H1, H2, R1, R2, KP, B>
where
    K: Key,
    V: Copy + Default,
    H1: HashFn<K>,
    H2: HashFn<K>,
    R1: Reducer,
    R2: Reducer,
    KP: KickingPolicy<K, V>,
{
    /// Creates a table sized for `capacity` keys.
    ///
    /// The directory is allocated immediately and never resized. `capacity`
    /// must yield at least two directory entries, otherwise a key cannot
    /// have two distinct candidate buckets.
    pub fn new(capacity: usize, hashfn1: H1, hashfn2: H2) -> Self {
        let directory = Self::directory_address_count(capacity);
        assert!(
            directory >= 2,
            "cuckoo tables need at least two directory entries"
        );

        let buckets = (0..directory)
            .map(|_| UnsafeCell::new(Bucket::empty()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let locks = (0..directory)
            .map(|_| SpinLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Cuckoo {
            hashfn1,
            hashfn2,
            reductionfn1: R1::new(directory),
            reductionfn2: R2::new(directory),
            kickingfn: KP::default(),
            capacity,
            buckets,
            locks,
            has_failed: AtomicBool::new(false),
            total_kicks: AtomicUsize::new(0),
            max_kicks: AtomicUsize::new(0),
        }
    }

    /// Inserts a key/payload pair, overwriting the payload if the key is
    /// already present.
    ///
    /// Fails with [`BuildError::KickCycleExceeded`] when the eviction chain
    /// for this insert outruns [`MAX_KICK_CYCLE_LENGTH`], and with
    /// [`BuildError::AlreadyFailed`] when an eviction restart observes that
    /// another insert already failed the table. Inserting the sentinel key
    /// is a programmer error: it asserts in debug builds and is a no-op
    /// otherwise.
    pub fn insert(&self, key: K, payload: V) -> Result<(), BuildError> {
        debug_assert!(key != K::SENTINEL, "the sentinel key must never be inserted");
        if key == K::SENTINEL {
            return Ok(());
        }

        let mut key = key;
        let mut payload = payload;
        let mut kick_count = 0usize;

        loop {
            if kick_count > MAX_KICK_CYCLE_LENGTH {
                self.has_failed.store(true, Ordering::Relaxed);
                return Err(BuildError::KickCycleExceeded(MAX_KICK_CYCLE_LENGTH));
            }
            self.max_kicks.fetch_max(kick_count, Ordering::Relaxed);
            if kick_count > 0 {
                self.total_kicks.fetch_add(1, Ordering::Relaxed);
            }

            let (i1, i2) = self.candidate_buckets(key);

            // Deadlock avoidance: the pair is always locked in ascending
            // index order, no matter which bucket is the primary.
            let (lo, hi) = (i1.min(i2), i1.max(i2));
            let _guard_lo = self.locks[lo].lock();
            let _guard_hi = self.locks[hi].lock();

            // SAFETY: `i1 != i2` (the construction floor of two directory
            // entries plus the candidate nudge guarantee it), and both
            // bucket locks are held, so these are the only live references
            // to either bucket.
            let (first, second) = unsafe {
                (
                    &mut *self.buckets[i1].get(),
                    &mut *self.buckets[i2].get(),
                )
            };

            for slot in first.slots.iter_mut().chain(second.slots.iter_mut()) {
                if slot.key == key {
                    slot.payload = payload;
                    return Ok(());
                }
            }

            match self.kickingfn.place(first, second, key, payload) {
                None => return Ok(()),
                Some((kicked_key, kicked_payload)) => {
                    key = kicked_key;
                    payload = kicked_payload;
                    kick_count += 1;
                }
            }

            drop(_guard_hi);
            drop(_guard_lo);

            if self.has_failed.load(Ordering::Relaxed) {
                return Err(BuildError::AlreadyFailed);
            }
        }
    }

    /// Retrieves the payload for `key`, scanning the primary bucket first.
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn lookup(&self, key: K) -> Option<V> {
        debug_assert!(key != K::SENTINEL, "the sentinel key is never stored");
        if key == K::SENTINEL {
            return None;
        }

        let i1 = self.reductionfn1.reduce(self.hashfn1.hash(key));

        // SAFETY: unsynchronized read; callers guarantee no concurrent
        // insert (see the module docs).
        let first = unsafe { &*self.buckets[i1].get() };
        for slot in first.slots.iter() {
            if slot.key == key {
                return Some(slot.payload);
            }
        }

        let mut i2 = self.reductionfn2.reduce(self.hashfn2.hash(key));
        if i2 == i1 {
            i2 = if i1 == self.buckets.len() - 1 { 0 } else { i1 + 1 };
        }

        // SAFETY: as above.
        let second = unsafe { &*self.buckets[i2].get() };
        for slot in second.slots.iter() {
            if slot.key == key {
                return Some(slot.payload);
            }
        }

        None
    }

    /// Statistics over a probed dataset.
    ///
    /// Keys: `primary_key_ratio` (fraction of the dataset found in its
    /// primary bucket), `total_kick_count` (evictions performed during the
    /// build), `max_kick_count` (longest eviction chain observed).
    pub fn lookup_statistics(&self, dataset: &[K]) -> Statistics {
        let mut primary = 0usize;

        for &key in dataset {
            let i1 = self.reductionfn1.reduce(self.hashfn1.hash(key));
            // SAFETY: unsynchronized read, as in `lookup`.
            let first = unsafe { &*self.buckets[i1].get() };
            if first.slots.iter().any(|slot| slot.key == key) {
                primary += 1;
            }
        }

        let ratio = if dataset.is_empty() {
            0.0
        } else {
            primary as f64 / dataset.len() as f64
        };

        Statistics::from([
            ("primary_key_ratio", ratio),
            (
                "total_kick_count",
                self.total_kicks.load(Ordering::Relaxed) as f64,
            ),
            (
                "max_kick_count",
                self.max_kicks.load(Ordering::Relaxed) as f64,
            ),
        ])
    }

    /// Clears all keys.
    pub fn clear(&mut self) {
        for cell in self.buckets.iter_mut() {
            *cell.get_mut() = Bucket::empty();
        }
        self.has_failed = AtomicBool::new(false);
        self.total_kicks = AtomicUsize::new(0);
        self.max_kicks = AtomicUsize::new(0);
    }

    /// Requested capacity this table was built for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current memory footprint in bytes.
    pub fn byte_size(&self) -> usize {
        mem::size_of::<Self>() + self.buckets.len() * Self::bucket_byte_size()
    }

    /// Size of one directory bucket in bytes.
    pub const fn bucket_byte_size() -> usize {
        mem::size_of::<Bucket<K, V, B>>()
    }

    /// Engine name for reporting.
    pub fn name() -> String {
        format!("cuckoo_{}_{}", B, KP::name())
    }

    /// Names of the two hash functions.
    pub fn hash_name() -> String {
        format!("{}-{}", H1::name(), H2::name())
    }

    /// Names of the two reducers.
    pub fn reducer_name() -> String {
        format!("{}-{}", R1::name(), R2::name())
    }

    /// Number of slots per bucket.
    pub const fn bucket_size() -> usize {
        B
    }

    /// Directory entries allocated for a requested capacity.
    pub const fn directory_address_count(capacity: usize) -> usize {
        capacity.div_ceil(B)
    }

    fn candidate_buckets(&self, key: K) -> (usize, usize) {
        let i1 = self.reductionfn1.reduce(self.hashfn1.hash(key));
        let mut i2 = self.reductionfn2.reduce(self.hashfn2.hash(key));
        if i2 == i1 {
            i2 = if i1 == self.buckets.len() - 1 { 0 } else { i1 + 1 };
        }
        (i1, i2)
    }
}

#[cfg(test)]
mod tests {
    use crate::hash::Fibonacci64;
    use crate::hash::HashFn;
    use crate::hash::MurmurFinalizer;
    use crate::kick::BalancedKicking;
    use crate::kick::UnbiasedKicking;
    use crate::reduce::FastModulo;

    use super::*;

    /// Hashes every key to the same constant; pairs of these pin both
    /// candidate buckets, which makes eviction behavior deterministic.
    #[derive(Debug, Default)]
    struct ConstHash<const N: u64>;

    impl<const N: u64, K: Key> HashFn<K> for ConstHash<N> {
        fn name() -> String {
            format!("const_{N}")
        }

        fn hash(&self, _key: K) -> u64 {
            N
        }
    }

    type Pinned<KP> = Cuckoo<u64, u64, ConstHash<0>, ConstHash<2>, FastModulo, FastModulo, KP, 1>;
    type Mixed = Cuckoo<u64, u64, MurmurFinalizer, Fibonacci64, FastModulo, FastModulo, BalancedKicking, 4>;

    #[test]
    fn fills_both_candidate_buckets_before_kicking() {
        let table: Pinned<BalancedKicking> = Cuckoo::new(4, ConstHash, ConstHash);

        table.insert(10, 100).unwrap();
        table.insert(20, 200).unwrap();

        assert_eq!(table.lookup(10), Some(100));
        assert_eq!(table.lookup(20), Some(200));
        assert_eq!(table.lookup(30), None);

        let stats = table.lookup_statistics(&[10, 20]);
        assert_eq!(stats["total_kick_count"], 0.0);
        assert_eq!(stats["max_kick_count"], 0.0);
        // Exactly one of the two keys lives in bucket 0.
        assert_eq!(stats["primary_key_ratio"], 0.5);
    }

    #[test]
    fn overfull_candidate_pair_fails_the_build_and_sticks() {
        let table: Pinned<UnbiasedKicking> = Cuckoo::new(4, ConstHash, ConstHash);

        table.insert(10, 100).unwrap();
        table.insert(20, 200).unwrap();

        // Three keys over two pinned slots: the kick chain cannot resolve.
        assert_eq!(
            table.insert(30, 300),
            Err(BuildError::KickCycleExceeded(MAX_KICK_CYCLE_LENGTH))
        );

        let stats = table.lookup_statistics(&[10, 20]);
        assert_eq!(stats["max_kick_count"], MAX_KICK_CYCLE_LENGTH as f64);
        assert!(stats["total_kick_count"] >= MAX_KICK_CYCLE_LENGTH as f64);

        // The failure flag short-circuits the next eviction restart.
        assert_eq!(table.insert(40, 400), Err(BuildError::AlreadyFailed));
    }

    #[test]
    fn repeated_insert_overwrites_the_payload() {
        let table: Mixed = Cuckoo::new(64, MurmurFinalizer, Fibonacci64);

        table.insert(7, 1).unwrap();
        table.insert(7, 2).unwrap();

        assert_eq!(table.lookup(7), Some(2));

        // Exactly one live mapping.
        let mut live = 0;
        for cell in table.buckets.iter() {
            let bucket = unsafe { &*cell.get() };
            live += bucket.slots.iter().filter(|slot| slot.key == 7).count();
        }
        assert_eq!(live, 1);
    }

    #[test]
    fn round_trip_at_eighty_percent_load() {
        let keys: Vec<u64> = (0..10_000).map(|i| i * 3 + 1).collect();
        let table: Mixed = Cuckoo::new(keys.len() * 5 / 4, MurmurFinalizer, Fibonacci64);

        for &key in &keys {
            table.insert(key, key ^ 0xABCD).unwrap();
        }
        for &key in &keys {
            assert_eq!(table.lookup(key), Some(key ^ 0xABCD));
        }
        assert_eq!(table.lookup(2), None);

        let stats = table.lookup_statistics(&keys);
        assert!(stats["primary_key_ratio"] > 0.0);
        assert!(stats["primary_key_ratio"] <= 1.0);
    }

    #[test]
    fn every_key_lives_in_one_of_its_candidate_buckets() {
        let keys: Vec<u64> = (0..2_000).map(|i| i * 7 + 3).collect();
        let table: Mixed = Cuckoo::new(keys.len() * 5 / 4, MurmurFinalizer, Fibonacci64);

        for &key in &keys {
            table.insert(key, key).unwrap();
        }

        for &key in &keys {
            let (i1, i2) = table.candidate_buckets(key);
            let first = unsafe { &*table.buckets[i1].get() };
            let second = unsafe { &*table.buckets[i2].get() };
            let hits = first
                .slots
                .iter()
                .chain(second.slots.iter())
                .filter(|slot| slot.key == key)
                .count();
            assert_eq!(hits, 1, "key {key} must live in exactly one candidate slot");
        }
    }

    #[test]
    fn concurrent_inserts_keep_set_semantics() {
        let keys: Vec<u64> = (1..=20_000).collect();
        let table: Mixed = Cuckoo::new(keys.len() * 5 / 4, MurmurFinalizer, Fibonacci64);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for &key in &keys {
                        table.insert(key, key * 2).unwrap();
                    }
                });
            }
        });

        for &key in &keys {
            assert_eq!(table.lookup(key), Some(key * 2));
        }

        let mut live = 0usize;
        for cell in table.buckets.iter() {
            let bucket = unsafe { &*cell.get() };
            live += bucket.occupied();
        }
        assert_eq!(live, keys.len());
    }

    #[test]
    fn clear_resets_slots_and_counters() {
        let mut table: Mixed = Cuckoo::new(64, MurmurFinalizer, Fibonacci64);
        table.insert(1, 10).unwrap();
        table.insert(2, 20).unwrap();

        table.clear();

        assert_eq!(table.lookup(1), None);
        assert_eq!(table.lookup(2), None);
        let stats = table.lookup_statistics(&[1, 2]);
        assert_eq!(stats["total_kick_count"], 0.0);
    }

    #[test]
    fn reports_shapes_and_names() {
        assert_eq!(Mixed::name(), "cuckoo_4_balanced_kicking");
        assert_eq!(Mixed::hash_name(), "murmur_finalizer-fibonacci64");
        assert_eq!(Mixed::reducer_name(), "fast_modulo-fast_modulo");
        assert_eq!(Mixed::bucket_size(), 4);
        assert_eq!(Mixed::directory_address_count(10), 3);

        let table: Mixed = Cuckoo::new(64, MurmurFinalizer, Fibonacci64);
        assert!(table.byte_size() >= 16 * Mixed::bucket_byte_size());
        assert_eq!(table.capacity(), 64);
    }
}
