//! Bucketized open addressing, plain and robin-hood flavored.
//!
//! Both engines share the same outer walk: the key's hash reduces to an
//! origin index, and the probe sequence turns `(origin, step)` into the next
//! directory bucket to scan. Inside a bucket, the first empty slot ends the
//! search (inserts fill it, lookups report a miss). Neither probe sequence
//! guarantees full coverage of the directory, so a walk that returns to its
//! origin has visited every bucket it ever will; inserts fail the build at
//! that point and lookups report a miss.
//!
//! [`RobinHood`] adds one rule on top: an insert that has probed farther
//! than the incumbent of a slot takes that slot, and the incumbent continues
//! the walk carrying its own recorded probe distance. This keeps probe
//! distances near-uniform, trading writes during the build for a tighter
//! lookup tail. Lookups are identical to plain probing; they never consult
//! the stored distances.
//!
//! ## Locking
//!
//! One mutex per directory bucket, held only while that bucket's slots are
//! scanned (and, for robin-hood, displaced). The lock is released before
//! the walk advances to the next probe step, so an insert never holds two
//! locks. Two threads racing on the same key both scan the winner's bucket
//! under its lock, so exactly one of them places the key.
//!
//! The early-exit rules above assume insert-only workloads; deletion would
//! need tombstones and is deliberately unsupported.

use std::cell::UnsafeCell;
use std::mem;

use parking_lot::Mutex;

use crate::error::BuildError;
use crate::hash::HashFn;
use crate::key::Key;
use crate::probe::ProbeFn;
use crate::reduce::Reducer;
use crate::Statistics;

/// Default bound on probe steps per insert before the build fails.
pub const DEFAULT_MAX_PROBING_STEPS: usize = 500;

#[derive(Debug, Clone, Copy)]
struct Slot<K, V> {
    key: K,
    payload: V,
}

struct Bucket<K, V, const B: usize> {
    slots: [Slot<K, V>; B],
}

impl<K: Key, V: Copy + Default, const B: usize> Bucket<K, V, B> {
    fn empty() -> Self {
        Bucket {
            slots: [Slot {
                key: K::SENTINEL,
                payload: V::default(),
            }; B],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RichSlot<K, V> {
    key: K,
    payload: V,
    psl: usize,
}

struct RichBucket<K, V, const B: usize> {
    slots: [RichSlot<K, V>; B],
}

impl<K: Key, V: Copy + Default, const B: usize> RichBucket<K, V, B> {
    fn empty() -> Self {
        RichBucket {
            slots: [RichSlot {
                key: K::SENTINEL,
                payload: V::default(),
                psl: 0,
            }; B],
        }
    }
}

/// Fixed-capacity open-addressing hash table.
///
/// `B` is the bucket size (1 is the canonical setting; larger buckets trade
/// wasted slots for cache locality). `MAX_PROBING_STEPS` bounds the walk
/// length per insert. Inserts may be issued concurrently from multiple
/// threads; lookups are unsynchronized and are only valid once writers have
/// quiesced.
pub struct Probing<K, V, H, R, P, const B: usize = 1, const MAX_PROBING_STEPS: usize = 500> {
    hashfn: H,
    reductionfn: R,
    probingfn: P,
    capacity: usize,
    buckets: Box<[UnsafeCell<Bucket<K, V, B>>]>,
    locks: Box<[Mutex<()>]>,
}

// SAFETY: all mutation goes through `insert`, which holds the probed
// bucket's mutex while scanning it, or through `&mut self` methods.
// Lookups are unsynchronized by contract and must not overlap inserts.
unsafe impl<K, V, H, R, P, const B: usize, const MAX_PROBING_STEPS: usize> Sync
    for Probing<K, V, H, R, P, B, MAX_PROBING_STEPS>
where
    K: Key,
    V: Copy + Send,
    H: Sync,
    R: Sync,
    P: Sync,
{
}

impl<K, V, H, R, P, const B: usize, const MAX_PROBING_STEPS: usize>
    Probing<K, V, H, R, P, B, MAX_PROBING_STEPS>
where
    K: Key,
    V: Copy + Default,
    H: HashFn<K>,
    R: Reducer,
    P: ProbeFn,
{
    /// Creates a table sized for `capacity` keys.
    ///
    /// The directory is allocated immediately and never resized.
    pub fn new(capacity: usize, hashfn: H) -> Self {
        assert!(capacity > 0, "capacity must be non-zero");
        let directory = Self::directory_address_count(capacity);

        let buckets = (0..directory)
            .map(|_| UnsafeCell::new(Bucket::empty()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let locks = (0..directory)
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Probing {
            hashfn,
            reductionfn: R::new(directory),
            probingfn: P::new(directory),
            capacity,
            buckets,
            locks,
        }
    }

    /// Inserts a key/payload pair.
    ///
    /// Returns `Ok(false)` iff the key already exists. Fails with
    /// [`BuildError::ProbingStepsExceeded`] when the walk outruns
    /// `MAX_PROBING_STEPS` and with [`BuildError::ProbingCycle`] when the
    /// probe sequence returns to its origin with every visited bucket full.
    /// Inserting the sentinel key is a programmer error: it asserts in
    /// debug builds and returns `Ok(false)` otherwise.
    pub fn insert(&self, key: K, payload: V) -> Result<bool, BuildError> {
        debug_assert!(key != K::SENTINEL, "the sentinel key must never be inserted");
        if key == K::SENTINEL {
            return Ok(false);
        }

        let origin = self.reductionfn.reduce(self.hashfn.hash(key));
        let mut index = origin;
        let mut step = 0usize;

        loop {
            if step > MAX_PROBING_STEPS {
                return Err(BuildError::ProbingStepsExceeded(MAX_PROBING_STEPS));
            }

            {
                let _guard = self.locks[index].lock();
                // SAFETY: the bucket mutex is held while its slots are
                // scanned and written.
                let bucket = unsafe { &mut *self.buckets[index].get() };
                for slot in bucket.slots.iter_mut() {
                    if slot.key == K::SENTINEL {
                        *slot = Slot { key, payload };
                        return Ok(true);
                    }
                    if slot.key == key {
                        return Ok(false);
                    }
                }
            }

            // Bucket is full; the probe sequence picks the next one.
            step += 1;
            index = self.probingfn.probe(origin, step);
            if index == origin {
                return Err(BuildError::ProbingCycle(Self::name()));
            }
        }
    }

    /// Retrieves the payload for `key`.
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn lookup(&self, key: K) -> Option<V> {
        debug_assert!(key != K::SENTINEL, "the sentinel key is never stored");
        if key == K::SENTINEL {
            return None;
        }

        self.probe_steps(key).map(|(payload, _)| payload)
    }

    /// Statistics over a probed dataset.
    ///
    /// Keys: `min_psl`, `max_psl`, `total_psl`, `average_psl`, the probe
    /// step counts at which the dataset's keys were found (keys that are
    /// absent contribute nothing to the extrema and totals; the average is
    /// taken over the whole dataset).
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn lookup_statistics(&self, dataset: &[K]) -> Statistics {
        let mut min_psl = usize::MAX;
        let mut max_psl = 0usize;
        let mut total_psl = 0usize;

        for &key in dataset {
            if let Some((_, steps)) = self.probe_steps(key) {
                min_psl = min_psl.min(steps);
                max_psl = max_psl.max(steps);
                total_psl += steps;
            }
        }

        if min_psl == usize::MAX {
            min_psl = 0;
        }
        let average = if dataset.is_empty() {
            0.0
        } else {
            total_psl as f64 / dataset.len() as f64
        };

        Statistics::from([
            ("min_psl", min_psl as f64),
            ("max_psl", max_psl as f64),
            ("total_psl", total_psl as f64),
            ("average_psl", average),
        ])
    }

    /// Clears all keys.
    pub fn clear(&mut self) {
        for cell in self.buckets.iter_mut() {
            *cell.get_mut() = Bucket::empty();
        }
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
        format!("{}_probing", P::name())
    }

    /// Name of the hash function.
    pub fn hash_name() -> String {
        H::name()
    }

    /// Name of the reducer.
    pub fn reducer_name() -> String {
        R::name()
    }

    /// Number of slots per bucket.
    pub const fn bucket_size() -> usize {
        B
    }

    /// Directory entries allocated for a requested capacity.
    pub const fn directory_address_count(capacity: usize) -> usize {
        capacity.div_ceil(B)
    }

    /// Walks the probe sequence for `key`; on a hit, returns the payload
    /// and the probe step it was found at.
    fn probe_steps(&self, key: K) -> Option<(V, usize)> {
        let origin = self.reductionfn.reduce(self.hashfn.hash(key));
        let mut index = origin;
        let mut step = 0usize;

        loop {
            // SAFETY: unsynchronized read; callers guarantee no concurrent
            // insert (see the module docs).
            let bucket = unsafe { &*self.buckets[index].get() };
            for slot in bucket.slots.iter() {
                if slot.key == key {
                    return Some((slot.payload, step));
                }
                if slot.key == K::SENTINEL {
                    return None;
                }
            }

            step += 1;
            index = self.probingfn.probe(origin, step);
            if index == origin {
                return None;
            }
        }
    }
}

/// Fixed-capacity robin-hood open-addressing hash table.
///
/// Same layout and walk as [`Probing`], with probe-distance equalization on
/// insert. Inserts may be issued concurrently from multiple threads;
/// lookups are unsynchronized and are only valid once writers have
/// quiesced.
pub struct RobinHood<K, V, H, R, P, const B: usize = 1> {
    hashfn: H,
    reductionfn: R,
    probingfn: P,
    capacity: usize,
    buckets: Box<[UnsafeCell<RichBucket<K, V, B>>]>,
    locks: Box<[Mutex<()>]>,
}

// SAFETY: as for `Probing`; the displacement happens entirely under the
// displaced bucket's mutex.
unsafe impl<K, V, H, R, P, const B: usize> Sync for RobinHood<K, V, H, R, P, B>
where
    K: Key,
    V: Copy + Send,
    H: Sync,
    R: Sync,
    P: Sync,
{
}

impl<K, V, H, R, P, const B: usize> RobinHood<K, V, H, R, P, B>
where
    K: Key,
    V: Copy + Default,
    H: HashFn<K>,
    R: Reducer,
    P: ProbeFn,
{
    /// Creates a table sized for `capacity` keys.
    pub fn new(capacity: usize, hashfn: H) -> Self {
        assert!(capacity > 0, "capacity must be non-zero");
        let directory = Self::directory_address_count(capacity);

        let buckets = (0..directory)
            .map(|_| UnsafeCell::new(RichBucket::empty()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let locks = (0..directory)
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        RobinHood {
            hashfn,
            reductionfn: R::new(directory),
            probingfn: P::new(directory),
            capacity,
            buckets,
            locks,
        }
    }

    /// Inserts a key/payload pair.
    ///
    /// Returns `Ok(false)` iff the key already exists. An entry that has
    /// probed farther than a slot's incumbent displaces it; the incumbent
    /// then continues the walk with its own recorded probe distance and a
    /// recomputed origin. Fails with [`BuildError::DisplacementLoop`] when
    /// a displaced incumbent turns out to be the key this insert started
    /// with, and with [`BuildError::ProbingCycle`] as in [`Probing`].
    /// Inserting the sentinel key is a programmer error: it asserts in
    /// debug builds and returns `Ok(false)` otherwise.
    pub fn insert(&self, key: K, payload: V) -> Result<bool, BuildError> {
        debug_assert!(key != K::SENTINEL, "the sentinel key must never be inserted");
        if key == K::SENTINEL {
            return Ok(false);
        }

        let original_key = key;
        let mut key = key;
        let mut payload = payload;
        let mut origin = self.reductionfn.reduce(self.hashfn.hash(key));
        let mut index = origin;
        let mut step = 0usize;

        loop {
            {
                let _guard = self.locks[index].lock();
                // SAFETY: the bucket mutex is held across the scan and any
                // in-bucket displacement.
                let bucket = unsafe { &mut *self.buckets[index].get() };
                for slot in bucket.slots.iter_mut() {
                    if slot.key == K::SENTINEL {
                        *slot = RichSlot { key, payload, psl: step };
                        return Ok(true);
                    }
                    if slot.key == key {
                        return Ok(false);
                    }
                    if slot.psl < step {
                        // Read the incumbent before overwriting it; the
                        // carry needs its key, payload and recorded psl.
                        let rich = *slot;
                        if original_key == rich.key {
                            return Err(BuildError::DisplacementLoop);
                        }

                        *slot = RichSlot { key, payload, psl: step };

                        key = rich.key;
                        payload = rich.payload;
                        step = rich.psl;
                        // Recompute the origin so the probe arithmetic
                        // stays valid for the displaced key under
                        // non-linear probe sequences.
                        origin = self.reductionfn.reduce(self.hashfn.hash(key));
                    }
                }
            }

            step += 1;
            index = self.probingfn.probe(origin, step);
            if index == origin {
                return Err(BuildError::ProbingCycle(Self::name()));
            }
        }
    }

    /// Retrieves the payload for `key`.
    ///
    /// The scan never consults the stored probe distances; the first empty
    /// slot along the walk is a definitive miss.
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn lookup(&self, key: K) -> Option<V> {
        debug_assert!(key != K::SENTINEL, "the sentinel key is never stored");
        if key == K::SENTINEL {
            return None;
        }

        self.probe_steps(key).map(|(payload, _)| payload)
    }

    /// Statistics over a probed dataset; same keys as
    /// [`Probing::lookup_statistics`].
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn lookup_statistics(&self, dataset: &[K]) -> Statistics {
        let mut min_psl = usize::MAX;
        let mut max_psl = 0usize;
        let mut total_psl = 0usize;

        for &key in dataset {
            if let Some((_, steps)) = self.probe_steps(key) {
                min_psl = min_psl.min(steps);
                max_psl = max_psl.max(steps);
                total_psl += steps;
            }
        }

        if min_psl == usize::MAX {
            min_psl = 0;
        }
        let average = if dataset.is_empty() {
            0.0
        } else {
            total_psl as f64 / dataset.len() as f64
        };

        Statistics::from([
            ("min_psl", min_psl as f64),
            ("max_psl", max_psl as f64),
            ("total_psl", total_psl as f64),
            ("average_psl", average),
        ])
    }

    /// Clears all keys.
    pub fn clear(&mut self) {
        for cell in self.buckets.iter_mut() {
            *cell.get_mut() = RichBucket::empty();
        }
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
        mem::size_of::<RichBucket<K, V, B>>()
    }

    /// Engine name for reporting.
    pub fn name() -> String {
        format!("{}_robinhood_probing", P::name())
    }

    /// Name of the hash function.
    pub fn hash_name() -> String {
        H::name()
    }

    /// Name of the reducer.
    pub fn reducer_name() -> String {
        R::name()
    }

    /// Number of slots per bucket.
    pub const fn bucket_size() -> usize {
        B
    }

    /// Directory entries allocated for a requested capacity.
    pub const fn directory_address_count(capacity: usize) -> usize {
        capacity.div_ceil(B)
    }

    fn probe_steps(&self, key: K) -> Option<(V, usize)> {
        let origin = self.reductionfn.reduce(self.hashfn.hash(key));
        let mut index = origin;
        let mut step = 0usize;

        loop {
            // SAFETY: unsynchronized read; callers guarantee no concurrent
            // insert (see the module docs).
            let bucket = unsafe { &*self.buckets[index].get() };
            for slot in bucket.slots.iter() {
                if slot.key == key {
                    return Some((slot.payload, step));
                }
                if slot.key == K::SENTINEL {
                    return None;
                }
            }

            step += 1;
            index = self.probingfn.probe(origin, step);
            if index == origin {
                return None;
            }
        }
    }
}
