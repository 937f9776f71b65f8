//! Chained hash table with an inline first level.
//!
//! Each directory entry is a first-level slot holding one key/payload pair
//! inline; additional entries that reduce to the same index live in a singly
//! linked chain of fixed-size buckets owned by that slot. The inline slot
//! absorbs the common no-collision case without touching a second cache
//! line.
//!
//! ## Design
//!
//! Within a chain bucket, occupied slots always occupy the lowest-indexed
//! positions: inserts fill the first empty slot, and deletion does not
//! exist. Lookups exploit this by treating the first sentinel key inside a
//! bucket as the end of the whole chain, so a miss terminates without
//! walking empty tail buckets.
//!
//! Range lookups walk the directory forward from the slot the range minimum
//! reduces to, filtering every slot by key. They only return sensible
//! results when the employed hash function is monotone over the key domain
//! (e.g. [`Identity`] or a learned model); a scrambling mixer spreads a key
//! range over the whole directory.
//!
//! ## Locking
//!
//! One mutex per first-level slot. An insert holds its slot's mutex for the
//! entire chain walk, including bucket allocation, so no cross-slot ordering
//! issues can arise. Lookups and statistics take no locks; they are only
//! valid once writers have quiesced.
//!
//! [`Identity`]: crate::hash::Identity

use std::cell::UnsafeCell;
use std::mem;

use parking_lot::Mutex;

use crate::hash::HashFn;
use crate::key::Key;
use crate::reduce::Reducer;
use crate::Statistics;

#[derive(Debug, Clone, Copy)]
struct Slot<K, V> {
    key: K,
    payload: V,
}

impl<K: Key, V: Copy + Default> Slot<K, V> {
    #[inline(always)]
    fn empty() -> Self {
        Slot {
            key: K::SENTINEL,
            payload: V::default(),
        }
    }
}

struct ChainBucket<K, V, const B: usize> {
    slots: [Slot<K, V>; B],
    next: Option<Box<ChainBucket<K, V, B>>>,
}

impl<K: Key, V: Copy + Default, const B: usize> ChainBucket<K, V, B> {
    /// A fresh bucket holding `(key, payload)` in slot 0.
    fn with_entry(key: K, payload: V) -> Box<Self> {
        let mut bucket = Box::new(ChainBucket {
            slots: [Slot::empty(); B],
            next: None,
        });
        bucket.slots[0] = Slot { key, payload };
        bucket
    }
}

struct FirstLevelSlot<K, V, const B: usize> {
    key: K,
    payload: V,
    chain: Option<Box<ChainBucket<K, V, B>>>,
}

/// Fixed-capacity chained hash table.
///
/// The directory holds one first-level slot per unit of capacity. `B` is
/// the chain bucket size. Inserts may be issued concurrently from multiple
/// threads; lookups are unsynchronized and are only valid once writers have
/// quiesced.
pub struct Chained<K, V, H, R, const B: usize = 2> {
    hashfn: H,
    reductionfn: R,
    capacity: usize,
    slots: Box<[UnsafeCell<FirstLevelSlot<K, V, B>>]>,
    locks: Box<[Mutex<()>]>,
}

// SAFETY: the only mutation paths are `insert`, which holds the per-slot
// mutex for the full chain walk, and `&mut self` methods. Lookups are
// unsynchronized by contract and must not overlap inserts.
unsafe impl<K, V, H, R, const B: usize> Sync for Chained<K, V, H, R, B>
where
    K: Key,
    V: Copy + Send,
    H: Sync,
    R: Sync,
{
}

impl<K, V, H, R, const B: usize> Chained<K, V, H, R, B>
where
    K: Key,
    V: Copy + Default,
    H: HashFn<K>,
    R: Reducer,
{
    /// Creates a table sized for `capacity` keys.
    ///
    /// The directory is allocated immediately and never resized. The hash
    /// function is moved into the table; it may carry state (e.g. a model
    /// trained over the dataset).
    pub fn new(capacity: usize, hashfn: H) -> Self {
        assert!(capacity > 0, "capacity must be non-zero");
        let directory = Self::directory_address_count(capacity);

        let slots = (0..directory)
            .map(|_| {
                UnsafeCell::new(FirstLevelSlot {
                    key: K::SENTINEL,
                    payload: V::default(),
                    chain: None,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let locks = (0..directory)
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Chained {
            hashfn,
            reductionfn: R::new(directory),
            capacity,
            slots,
            locks,
        }
    }

    /// Inserts a key/payload pair.
    ///
    /// Returns `false` iff the key already exists. Inserting the sentinel
    /// key is a programmer error: it asserts in debug builds and returns
    /// `false` otherwise.
    pub fn insert(&self, key: K, payload: V) -> bool {
        debug_assert!(key != K::SENTINEL, "the sentinel key must never be inserted");
        if key == K::SENTINEL {
            return false;
        }

        let index = self.reductionfn.reduce(self.hashfn.hash(key));
        let _guard = self.locks[index].lock();
        // SAFETY: the per-slot mutex is held for the whole chain walk, so
        // this is the only live reference to the slot and its chain.
        let slot = unsafe { &mut *self.slots[index].get() };

        // Store directly in the first level if possible.
        if slot.key == K::SENTINEL {
            slot.key = key;
            slot.payload = payload;
            return true;
        }
        if slot.key == key {
            return false;
        }

        let mut link = &mut slot.chain;
        loop {
            match link {
                Some(bucket) => {
                    // The first empty slot terminates the chain; everything
                    // past it is empty as well.
                    for slot in bucket.slots.iter_mut() {
                        if slot.key == K::SENTINEL {
                            *slot = Slot { key, payload };
                            return true;
                        }
                        if slot.key == key {
                            return false;
                        }
                    }
                    link = &mut bucket.next;
                }
                None => {
                    // Append a fresh bucket to the chain tail.
                    *link = Some(ChainBucket::with_entry(key, payload));
                    return true;
                }
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

        let index = self.reductionfn.reduce(self.hashfn.hash(key));
        // SAFETY: unsynchronized read; callers guarantee no concurrent
        // insert (see the module docs).
        let slot = unsafe { &*self.slots[index].get() };

        if slot.key == key {
            return Some(slot.payload);
        }

        let mut bucket = slot.chain.as_deref();
        while let Some(current) = bucket {
            for slot in current.slots.iter() {
                if slot.key == key {
                    return Some(slot.payload);
                }
                if slot.key == K::SENTINEL {
                    return None;
                }
            }
            bucket = current.next.as_deref();
        }

        None
    }

    /// Retrieves the payloads of all keys within `[min, max]`.
    ///
    /// Requires a monotone hash function; see the module docs. The walk
    /// starts at the slot `min` reduces to, filters every visited slot by
    /// key, and stops after the first directory entry in which a key at or
    /// beyond `max` was observed (or after one full wrap of the directory).
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn lookup_range(&self, min: K, max: K) -> Vec<V> {
        debug_assert!(
            min != K::SENTINEL && max != K::SENTINEL,
            "the sentinel key is never stored"
        );
        if min == K::SENTINEL || max == K::SENTINEL || min > max {
            return Vec::new();
        }

        let start = self.reductionfn.reduce(self.hashfn.hash(min));
        let directory = self.slots.len();
        let mut result = Vec::new();

        for offset in 0..directory {
            let mut index = start + offset;
            if index >= directory {
                index -= directory;
            }

            // SAFETY: unsynchronized read, as in `lookup`.
            let slot = unsafe { &*self.slots[index].get() };

            let mut reached_upper = false;
            if slot.key != K::SENTINEL {
                if slot.key >= min && slot.key <= max {
                    result.push(slot.payload);
                }
                reached_upper |= slot.key >= max;
            }

            let mut bucket = slot.chain.as_deref();
            'chain: while let Some(current) = bucket {
                for slot in current.slots.iter() {
                    if slot.key == K::SENTINEL {
                        break 'chain;
                    }
                    if slot.key >= min && slot.key <= max {
                        result.push(slot.payload);
                    }
                    reached_upper |= slot.key >= max;
                }
                bucket = current.next.as_deref();
            }

            if reached_upper {
                break;
            }
        }

        result
    }

    /// Statistics over the directory.
    ///
    /// Keys: `empty_slots` (first-level slots holding no key),
    /// `min_chain_length` / `max_chain_length` (chain length in buckets over
    /// occupied slots), `additional_buckets` (chain buckets allocated),
    /// `empty_additional_slots` (unused slots inside chain buckets).
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn statistics(&self) -> Statistics {
        let mut empty_slots = 0usize;
        let mut min_chain_length = usize::MAX;
        let mut max_chain_length = 0usize;
        let mut additional_buckets = 0usize;
        let mut empty_additional_slots = 0usize;

        for cell in self.slots.iter() {
            // SAFETY: unsynchronized read, as in `lookup`.
            let slot = unsafe { &*cell.get() };
            if slot.key == K::SENTINEL {
                empty_slots += 1;
                continue;
            }

            let mut chain_length = 0usize;
            let mut bucket = slot.chain.as_deref();
            while let Some(current) = bucket {
                chain_length += 1;
                additional_buckets += 1;
                empty_additional_slots += current
                    .slots
                    .iter()
                    .filter(|slot| slot.key == K::SENTINEL)
                    .count();
                bucket = current.next.as_deref();
            }

            min_chain_length = min_chain_length.min(chain_length);
            max_chain_length = max_chain_length.max(chain_length);
        }

        if min_chain_length == usize::MAX {
            min_chain_length = 0;
        }

        Statistics::from([
            ("empty_slots", empty_slots as f64),
            ("min_chain_length", min_chain_length as f64),
            ("max_chain_length", max_chain_length as f64),
            ("additional_buckets", additional_buckets as f64),
            ("empty_additional_slots", empty_additional_slots as f64),
        ])
    }

    /// Clears all keys and releases every chain bucket.
    pub fn clear(&mut self) {
        for cell in self.slots.iter_mut() {
            let slot = cell.get_mut();
            slot.key = K::SENTINEL;
            release_chain(&mut slot.chain);
        }
    }

    /// Requested capacity this table was built for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current memory footprint in bytes, including all chain buckets.
    ///
    /// Unsynchronized: only valid once writers have quiesced.
    pub fn byte_size(&self) -> usize {
        let mut chain_buckets = 0usize;
        for cell in self.slots.iter() {
            // SAFETY: unsynchronized read, as in `lookup`.
            let slot = unsafe { &*cell.get() };
            let mut bucket = slot.chain.as_deref();
            while let Some(current) = bucket {
                chain_buckets += 1;
                bucket = current.next.as_deref();
            }
        }

        mem::size_of::<Self>()
            + self.slots.len() * Self::slot_byte_size()
            + chain_buckets * Self::bucket_byte_size()
    }

    /// Size of one chain bucket in bytes.
    pub const fn bucket_byte_size() -> usize {
        mem::size_of::<ChainBucket<K, V, B>>()
    }

    /// Size of one first-level slot in bytes.
    pub const fn slot_byte_size() -> usize {
        mem::size_of::<FirstLevelSlot<K, V, B>>()
    }

    /// Engine name for reporting.
    pub fn name() -> String {
        "chained".into()
    }

    /// Name of the hash function.
    pub fn hash_name() -> String {
        H::name()
    }

    /// Name of the reducer.
    pub fn reducer_name() -> String {
        R::name()
    }

    /// Number of slots per chain bucket.
    pub const fn bucket_size() -> usize {
        B
    }

    /// Directory entries allocated for a requested capacity.
    pub const fn directory_address_count(capacity: usize) -> usize {
        capacity
    }
}

impl<K, V, H, R, const B: usize> Drop for Chained<K, V, H, R, B> {
    fn drop(&mut self) {
        for cell in self.slots.iter_mut() {
            release_chain(&mut cell.get_mut().chain);
        }
    }
}

/// Tears a chain down iteratively; the default recursive drop would burn one
/// stack frame per bucket on degenerate chains.
fn release_chain<K, V, const B: usize>(chain: &mut Option<Box<ChainBucket<K, V, B>>>) {
    let mut bucket = chain.take();
    while let Some(mut current) = bucket {
        bucket = current.next.take();
    }
}
