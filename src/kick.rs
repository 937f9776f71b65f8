//! Kicking policies for the cuckoo table.
//!
//! A policy is handed both candidate buckets for a `(key, payload)` pair.
//! It either places the pair in a free slot and returns `None`, or evicts an
//! incumbent, installs the pair in its place, and returns the evicted pair
//! for the table to reinsert.
//!
//! Policies run under both bucket locks and may be called from many threads
//! at once, so randomness comes from the thread-local generator rather than
//! per-policy state.

use rand::RngCore;

use crate::cuckoo::Bucket;
use crate::cuckoo::Slot;
use crate::key::Key;

/// Places an entry into one of its two candidate buckets, evicting if full.
pub trait KickingPolicy<K: Key, V: Copy + Default>: Default {
    /// Human-readable name for reporting.
    fn name() -> String
    where
        Self: Sized;

    /// Places `(key, payload)` into `first` or `second`, or evicts an
    /// incumbent and returns it.
    fn place<const B: usize>(
        &self,
        first: &mut Bucket<K, V, B>,
        second: &mut Bucket<K, V, B>,
        key: K,
        payload: V,
    ) -> Option<(K, V)>;
}

/// Fills the lesser-loaded bucket; once both are full, evicts a random slot
/// from a bucket picked by coin flip.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalancedKicking;

impl<K: Key, V: Copy + Default> KickingPolicy<K, V> for BalancedKicking {
    fn name() -> String {
        "balanced_kicking".into()
    }

    fn place<const B: usize>(
        &self,
        first: &mut Bucket<K, V, B>,
        second: &mut Bucket<K, V, B>,
        key: K,
        payload: V,
    ) -> Option<(K, V)> {
        let c1 = first.occupied();
        let c2 = second.occupied();

        if c1 <= c2 && c1 < B {
            first.slots[c1] = Slot { key, payload };
            return None;
        }
        if c2 < B {
            second.slots[c2] = Slot { key, payload };
            return None;
        }

        let r = rand::rng().next_u32();
        let victim_bucket = if r & 0x1 == 0x1 { first } else { second };
        let victim_index = r as usize % B;
        let victim = victim_bucket.slots[victim_index];
        victim_bucket.slots[victim_index] = Slot { key, payload };
        Some((victim.key, victim.payload))
    }
}

/// Prefers the primary bucket, then the secondary; once both are full,
/// evicts from the secondary bucket with `BIAS` percent probability and from
/// the primary otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct BiasedKicking<const BIAS: u8>;

impl<const BIAS: u8> BiasedKicking<BIAS> {
    const THRESHOLD: u32 = ((u32::MAX as u64 * BIAS as u64) / 100) as u32;
}

impl<K: Key, V: Copy + Default, const BIAS: u8> KickingPolicy<K, V> for BiasedKicking<BIAS> {
    fn name() -> String {
        format!("biased_kicking_{BIAS}")
    }

    fn place<const B: usize>(
        &self,
        first: &mut Bucket<K, V, B>,
        second: &mut Bucket<K, V, B>,
        key: K,
        payload: V,
    ) -> Option<(K, V)> {
        let c1 = first.occupied();
        let c2 = second.occupied();

        if c1 < B {
            first.slots[c1] = Slot { key, payload };
            return None;
        }
        if c2 < B {
            second.slots[c2] = Slot { key, payload };
            return None;
        }

        let r = rand::rng().next_u32();
        let victim_bucket = if r > Self::THRESHOLD { first } else { second };
        let victim_index = r as usize % B;
        let victim = victim_bucket.slots[victim_index];
        victim_bucket.slots[victim_index] = Slot { key, payload };
        Some((victim.key, victim.payload))
    }
}

/// Always evicts from the primary bucket on overflow.
pub type UnbiasedKicking = BiasedKicking<0>;

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket<const B: usize>(keys: &[u8]) -> Bucket<u8, u64, B> {
        let mut bucket = Bucket::empty();
        for (i, &key) in keys.iter().enumerate() {
            bucket.slots[i] = Slot {
                key,
                payload: key as u64,
            };
        }
        bucket
    }

    #[test]
    fn balanced_fills_the_lesser_loaded_bucket() {
        let mut first: Bucket<u8, u64, 2> = bucket(&[1]);
        let mut second: Bucket<u8, u64, 2> = bucket(&[]);

        let kicked = BalancedKicking.place(&mut first, &mut second, 7, 70);
        assert!(kicked.is_none());
        assert_eq!(second.slots[0].key, 7);
        assert_eq!(second.slots[0].payload, 70);

        // Ties go to the first bucket.
        let kicked = BalancedKicking.place(&mut first, &mut second, 8, 80);
        assert!(kicked.is_none());
        assert_eq!(first.slots[1].key, 8);
    }

    #[test]
    fn balanced_evicts_exactly_one_incumbent_when_both_full() {
        let mut first: Bucket<u8, u64, 2> = bucket(&[1, 2]);
        let mut second: Bucket<u8, u64, 2> = bucket(&[3, 4]);

        let (kicked_key, kicked_payload) = BalancedKicking
            .place(&mut first, &mut second, 9, 90)
            .expect("full buckets must evict");
        assert_eq!(kicked_payload, kicked_key as u64);

        let live: Vec<u8> = first
            .slots
            .iter()
            .chain(second.slots.iter())
            .map(|slot| slot.key)
            .collect();
        assert!(live.contains(&9));
        assert!(!live.contains(&kicked_key));
        assert_eq!(live.len(), 4);
    }

    #[test]
    fn biased_prefers_the_primary_bucket() {
        let policy = UnbiasedKicking::default();
        let mut first: Bucket<u8, u64, 2> = bucket(&[1]);
        let mut second: Bucket<u8, u64, 2> = bucket(&[]);

        let kicked = policy.place(&mut first, &mut second, 7, 70);
        assert!(kicked.is_none());
        assert_eq!(first.slots[1].key, 7);
    }

    #[test]
    fn unbiased_always_evicts_from_the_primary_bucket() {
        let policy = UnbiasedKicking::default();
        for _ in 0..64 {
            let mut first: Bucket<u8, u64, 1> = bucket(&[1]);
            let mut second: Bucket<u8, u64, 1> = bucket(&[2]);

            let (kicked_key, _) = policy
                .place(&mut first, &mut second, 9, 90)
                .expect("full buckets must evict");
            assert_eq!(kicked_key, 1);
            assert_eq!(first.slots[0].key, 9);
            assert_eq!(second.slots[0].key, 2);
        }
    }
}
