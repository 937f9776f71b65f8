//! Key capability for the table engines.
//!
//! Keys are fixed-width unsigned integers. One value per key type, the
//! *sentinel*, is reserved to mark empty slots and must never be inserted.

use core::fmt::Debug;

/// A fixed-width unsigned integer key.
///
/// The sentinel is the maximum representable value of the type. Empty slots
/// store it; occupied slots never do.
pub trait Key: Copy + Eq + Ord + Debug + Send + Sync + 'static {
    /// Reserved key value marking an empty slot.
    const SENTINEL: Self;

    /// Widens the key to the hash input domain.
    fn to_u64(self) -> u64;
}

macro_rules! impl_key {
    ($($t:ty),* $(,)?) => {$(
        impl Key for $t {
            const SENTINEL: Self = <$t>::MAX;

            #[inline(always)]
            fn to_u64(self) -> u64 {
                self as u64
            }
        }
    )*};
}

impl_key!(u8, u16, u32, u64, usize);
