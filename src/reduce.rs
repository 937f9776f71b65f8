//! Hash-to-index reducers.
//!
//! A reducer maps a full-width hash to a directory index in `[0, D)`. It is
//! constructed from the directory size by the table itself, so engines can
//! derive `D` from the capacity without the caller repeating it.

use strength_reduce::StrengthReducedU64;

/// Maps 64-bit hash values into a directory of known size.
pub trait Reducer {
    /// Builds a reducer for a directory with `directory_size` entries.
    ///
    /// `directory_size` must be non-zero.
    fn new(directory_size: usize) -> Self;

    /// Human-readable name for reporting.
    fn name() -> String
    where
        Self: Sized;

    /// Reduces a hash to an index in `[0, directory_size)`.
    fn reduce(&self, hash: u64) -> usize;
}

/// Passes the hash through unchanged.
///
/// For hash functions whose output range already is the directory address
/// space (e.g. learned models trained to emit directory offsets). The caller
/// is responsible for the range contract; an out-of-range value makes the
/// table index panic.
#[derive(Debug, Clone, Copy)]
pub struct DoNothing;

impl Reducer for DoNothing {
    fn new(_directory_size: usize) -> Self {
        DoNothing
    }

    fn name() -> String {
        "do_nothing".into()
    }

    #[inline(always)]
    fn reduce(&self, hash: u64) -> usize {
        hash as usize
    }
}

/// Modulo over a non-power-of-two domain via a precomputed magic divisor.
///
/// Division is strength-reduced at construction time, so the hot path is a
/// multiply/shift pair instead of a hardware divide.
#[derive(Debug, Clone, Copy)]
pub struct FastModulo {
    magic: StrengthReducedU64,
}

impl Reducer for FastModulo {
    fn new(directory_size: usize) -> Self {
        FastModulo {
            magic: StrengthReducedU64::new(directory_size as u64),
        }
    }

    fn name() -> String {
        "fast_modulo".into()
    }

    #[inline(always)]
    fn reduce(&self, hash: u64) -> usize {
        (hash % self.magic) as usize
    }
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;

    #[test]
    fn do_nothing_is_the_identity() {
        let r = DoNothing::new(17);
        assert_eq!(r.reduce(0), 0);
        assert_eq!(r.reduce(16), 16);
    }

    #[test]
    fn fast_modulo_matches_hardware_modulo() {
        let mut rng = rand::rng();
        for directory_size in [1usize, 2, 3, 10, 1_000, 999_983] {
            let r = FastModulo::new(directory_size);
            for _ in 0..1_000 {
                let hash = rng.next_u64();
                assert_eq!(r.reduce(hash), (hash % directory_size as u64) as usize);
            }
        }
    }
}
