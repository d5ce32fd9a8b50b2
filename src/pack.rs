//! Bit-packing of boolean sequences into fixed-width words.
//!
//! The substrate only moves and reduces numeric words, so boolean flags are
//! packed least-significant-bit first: flag `i` lives in bit `i % BITS` of word
//! `i / BITS`. Padding bits in the last word are always zero, which keeps
//! bitwise AND/OR reductions over packed words equivalent to logical AND/OR
//! over the flags.

use num_traits::{PrimInt, Unsigned};

use crate::datatype::Datatype;
use crate::error::{Error, Result};

/// Unsigned word types usable as a packing target.
pub trait PackWord: Datatype + PrimInt + Unsigned {
    /// Number of flags carried per word.
    const BITS: usize;
}

macro_rules! impl_pack_word {
    ($($ty:ty),*) => {
        $(
            impl PackWord for $ty {
                const BITS: usize = <$ty>::BITS as usize;
            }
        )*
    };
}

impl_pack_word!(u8, u16, u32, u64);

/// Number of `W` words needed to hold `len` flags.
pub fn packed_len<W: PackWord>(len: usize) -> usize {
    len.div_ceil(W::BITS)
}

/// Pack `bools` into `ceil(len / W::BITS)` words.
pub fn pack_bools<W: PackWord>(bools: &[bool]) -> Vec<W> {
    let mut out = vec![W::zero(); packed_len::<W>(bools.len())];
    for (i, &flag) in bools.iter().enumerate() {
        if flag {
            let word = &mut out[i / W::BITS];
            *word = *word | (W::one() << (i % W::BITS));
        }
    }
    out
}

/// Unpack `words` into `out`.
///
/// `out` must already have the intended logical length; the expected word
/// count is inferred from it and must match `words.len()`.
pub fn unpack_bools<W: PackWord>(words: &[W], out: &mut [bool]) -> Result<()> {
    let expected = packed_len::<W>(out.len());
    if words.len() != expected {
        return Err(Error::SizeMismatch {
            expected,
            actual: words.len(),
        });
    }
    for (i, flag) in out.iter_mut().enumerate() {
        *flag = (words[i / W::BITS] >> (i % W::BITS)) & W::one() == W::one();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_len_rounds_up() {
        assert_eq!(packed_len::<u8>(0), 0);
        assert_eq!(packed_len::<u8>(1), 1);
        assert_eq!(packed_len::<u8>(8), 1);
        assert_eq!(packed_len::<u8>(9), 2);
        assert_eq!(packed_len::<u64>(129), 3);
    }

    #[test]
    fn bits_are_lsb_first() {
        let flags = [true, false, false, false, false, false, false, false, false, true];
        let words: Vec<u8> = pack_bools(&flags);
        assert_eq!(words, vec![0b0000_0001, 0b0000_0010]);
    }

    #[test]
    fn full_word_sets_high_bit() {
        let mut flags = vec![false; 32];
        flags[31] = true;
        let words: Vec<u32> = pack_bools(&flags);
        assert_eq!(words, vec![1u32 << 31]);
    }

    #[test]
    fn padding_bits_stay_zero() {
        let words: Vec<u16> = pack_bools(&[true; 3]);
        assert_eq!(words, vec![0b111]);
    }

    #[test]
    fn unpack_restores_flags() {
        let flags: Vec<bool> = (0..77).map(|i| i % 3 == 0 || i % 7 == 0).collect();
        let words: Vec<u32> = pack_bools(&flags);
        let mut out = vec![false; flags.len()];
        unpack_bools(&words, &mut out).unwrap();
        assert_eq!(out, flags);
    }

    #[test]
    fn unpack_empty() {
        let mut out: Vec<bool> = Vec::new();
        unpack_bools::<u64>(&[], &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn unpack_rejects_word_count_mismatch() {
        let mut out = vec![false; 9];
        let err = unpack_bools::<u8>(&[0xff], &mut out).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
