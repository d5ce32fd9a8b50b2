//! Datatype traits and type tag mapping.
//!
//! [`Datatype`] is a sealed trait mapping Rust primitive types to the opaque
//! transport tag the substrate uses to interpret a buffer. It is the single
//! source of truth for wire representation: adding a scalar kind means adding
//! one tag and one macro line here.
//!
//! [`Element`] describes everything that can travel through a communicator,
//! including the derived kinds that are carried as a fixed multiple of a
//! scalar word: complex pairs (two words each) and booleans (bit-packed).
//!
//! # Supported Types
//!
//! | Rust Type       | Wire word | Words per element   | Tag Value |
//! |-----------------|-----------|---------------------|-----------|
//! | `f32`           | `f32`     | 1                   | 0         |
//! | `f64`           | `f64`     | 1                   | 1         |
//! | `i32`           | `i32`     | 1                   | 2         |
//! | `i64`           | `i64`     | 1                   | 3         |
//! | `u8`            | `u8`      | 1                   | 4         |
//! | `u32`           | `u32`     | 1                   | 5         |
//! | `u64`           | `u64`     | 1                   | 6         |
//! | `i8`            | `i8`      | 1                   | 7         |
//! | `i16`           | `i16`     | 1                   | 8         |
//! | `u16`           | `u16`     | 1                   | 9         |
//! | `Complex<f32>`  | `f32`     | 2                   | 0         |
//! | `Complex<f64>`  | `f64`     | 2                   | 1         |
//! | `bool`          | `u32`     | 1 per 32 flags      | 5         |

use std::borrow::Cow;

use num_complex::Complex;

use crate::error::{Error, Result};
use crate::pack::{pack_bools, packed_len, unpack_bools};
use crate::ReduceOp;

/// Internal module to seal the traits against external implementations.
mod sealed {
    pub trait Sealed {}
}

/// Transport tags for the wire-representable scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32 = 0,
    /// 64-bit floating point
    F64 = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// 64-bit signed integer
    I64 = 3,
    /// 8-bit unsigned integer
    U8 = 4,
    /// 32-bit unsigned integer
    U32 = 5,
    /// 64-bit unsigned integer
    U64 = 6,
    /// 8-bit signed integer
    I8 = 7,
    /// 16-bit signed integer
    I16 = 8,
    /// 16-bit unsigned integer
    U16 = 9,
}

impl DatatypeTag {
    /// Width of one element of this datatype in bytes.
    pub const fn size_of(self) -> usize {
        match self {
            DatatypeTag::U8 | DatatypeTag::I8 => 1,
            DatatypeTag::U16 | DatatypeTag::I16 => 2,
            DatatypeTag::F32 | DatatypeTag::I32 | DatatypeTag::U32 => 4,
            DatatypeTag::F64 | DatatypeTag::I64 | DatatypeTag::U64 => 8,
        }
    }

    /// Lowercase Rust name of the datatype, used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            DatatypeTag::F32 => "f32",
            DatatypeTag::F64 => "f64",
            DatatypeTag::I32 => "i32",
            DatatypeTag::I64 => "i64",
            DatatypeTag::U8 => "u8",
            DatatypeTag::U32 => "u32",
            DatatypeTag::U64 => "u64",
            DatatypeTag::I8 => "i8",
            DatatypeTag::I16 => "i16",
            DatatypeTag::U16 => "u16",
        }
    }
}

/// Trait for scalar types the substrate can move and reduce directly.
///
/// This is a **sealed trait**: it cannot be implemented outside this crate.
/// Supported types: [`f32`], [`f64`], [`i8`], [`i16`], [`i32`], [`i64`],
/// [`u8`], [`u16`], [`u32`], [`u64`].
pub trait Datatype:
    sealed::Sealed + bytemuck::Pod + Default + PartialOrd + Send + Sync + 'static
{
    /// The transport tag for this type.
    const TAG: DatatypeTag;
}

/// Anything that can be carried through a communicator.
///
/// An element is encoded into a sequence of [`Datatype`] words before it is
/// handed to the substrate, and decoded back afterwards. Scalars encode to
/// themselves without copying.
pub trait Element: sealed::Sealed + Clone + Default + PartialEq + Send + Sync + 'static {
    /// Scalar word type used on the wire.
    type Word: Datatype;

    /// Number of wire words needed to carry `len` elements.
    fn word_count(len: usize) -> usize;

    /// Encode elements into wire words.
    fn encode(values: &[Self]) -> Cow<'_, [Self::Word]>;

    /// Decode wire words into `out`, whose length is the logical element count.
    ///
    /// Fails if `words.len() != Self::word_count(out.len())`.
    fn decode(words: &[Self::Word], out: &mut [Self]) -> Result<()>;

    /// View elements as wire words in place, when the encoding is the identity.
    fn words_mut(values: &mut [Self]) -> Option<&mut [Self::Word]> {
        let _ = values;
        None
    }
}

/// Elements carried as a fixed number of words each.
///
/// Point-to-point transfers and `alltoall` subdivide buffers on element
/// boundaries, which requires a constant words-per-element ratio. Packed
/// booleans do not have one.
pub trait Contiguous: Element {
    /// Wire words per element.
    const WORDS: usize;
}

/// Elements with a group-wide `min`/`max`.
///
/// For `bool`, `min` is realized as bitwise AND on packed words ("any false
/// wins") and `max` as bitwise OR ("any true wins").
pub trait Ordered: Element {
    /// Reduction used for `min`.
    const MIN_OP: ReduceOp;
    /// Reduction used for `max`.
    const MAX_OP: ReduceOp;
}

/// Elements with a group-wide `sum`.
///
/// Complex values are summed as interleaved real and imaginary parts.
pub trait Summable: Element {}

fn check_words(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::CountMismatch { expected, actual })
    }
}

macro_rules! impl_scalar {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}

        impl Datatype for $ty {
            const TAG: DatatypeTag = $tag;
        }

        impl Element for $ty {
            type Word = $ty;

            fn word_count(len: usize) -> usize {
                len
            }

            fn encode(values: &[Self]) -> Cow<'_, [Self::Word]> {
                Cow::Borrowed(values)
            }

            fn decode(words: &[Self::Word], out: &mut [Self]) -> Result<()> {
                check_words(out.len(), words.len())?;
                out.copy_from_slice(words);
                Ok(())
            }

            fn words_mut(values: &mut [Self]) -> Option<&mut [Self::Word]> {
                Some(values)
            }
        }

        impl Contiguous for $ty {
            const WORDS: usize = 1;
        }

        impl Ordered for $ty {
            const MIN_OP: ReduceOp = ReduceOp::Min;
            const MAX_OP: ReduceOp = ReduceOp::Max;
        }

        impl Summable for $ty {}
    };
}

impl_scalar!(f32, DatatypeTag::F32);
impl_scalar!(f64, DatatypeTag::F64);
impl_scalar!(i32, DatatypeTag::I32);
impl_scalar!(i64, DatatypeTag::I64);
impl_scalar!(u8, DatatypeTag::U8);
impl_scalar!(u32, DatatypeTag::U32);
impl_scalar!(u64, DatatypeTag::U64);
impl_scalar!(i8, DatatypeTag::I8);
impl_scalar!(i16, DatatypeTag::I16);
impl_scalar!(u16, DatatypeTag::U16);

macro_rules! impl_complex {
    ($ty:ty) => {
        impl sealed::Sealed for Complex<$ty> {}

        impl Element for Complex<$ty> {
            type Word = $ty;

            fn word_count(len: usize) -> usize {
                2 * len
            }

            fn encode(values: &[Self]) -> Cow<'_, [Self::Word]> {
                Cow::Owned(values.iter().flat_map(|c| [c.re, c.im]).collect())
            }

            fn decode(words: &[Self::Word], out: &mut [Self]) -> Result<()> {
                check_words(2 * out.len(), words.len())?;
                for (value, pair) in out.iter_mut().zip(words.chunks_exact(2)) {
                    *value = Complex::new(pair[0], pair[1]);
                }
                Ok(())
            }
        }

        impl Contiguous for Complex<$ty> {
            const WORDS: usize = 2;
        }

        impl Summable for Complex<$ty> {}
    };
}

impl_complex!(f32);
impl_complex!(f64);

impl sealed::Sealed for bool {}

impl Element for bool {
    type Word = u32;

    fn word_count(len: usize) -> usize {
        packed_len::<u32>(len)
    }

    fn encode(values: &[Self]) -> Cow<'_, [Self::Word]> {
        Cow::Owned(pack_bools(values))
    }

    fn decode(words: &[Self::Word], out: &mut [Self]) -> Result<()> {
        unpack_bools(words, out)
    }
}

impl Ordered for bool {
    const MIN_OP: ReduceOp = ReduceOp::BitAnd;
    const MAX_OP: ReduceOp = ReduceOp::BitOr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(DatatypeTag::F32 as i32, 0);
        assert_eq!(DatatypeTag::F64 as i32, 1);
        assert_eq!(DatatypeTag::I32 as i32, 2);
        assert_eq!(DatatypeTag::I64 as i32, 3);
        assert_eq!(DatatypeTag::U8 as i32, 4);
        assert_eq!(DatatypeTag::U32 as i32, 5);
        assert_eq!(DatatypeTag::U64 as i32, 6);
        assert_eq!(DatatypeTag::I8 as i32, 7);
        assert_eq!(DatatypeTag::I16 as i32, 8);
        assert_eq!(DatatypeTag::U16 as i32, 9);
    }

    #[test]
    fn scalar_tags_map_to_their_type() {
        assert_eq!(f32::TAG, DatatypeTag::F32);
        assert_eq!(f64::TAG, DatatypeTag::F64);
        assert_eq!(i8::TAG, DatatypeTag::I8);
        assert_eq!(i16::TAG, DatatypeTag::I16);
        assert_eq!(i32::TAG, DatatypeTag::I32);
        assert_eq!(i64::TAG, DatatypeTag::I64);
        assert_eq!(u8::TAG, DatatypeTag::U8);
        assert_eq!(u16::TAG, DatatypeTag::U16);
        assert_eq!(u32::TAG, DatatypeTag::U32);
        assert_eq!(u64::TAG, DatatypeTag::U64);
    }

    #[test]
    fn derived_kinds_resolve_to_a_scalar_word() {
        assert_eq!(<Complex<f32> as Element>::Word::TAG, DatatypeTag::F32);
        assert_eq!(<Complex<f64> as Element>::Word::TAG, DatatypeTag::F64);
        assert_eq!(<bool as Element>::Word::TAG, DatatypeTag::U32);
        assert_eq!(<Complex<f64> as Contiguous>::WORDS, 2);
        assert_eq!(<u16 as Contiguous>::WORDS, 1);
    }

    #[test]
    fn size_of_matches_rust_width() {
        assert_eq!(DatatypeTag::F32.size_of(), std::mem::size_of::<f32>());
        assert_eq!(DatatypeTag::F64.size_of(), std::mem::size_of::<f64>());
        assert_eq!(DatatypeTag::I8.size_of(), std::mem::size_of::<i8>());
        assert_eq!(DatatypeTag::I16.size_of(), std::mem::size_of::<i16>());
        assert_eq!(DatatypeTag::U16.size_of(), std::mem::size_of::<u16>());
        assert_eq!(DatatypeTag::U64.size_of(), std::mem::size_of::<u64>());
    }

    #[test]
    fn trait_is_implemented() {
        fn assert_datatype<T: Datatype>() {}
        fn assert_contiguous<T: Contiguous>() {}
        fn assert_ordered<T: Ordered>() {}
        fn assert_summable<T: Summable>() {}
        assert_datatype::<f32>();
        assert_datatype::<u16>();
        assert_contiguous::<Complex<f32>>();
        assert_contiguous::<i64>();
        assert_ordered::<bool>();
        assert_ordered::<i8>();
        assert_summable::<Complex<f64>>();
        assert_summable::<u64>();
    }

    #[test]
    fn scalar_encode_borrows() {
        let values = [1.0f64, 2.0, 3.0];
        assert!(matches!(f64::encode(&values), Cow::Borrowed(_)));
    }

    #[test]
    fn only_scalars_expose_words_in_place() {
        let mut values = [1u16, 2];
        assert!(u16::words_mut(&mut values).is_some());
        let mut flags = [true];
        assert!(bool::words_mut(&mut flags).is_none());
        let mut pairs = [Complex::new(0.0f32, 1.0)];
        assert!(Complex::<f32>::words_mut(&mut pairs).is_none());
    }

    #[test]
    fn complex_interleaves_parts() {
        let values = [Complex::new(1.0f64, -1.0), Complex::new(2.5, 0.5)];
        let words = Complex::<f64>::encode(&values);
        assert_eq!(&*words, &[1.0, -1.0, 2.5, 0.5]);

        let mut out = [Complex::default(); 2];
        Complex::<f64>::decode(&words, &mut out).unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn bool_packs_into_u32_words() {
        assert_eq!(bool::word_count(0), 0);
        assert_eq!(bool::word_count(32), 1);
        assert_eq!(bool::word_count(33), 2);

        let flags = [true, false, true, true];
        let words = bool::encode(&flags);
        assert_eq!(&*words, &[0b1101]);
    }

    #[test]
    fn decode_rejects_wrong_word_count() {
        let mut out = [0i32; 3];
        assert!(matches!(
            i32::decode(&[1, 2], &mut out),
            Err(Error::CountMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn datatype_tag_debug_format() {
        assert_eq!(format!("{:?}", DatatypeTag::F64), "F64");
        assert_eq!(format!("{:?}", DatatypeTag::I16), "I16");
        assert_eq!(DatatypeTag::U16.name(), "u16");
    }
}
