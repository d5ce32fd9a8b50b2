//! Element-wise reduction kernels over raw substrate buffers.
//!
//! Substrates that have no native reduction (such as [`ThreadGroup`]) combine
//! contributions with [`combine`], dispatching on the transport tag to the
//! concrete scalar type. Buffers arrive as bytes with no alignment guarantee,
//! so both sides are copied into typed vectors before combining.
//!
//! [`ThreadGroup`]: crate::ThreadGroup

use num_traits::{Float, PrimInt, WrappingAdd};

use crate::datatype::{Datatype, DatatypeTag};
use crate::error::{Error, Result};
use crate::ReduceOp;

/// Fold `incoming` into `acc` element by element: `acc[i] = op(acc[i], incoming[i])`.
///
/// Integer sums wrap on overflow. Bitwise operations are only
/// defined for integer datatypes.
pub fn combine(datatype: DatatypeTag, op: ReduceOp, acc: &mut [u8], incoming: &[u8]) -> Result<()> {
    if acc.len() != incoming.len() {
        return Err(Error::CountMismatch {
            expected: acc.len(),
            actual: incoming.len(),
        });
    }
    if acc.len() % datatype.size_of() != 0 {
        return Err(Error::Internal(format!(
            "{}-byte buffer is not a whole number of {} elements",
            acc.len(),
            datatype.name()
        )));
    }

    match datatype {
        DatatypeTag::F32 => combine_float::<f32>(op, acc, incoming),
        DatatypeTag::F64 => combine_float::<f64>(op, acc, incoming),
        DatatypeTag::I8 => combine_int::<i8>(op, acc, incoming),
        DatatypeTag::I16 => combine_int::<i16>(op, acc, incoming),
        DatatypeTag::I32 => combine_int::<i32>(op, acc, incoming),
        DatatypeTag::I64 => combine_int::<i64>(op, acc, incoming),
        DatatypeTag::U8 => combine_int::<u8>(op, acc, incoming),
        DatatypeTag::U16 => combine_int::<u16>(op, acc, incoming),
        DatatypeTag::U32 => combine_int::<u32>(op, acc, incoming),
        DatatypeTag::U64 => combine_int::<u64>(op, acc, incoming),
    }
}

fn combine_int<T>(op: ReduceOp, acc: &mut [u8], incoming: &[u8]) -> Result<()>
where
    T: Datatype + PrimInt + WrappingAdd,
{
    match op {
        ReduceOp::Sum => apply::<T>(acc, incoming, |a, b| a.wrapping_add(&b)),
        ReduceOp::Min => apply::<T>(acc, incoming, |a, b| a.min(b)),
        ReduceOp::Max => apply::<T>(acc, incoming, |a, b| a.max(b)),
        ReduceOp::BitAnd => apply::<T>(acc, incoming, |a, b| a & b),
        ReduceOp::BitOr => apply::<T>(acc, incoming, |a, b| a | b),
    }
    Ok(())
}

fn combine_float<T>(op: ReduceOp, acc: &mut [u8], incoming: &[u8]) -> Result<()>
where
    T: Datatype + Float,
{
    match op {
        ReduceOp::Sum => apply::<T>(acc, incoming, |a, b| a + b),
        ReduceOp::Min => apply::<T>(acc, incoming, |a, b| a.min(b)),
        ReduceOp::Max => apply::<T>(acc, incoming, |a, b| a.max(b)),
        ReduceOp::BitAnd | ReduceOp::BitOr => {
            return Err(Error::UnsupportedOp {
                op: op.name(),
                datatype: T::TAG.name(),
            })
        }
    }
    Ok(())
}

fn apply<T: Datatype>(acc: &mut [u8], incoming: &[u8], f: impl Fn(T, T) -> T) {
    let mut lhs: Vec<T> = bytemuck::pod_collect_to_vec(&acc[..]);
    let rhs: Vec<T> = bytemuck::pod_collect_to_vec(&incoming[..]);
    for (a, &b) in lhs.iter_mut().zip(&rhs) {
        *a = f(*a, b);
    }
    acc.copy_from_slice(bytemuck::cast_slice(&lhs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reduce<T: Datatype>(op: ReduceOp, a: &[T], b: &[T]) -> Result<Vec<T>> {
        let mut acc = bytemuck::cast_slice::<T, u8>(a).to_vec();
        combine(T::TAG, op, &mut acc, bytemuck::cast_slice(b))?;
        Ok(bytemuck::pod_collect_to_vec(&acc[..]))
    }

    #[test]
    fn sums_floats() {
        let out = reduce(ReduceOp::Sum, &[1.0f64, 2.0], &[0.5, -4.0]).unwrap();
        assert_eq!(out, vec![1.5, -2.0]);
    }

    #[test]
    fn min_max_integers() {
        assert_eq!(
            reduce(ReduceOp::Min, &[3i16, -7, 9], &[4, -8, 9]).unwrap(),
            vec![3, -8, 9]
        );
        assert_eq!(
            reduce(ReduceOp::Max, &[3u64, 7], &[4, 1]).unwrap(),
            vec![4, 7]
        );
    }

    #[test]
    fn integer_sum_wraps() {
        assert_eq!(reduce(ReduceOp::Sum, &[250u8], &[10]).unwrap(), vec![4]);
        assert_eq!(
            reduce(ReduceOp::Sum, &[i32::MAX], &[2]).unwrap(),
            vec![i32::MIN + 1]
        );
    }

    #[test]
    fn bitwise_on_words() {
        assert_eq!(
            reduce(ReduceOp::BitAnd, &[0b1100u32], &[0b1010]).unwrap(),
            vec![0b1000]
        );
        assert_eq!(
            reduce(ReduceOp::BitOr, &[0b1100u32], &[0b1010]).unwrap(),
            vec![0b1110]
        );
    }

    #[test]
    fn bitwise_on_floats_is_rejected() {
        let err = reduce(ReduceOp::BitOr, &[1.0f32], &[2.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedOp {
                op: "bitor",
                datatype: "f32"
            }
        ));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut acc = vec![0u8; 8];
        let err = combine(DatatypeTag::I32, ReduceOp::Sum, &mut acc, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::CountMismatch { .. }));
    }

    #[test]
    fn partial_element_is_rejected() {
        let mut acc = vec![0u8; 6];
        let err = combine(DatatypeTag::I32, ReduceOp::Sum, &mut acc, &[0u8; 6]).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn unaligned_buffers_are_handled() {
        let a = [1.25f64, 2.5];
        let b = [0.25f64, 0.5];
        let mut acc = vec![0u8; 17];
        acc[1..].copy_from_slice(bytemuck::cast_slice(&a));
        let mut incoming = vec![0u8; 17];
        incoming[1..].copy_from_slice(bytemuck::cast_slice(&b));

        combine(DatatypeTag::F64, ReduceOp::Sum, &mut acc[1..], &incoming[1..]).unwrap();
        let out: Vec<f64> = bytemuck::pod_collect_to_vec(&acc[1..]);
        assert_eq!(out, vec![1.5, 3.0]);
    }

    proptest! {
        #[test]
        fn integer_min_max_commute(a in proptest::collection::vec(any::<i64>(), 0..32)) {
            let b: Vec<i64> = a.iter().rev().copied().collect();
            prop_assert_eq!(reduce(ReduceOp::Min, &a, &b).unwrap(), reduce(ReduceOp::Min, &b, &a).unwrap());
            prop_assert_eq!(reduce(ReduceOp::Max, &a, &b).unwrap(), reduce(ReduceOp::Max, &b, &a).unwrap());
        }

        #[test]
        fn min_is_idempotent(a in proptest::collection::vec(any::<u32>(), 0..32)) {
            prop_assert_eq!(reduce(ReduceOp::Min, &a, &a).unwrap(), a.clone());
            prop_assert_eq!(reduce(ReduceOp::BitOr, &a, &a).unwrap(), a);
        }
    }
}
