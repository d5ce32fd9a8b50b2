//! Cross-process consistency checks.
//!
//! A value is synchronized when its group-wide minimum and maximum both equal
//! the local value on every rank. Each check ends with a group-wide AND of the
//! per-rank verdicts, so all ranks return the same answer.

use std::slice;

use crate::comm::Communicator;
use crate::datatype::Ordered;
use crate::error::{fatal, Error};

impl Communicator {
    /// Check that every rank holds the same `value`.
    ///
    /// Returns the same verdict on every rank; always `true` in a group of one.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ferropar::ThreadGroup;
    ///
    /// ThreadGroup::run(3, |world| {
    ///     assert!(world.verify(&42u64));
    ///     assert!(!world.verify(&world.rank()));
    /// });
    /// ```
    pub fn verify<T: Ordered>(&self, value: &T) -> bool {
        let _scope = self.collective("verify", "verify");
        self.verify_values(slice::from_ref(value))
    }

    /// Check that every rank holds the same sequence.
    ///
    /// Lengths are compared first, so ranks holding sequences of different
    /// lengths all get `false`.
    pub fn verify_slice<T: Ordered>(&self, values: &[T]) -> bool {
        let _scope = self.collective("verify", "verify_slice");
        self.verify_sequence(values)
    }

    /// Check that every rank holds the same string.
    pub fn verify_str(&self, text: &str) -> bool {
        let _scope = self.collective("verify", "verify_str");
        self.verify_text(text)
    }

    /// Abort unless every rank reached the same call site.
    ///
    /// `site` is any label that identifies the calling location. Does nothing
    /// when [`Config::checks`](crate::Config::checks) is off.
    pub fn assert_synchronized(&self, site: &str) {
        if !self.config().checks {
            return;
        }
        let _scope = self.scope("assert_synchronized");
        if !self.verify_text(site) {
            fatal("assert_synchronized", Error::Unsynchronized(site.to_owned()));
        }
    }

    /// Abort unless every rank is entering the collective `op`.
    pub(crate) fn check_collective(&self, op: &'static str) {
        if !self.verify_text(op) {
            fatal(op, Error::Unsynchronized(op.to_owned()));
        }
    }

    fn verify_text(&self, text: &str) -> bool {
        let shorts: Vec<i16> = text.bytes().map(i16::from).collect();
        self.verify_sequence(&shorts)
    }

    fn verify_sequence<T: Ordered>(&self, values: &[T]) -> bool {
        self.verify_values(&[values.len() as u64]) && self.verify_values(values)
    }

    fn verify_values<T: Ordered>(&self, values: &[T]) -> bool {
        if self.is_single() {
            return true;
        }
        let mut lo = values.to_vec();
        let mut hi = values.to_vec();
        self.allreduce_in_place("verify", &mut lo, T::MIN_OP);
        self.allreduce_in_place("verify", &mut hi, T::MAX_OP);

        let mut agreed = lo == values && hi == values;
        self.allreduce_in_place("verify", slice::from_mut(&mut agreed), <bool as Ordered>::MIN_OP);
        agreed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_always_agrees() {
        let world = Communicator::single_process();
        assert!(world.verify(&f64::NAN));
        assert!(world.verify_slice(&[1u8, 2, 3]));
        assert!(world.verify_str("config-v3"));
        world.assert_synchronized("single_process_always_agrees");
    }
}
