//! Channel number allocation.
//!
//! # Purpose
//! Resolves requested or auto-assigned channel numbers against a snapshot of
//! the numbers already committed to the store, reserving each result so later
//! items in the same batch cannot collide with earlier ones.
//!
//! # Notes
//! The snapshot is taken once per batch and is not re-queried per item, so
//! resolution must be sequential within a batch. Two batches racing in
//! different processes can still pick the same number; the store's unique
//! index turns that into a reported per-item failure at commit time.
use std::collections::BTreeSet;

use crate::model::ChannelNumber;

/// A requested number that is already taken. Recoverable: the caller reports
/// it for the one item and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("channel number {0} is already in use")]
pub struct NumberConflict(pub ChannelNumber);

/// Batch-local view of the channel-number space: committed numbers plus
/// reservations made earlier in the same batch.
#[derive(Debug)]
pub struct NumberPool {
    used: BTreeSet<ChannelNumber>,
}

impl NumberPool {
    pub fn new(used: BTreeSet<ChannelNumber>) -> Self {
        Self { used }
    }

    /// Resolves one allocation request.
    ///
    /// With a requested number: confirm it is free, reserve it, and return it
    /// verbatim (fractions preserved). Without one: reserve and return the
    /// lowest unused integer >= 1. A conflict leaves the pool untouched.
    pub fn resolve(
        &mut self,
        requested: Option<ChannelNumber>,
    ) -> Result<ChannelNumber, NumberConflict> {
        let number = match requested {
            Some(number) => {
                if self.used.contains(&number) {
                    return Err(NumberConflict(number));
                }
                number
            }
            None => self.next_free_from(1.0),
        };
        self.used.insert(number);
        Ok(number)
    }

    /// Reserves `count` sequential numbers walking up from `base` in unit
    /// steps, skipping anything already used. Every value passes the same
    /// membership check as an explicit request.
    pub fn assign_sequence(&mut self, base: ChannelNumber, count: usize) -> Vec<ChannelNumber> {
        let mut assigned = Vec::with_capacity(count);
        let mut candidate = base.value();
        for _ in 0..count {
            let number = self.next_free_from(candidate);
            self.used.insert(number);
            candidate = number.value() + 1.0;
            assigned.push(number);
        }
        assigned
    }

    /// Removes a number from the snapshot, freeing it for reassignment.
    /// Used when the entity that owns it is being renumbered in this batch.
    pub fn unreserve(&mut self, number: ChannelNumber) {
        self.used.remove(&number);
    }

    fn next_free_from(&self, base: f64) -> ChannelNumber {
        let mut candidate = base;
        loop {
            // `base` comes from a validated number and unit increments keep
            // the value finite, so construction cannot fail here.
            if let Ok(number) = ChannelNumber::new(candidate)
                && !self.used.contains(&number)
            {
                return number;
            }
            candidate += 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(value: f64) -> ChannelNumber {
        ChannelNumber::new(value).expect("valid number")
    }

    fn pool_over(values: &[f64]) -> NumberPool {
        NumberPool::new(values.iter().map(|v| number(*v)).collect())
    }

    #[test]
    fn auto_assignment_fills_gaps_in_order() {
        // Batch [none, 5, none] over {1,2,3} resolves to [4, 5, 6]: the
        // explicit 5 is reserved when its turn comes, so the second auto
        // item skips past it.
        let mut pool = pool_over(&[1.0, 2.0, 3.0]);
        let first = pool.resolve(None).expect("auto");
        let second = pool.resolve(Some(number(5.0))).expect("explicit");
        let third = pool.resolve(None).expect("auto");
        assert_eq!(
            [first.value(), second.value(), third.value()],
            [4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn sequential_autos_are_distinct() {
        let mut pool = pool_over(&[2.0]);
        let values: Vec<f64> = (0..4)
            .map(|_| pool.resolve(None).expect("auto").value())
            .collect();
        assert_eq!(values, vec![1.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn conflict_reports_the_requested_value_and_leaves_pool_unchanged() {
        let mut pool = pool_over(&[7.0]);
        let err = pool.resolve(Some(number(7.0))).expect_err("conflict");
        assert_eq!(err, NumberConflict(number(7.0)));
        // The failed request must not have reserved anything extra: the next
        // explicit request for a free value still succeeds.
        assert_eq!(pool.resolve(Some(number(8.0))).expect("free"), number(8.0));
    }

    #[test]
    fn fractional_requests_are_preserved_verbatim() {
        let mut pool = pool_over(&[8.0, 9.0]);
        assert_eq!(pool.resolve(Some(number(8.5))).expect("frac"), number(8.5));
        // Integer scanning is unaffected by the fractional reservation.
        assert_eq!(pool.resolve(None).expect("auto").value(), 1.0);
    }

    #[test]
    fn fractional_committed_numbers_only_block_equal_values() {
        let mut pool = pool_over(&[1.5]);
        assert_eq!(pool.resolve(None).expect("auto").value(), 1.0);
        let err = pool.resolve(Some(number(1.5))).expect_err("conflict");
        assert_eq!(err.0.value(), 1.5);
    }

    #[test]
    fn assign_sequence_skips_used_values() {
        let mut pool = pool_over(&[11.0, 13.0]);
        let assigned = pool.assign_sequence(number(10.0), 4);
        let values: Vec<f64> = assigned.iter().map(ChannelNumber::value).collect();
        assert_eq!(values, vec![10.0, 12.0, 14.0, 15.0]);
    }

    #[test]
    fn assign_sequence_supports_fractional_bases() {
        let mut pool = pool_over(&[]);
        let assigned = pool.assign_sequence(number(1.5), 3);
        let values: Vec<f64> = assigned.iter().map(ChannelNumber::value).collect();
        assert_eq!(values, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn unreserve_frees_a_number_for_reassignment() {
        let mut pool = pool_over(&[4.0]);
        pool.unreserve(number(4.0));
        assert_eq!(pool.resolve(Some(number(4.0))).expect("freed"), number(4.0));
    }
}
