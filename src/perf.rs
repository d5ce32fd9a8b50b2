//! Per-operation performance log.
//!
//! Every public communicator operation runs inside a [`Scope`], which traces
//! entry and exit and, when [`Config::perf_log`](crate::Config::perf_log) is
//! on, adds the call to the communicator's [`PerfLog`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Aggregated statistics for one operation name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    /// Number of completed calls.
    pub calls: u64,
    /// Cumulative wall time across all calls, nested operations included.
    pub total: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct PerfLog {
    stats: Mutex<HashMap<&'static str, OpStats>>,
}

impl PerfLog {
    fn record(&self, op: &'static str, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(op).or_default();
        entry.calls += 1;
        entry.total += elapsed;
    }

    /// Snapshot sorted by operation name.
    pub(crate) fn snapshot(&self) -> Vec<(&'static str, OpStats)> {
        let mut stats: Vec<_> = self.stats.lock().iter().map(|(&op, &s)| (op, s)).collect();
        stats.sort_by_key(|&(op, _)| op);
        stats
    }

    pub(crate) fn clear(&self) {
        self.stats.lock().clear();
    }
}

pub(crate) struct Scope<'a> {
    op: &'static str,
    rank: i32,
    start: Instant,
    log: Option<&'a PerfLog>,
}

impl<'a> Scope<'a> {
    pub(crate) fn enter(op: &'static str, rank: i32, log: Option<&'a PerfLog>) -> Self {
        log::trace!("rank {rank}: enter {op}");
        Scope {
            op,
            rank,
            start: Instant::now(),
            log,
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        log::trace!("rank {}: exit {} after {:?}", self.rank, self.op, elapsed);
        if let Some(log) = self.log {
            log.record(self.op, elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_accumulate_by_name() {
        let log = PerfLog::default();
        for _ in 0..3 {
            let _scope = Scope::enter("sum", 0, Some(&log));
        }
        drop(Scope::enter("barrier", 0, Some(&log)));

        let stats = log.snapshot();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, "barrier");
        assert_eq!(stats[0].1.calls, 1);
        assert_eq!(stats[1].0, "sum");
        assert_eq!(stats[1].1.calls, 3);
    }

    #[test]
    fn disabled_scope_records_nothing() {
        let log = PerfLog::default();
        drop(Scope::enter("sum", 0, None));
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn clear_resets() {
        let log = PerfLog::default();
        drop(Scope::enter("gather", 1, Some(&log)));
        log.clear();
        assert!(log.snapshot().is_empty());
    }
}
