//! Variable-length gather example.
//!
//! Rank `i` contributes `i + 1` elements, each set to `i * 10`. The root
//! receives the rank-ordered concatenation; everyone then agrees on a summary
//! through an all-gather and a consistency check.
//!
//! Run with: cargo run --example gather -- 4

use ferropar::{Config, ThreadGroup};

fn main() {
    env_logger::init();
    let ranks = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    let config = Config::from_env().with_perf_log(true);
    ThreadGroup::run_with_config(ranks, config, |world| {
        let rank = world.rank();
        let size = world.size();

        // ============================================================
        // Test 1: Variable-length gather to root
        // ============================================================
        {
            let mut data = vec![rank as f64 * 10.0; rank as usize + 1];
            world.gather(&mut data, 0);

            if rank == 0 {
                let expected: Vec<f64> = (0..size)
                    .flat_map(|r| vec![r as f64 * 10.0; r as usize + 1])
                    .collect();
                assert_eq!(data, expected);
                println!("✓ Gather test passed ({} elements)", data.len());
            }
        }

        // ============================================================
        // Test 2: All-gather of one value per rank
        // ============================================================
        {
            let counts = world.allgather_value(&(rank as u64 + 1));
            let total: u64 = counts.iter().sum();
            assert!(world.verify(&total));
            if rank == 0 {
                println!("✓ Allgather test passed (total = {})", total);
            }
        }

        if rank == 0 {
            for (op, stats) in world.op_stats() {
                println!("{op:>12}: {} calls, {:?}", stats.calls, stats.total);
            }
        }
    });
}
