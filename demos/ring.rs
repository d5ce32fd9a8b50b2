//! Ring communication example - point-to-point communication.
//!
//! Each rank sends data to the next rank in a ring pattern, first with
//! blocking calls and then with a single send-receive.
//!
//! Run with: cargo run --example ring -- 4

use ferropar::ThreadGroup;

fn main() {
    env_logger::init();
    let ranks = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);
    if ranks < 2 {
        eprintln!("This example requires at least 2 ranks");
        return;
    }

    ThreadGroup::run(ranks, |world| {
        let rank = world.rank();
        let size = world.size();

        // Calculate neighbors in the ring
        let next = (rank + 1) % size;
        let prev = (rank + size - 1) % size;

        let send_data = vec![rank as f64 * 100.0 + 1.0, rank as f64 * 100.0 + 2.0];
        let mut recv_data = vec![0.0; 2];

        println!("Rank {}: sending {:?} to rank {}", rank, send_data, next);
        world.send(&send_data, next, 0);
        let status = world.recv(&mut recv_data, prev, 0);
        println!(
            "Rank {}: received {:?} from rank {} (tag={}, count={})",
            rank,
            recv_data,
            status.source,
            status.tag,
            status.count()
        );

        let expected = vec![prev as f64 * 100.0 + 1.0, prev as f64 * 100.0 + 2.0];
        assert_eq!(recv_data, expected, "Data mismatch!");

        // Same shift, variable length, in one collective step
        let payload: Vec<u32> = (0..=rank as u32).collect();
        let mut incoming = Vec::new();
        world.send_receive(next, &payload, prev, &mut incoming);
        assert_eq!(incoming.len(), prev as usize + 1);

        world.barrier();
        if rank == 0 {
            println!("\nRing communication test passed!");
        }
    });
}
