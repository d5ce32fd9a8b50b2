//! Hello world example - the minimal program.
//!
//! Run with: cargo run --example hello_world -- 4

use ferropar::ThreadGroup;

fn main() {
    env_logger::init();
    let ranks = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    ThreadGroup::run(ranks, |world| {
        println!("Hello from rank {} of {}", world.rank(), world.size());
        world.barrier();
        if world.rank() == 0 {
            println!("All {} ranks said hello", world.size());
        }
    });
}
