use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vanish_dht::{Config, MemoryNetwork, Node};

/// Per-call timeout of test networks.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

pub fn config() -> Config {
    Config {
        lookup_timeout_ms: 2000,
        ..Config::default()
    }
}

/// Spawns `size` nodes on `network` and has every node ping every other one, so each routing table
/// holds the whole network.
pub fn full_mesh(network: &Arc<MemoryNetwork>, size: usize, config: Config) -> Vec<Node> {
    let nodes: Vec<Node> = (0..size)
        .map(|_| network.spawn_node(config.clone()))
        .collect();
    for node in &nodes {
        for other in &nodes {
            if node.id() != other.id() {
                node.ping(other.addr()).unwrap();
            }
        }
    }
    for node in &nodes {
        assert_eq!(node.routing_table_size(), size - 1);
    }
    nodes
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}
