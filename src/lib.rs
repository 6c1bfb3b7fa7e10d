#[macro_use]
extern crate log;

mod config;
mod error;
mod key;
mod node;
mod protocol;
mod routing;
mod storage;
mod transport;
mod vanish;

pub use self::config::Config;
pub use self::error::{Error, Result};
pub use self::key::Key;
pub use self::node::contact::Contact;
pub use self::node::lookup::LookupResult;
pub use self::node::Node;
pub use self::protocol::{Request, RequestPayload, Response, ResponsePayload};
pub use self::transport::{MemoryNetwork, Transport, UdpTransport};
pub use self::vanish::refresh::VanishHandle;
pub use self::vanish::{share_locations, threshold_for, Vdo};

/// The number of bytes in a key.
pub const KEY_LENGTH: usize = 20;

/// The maximum length of the message in bytes.
const MESSAGE_LENGTH: usize = 8196;

/// The maximum length of a value accepted by a `STORE` RPC.
const MAX_VALUE_LENGTH: usize = 4096;

/// The number of k-buckets in the routing table.
pub const ROUTING_TABLE_SIZE: usize = KEY_LENGTH * 8;

/// The maximum number of entries in a k-bucket.
pub const REPLICATION_PARAM: usize = 20;

/// The maximum number of active RPCs during a lookup round.
pub const CONCURRENCY_PARAM: usize = 3;

/// Request timeout time in milliseconds
const REQUEST_TIMEOUT: u64 = 5000;

/// Deadline of a whole iterative lookup in milliseconds
const LOOKUP_TIMEOUT: u64 = 5000;

/// Bucket refresh interval in seconds
const BUCKET_REFRESH_INTERVAL: u64 = 3600;

/// Fraction of shares needed to reconstruct a vanished key.
pub const DEFAULT_THRESHOLD_RATIO: f64 = 0.5;

/// Idle time in milliseconds before a `VanishHandle` re-disperses its shares.
const VANISH_REFRESH_IDLE: u64 = 3_600_000;
