//! Delivery of requests to remote nodes.
//!
//! The node only needs to send a typed request to an address and get a typed response back, or
//! an error if the peer could not be reached in time. `UdpTransport` does this over datagrams,
//! `MemoryNetwork` connects nodes living in the same process.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::contact::Contact;
use crate::node::Node;
use crate::protocol::{Message, Protocol, Request, Response};

pub trait Transport: Send + Sync {
    /// Sends `request` to the node listening on `addr` and waits for its response. Fails with
    /// `Error::Transport` if the peer cannot be reached or does not answer within the transport's
    /// own timeout.
    fn call(&self, addr: SocketAddr, request: &Request) -> Result<Response>;

    /// Takes the node listening on `addr` offline.
    fn shutdown(&self, addr: SocketAddr);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Request/response correlation on top of `Protocol`.
pub struct UdpTransport {
    protocol: Protocol,
    pending_requests: Mutex<HashMap<Key, Sender<Response>>>,
    timeout: Duration,
}

impl UdpTransport {
    /// Binds a socket on `addr`. Every message received on it is delivered to the returned
    /// receiver; the owner must route responses back through `resolve`.
    pub fn bind(addr: &str, timeout: Duration) -> Result<(Self, Receiver<(Message, SocketAddr)>)> {
        let socket = UdpSocket::bind(addr)?;
        let (message_tx, message_rx) = channel();
        let transport = UdpTransport {
            protocol: Protocol::new(socket, message_tx),
            pending_requests: Mutex::new(HashMap::new()),
            timeout,
        };
        Ok((transport, message_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.protocol.local_addr()
    }

    /// Hands `response` to the caller waiting on it. If the id in the response does not match any
    /// outgoing request, the response is ignored.
    pub fn resolve(&self, response: Response) {
        let pending_requests = lock(&self.pending_requests);
        if let Some(sender) = pending_requests.get(&response.msg_id) {
            if sender.send(response).is_err() {
                warn!("Caller stopped waiting before its response arrived.");
            }
        } else {
            warn!(
                "Original request not found; irrelevant response from {} or expired request.",
                response.sender
            );
        }
    }

    /// Sends `response` to `addr`.
    pub fn reply(&self, response: Response, addr: SocketAddr) -> Result<()> {
        self.protocol.send_message(&Message::Response(response), addr)
    }
}

impl Transport for UdpTransport {
    fn call(&self, addr: SocketAddr, request: &Request) -> Result<Response> {
        let (response_tx, response_rx) = channel();
        lock(&self.pending_requests).insert(request.msg_id, response_tx);

        let result = self
            .protocol
            .send_message(&Message::Request(request.clone()), addr)
            .and_then(|_| {
                response_rx.recv_timeout(self.timeout).map_err(|_| {
                    warn!(
                        "Request to {} timed out after waiting for {} milliseconds",
                        addr,
                        self.timeout.as_millis()
                    );
                    Error::Transport(format!("request to {} timed out", addr))
                })
            });

        lock(&self.pending_requests).remove(&request.msg_id);
        result
    }

    fn shutdown(&self, addr: SocketAddr) {
        if let Err(err) = self.protocol.send_message(&Message::Kill, addr) {
            warn!("Could not stop message handler on {}: {}", addr, err);
        }
    }
}

/// An in-process network. Nodes are registered under a loopback address and requests are handled
/// on the caller's thread.
pub struct MemoryNetwork {
    nodes: RwLock<HashMap<SocketAddr, Node>>,
    latencies: RwLock<HashMap<SocketAddr, Duration>>,
    next_port: AtomicU16,
    timeout: Duration,
}

impl MemoryNetwork {
    /// Constructs an empty network whose calls fail after `timeout`.
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(MemoryNetwork {
            nodes: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
            next_port: AtomicU16::new(10000),
            timeout,
        })
    }

    /// Creates a node with a random id and attaches it to the network.
    pub fn spawn_node(self: &Arc<Self>, config: Config) -> Node {
        self.spawn_node_with_id(Key::rand(), config)
    }

    /// Creates a node with `id` and attaches it to the network.
    pub fn spawn_node_with_id(self: &Arc<Self>, id: Key, config: Config) -> Node {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let transport: Arc<dyn Transport> = Arc::clone(self) as Arc<dyn Transport>;
        let node = Node::with_transport(Contact::new(id, addr), config, transport);
        write(&self.nodes).insert(addr, node.clone());
        node
    }

    /// Delays every request delivered to `addr` by `latency`.
    pub fn set_latency(&self, addr: SocketAddr, latency: Duration) {
        write(&self.latencies).insert(addr, latency);
    }

    /// Returns `true` if a node is listening on `addr`.
    pub fn is_online(&self, addr: SocketAddr) -> bool {
        read(&self.nodes).contains_key(&addr)
    }

    /// Detaches every node, which also releases the nodes' references to the network.
    pub fn clear(&self) {
        write(&self.nodes).clear();
    }
}

impl Transport for MemoryNetwork {
    fn call(&self, addr: SocketAddr, request: &Request) -> Result<Response> {
        let node = read(&self.nodes)
            .get(&addr)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("{} is unreachable", addr)))?;

        let latency = read(&self.latencies).get(&addr).cloned();
        if let Some(latency) = latency {
            if latency >= self.timeout {
                thread::sleep(self.timeout);
                return Err(Error::Transport(format!("request to {} timed out", addr)));
            }
            thread::sleep(latency);
        }

        Ok(node.handle_request(request))
    }

    fn shutdown(&self, addr: SocketAddr) {
        write(&self.nodes).remove(&addr);
    }
}
