pub mod contact;
pub mod lookup;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::contact::Contact;
use crate::protocol::{Message, Request, RequestPayload, Response, ResponsePayload};
use crate::routing::{RoutingTable, UpdateResult};
use crate::storage::Storage;
use crate::transport::{Transport, UdpTransport};
use crate::{MAX_VALUE_LENGTH, REPLICATION_PARAM, ROUTING_TABLE_SIZE};

/// A node in the Kademlia DHT.
#[derive(Clone)]
pub struct Node {
    contact: Arc<Contact>,
    config: Arc<Config>,
    routing_table: Arc<RoutingTable>,
    storage: Arc<Mutex<Storage>>,
    transport: Arc<dyn Transport>,
    is_active: Arc<AtomicBool>,
}

impl Node {
    /// Constructs a new `Node` listening for UDP datagrams on `config.bind_addr`, and bootstraps
    /// the node with an existing node if `bootstrap` is not `None`.
    pub fn new(config: Config, bootstrap: Option<Contact>) -> Result<Self> {
        let (transport, message_rx) =
            UdpTransport::bind(&config.bind_addr, config.request_timeout())?;
        let contact = Contact::new(Key::rand(), transport.local_addr()?);
        let transport = Arc::new(transport);
        let node = Node::with_transport(
            contact,
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        node.start_message_handler(message_rx, transport);
        node.start_bucket_refresher();

        if let Some(bootstrap_contact) = bootstrap {
            if let Err(err) = node.bootstrap(&bootstrap_contact) {
                node.kill();
                return Err(err);
            }
        }
        Ok(node)
    }

    /// Constructs a `Node` with identity `contact` that reaches its peers through `transport`.
    /// No background threads are started.
    pub fn with_transport(contact: Contact, config: Config, transport: Arc<dyn Transport>) -> Self {
        Node {
            routing_table: Arc::new(RoutingTable::new(contact.id)),
            contact: Arc::new(contact),
            config: Arc::new(config),
            storage: Arc::new(Mutex::new(Storage::new())),
            transport,
            is_active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Starts a thread that answers requests and routes responses to their callers.
    fn start_message_handler(
        &self,
        rx: Receiver<(Message, SocketAddr)>,
        transport: Arc<UdpTransport>,
    ) {
        let node = self.clone();
        thread::spawn(move || {
            for (message, src_addr) in rx.iter() {
                match message {
                    Message::Request(request) => {
                        let response = node.handle_request(&request);
                        if let Err(err) = transport.reply(response, src_addr) {
                            warn!("{} - Could not reply to {}: {}", node.addr(), src_addr, err);
                        }
                    },
                    Message::Response(response) => transport.resolve(response),
                    Message::Kill if src_addr == node.addr() => {
                        node.is_active.store(false, Ordering::Release);
                        info!("{} - Killed message handler", node.addr());
                        break;
                    },
                    Message::Kill => {
                        warn!("{} - Ignored kill message from {}", node.addr(), src_addr);
                    },
                }
            }
        });
    }

    /// Starts a thread that refreshes stale routing buckets by looking up a random key in each of
    /// their ranges.
    fn start_bucket_refresher(&self) {
        let node = self.clone();
        thread::spawn(move || {
            let interval = node.config.bucket_refresh_interval();
            thread::sleep(interval);
            while node.is_active() {
                for index in node.routing_table.stale_indexes(interval) {
                    node.lookup_nodes(&node.random_key_in_bucket(index));
                }
                thread::sleep(interval);
            }
            warn!("{} - Killed bucket refresher", node.addr());
        });
    }

    /// Returns a random key that falls in bucket `index` of this node's routing table.
    fn random_key_in_bucket(&self, index: usize) -> Key {
        self.contact
            .id
            .xor(&Key::rand_in_range(ROUTING_TABLE_SIZE - 1 - index))
    }

    /// Bootstraps the routing table using an existing node. The node first pings `contact` so
    /// that it enters the routing table, then looks up its own id to discover its neighbours.
    pub fn bootstrap(&self, contact: &Contact) -> Result<()> {
        self.ping(contact.addr())?;
        let neighbours = self.lookup_nodes(&self.contact.id);
        info!(
            "{} - Bootstrapped through {} with {} neighbours",
            self.addr(),
            contact,
            neighbours.len()
        );
        Ok(())
    }

    /// Records that `contact` is alive. If its bucket is full, the least recently seen contact is
    /// pinged on a separate thread and evicted in favour of `contact` only if it does not answer.
    pub(crate) fn observe(&self, contact: Contact) {
        if let UpdateResult::Pending(lrs) = self.routing_table.update(contact.clone()) {
            debug!(
                "{} - Bucket full, probing {} before admitting {}",
                self.addr(),
                lrs,
                contact
            );
            let node = self.clone();
            thread::spawn(move || {
                let lrs_alive = node.ping_contact(&lrs).is_ok();
                if node.routing_table.resolve_pending(&lrs, contact.clone(), lrs_alive) {
                    debug!("{} - Evicted {} for {}", node.addr(), lrs, contact);
                }
            });
        }
    }

    /// Handles a request RPC and returns the response to send back.
    pub fn handle_request(&self, request: &Request) -> Response {
        info!(
            "{} - Receiving request from {} {:?}",
            self.addr(),
            request.sender,
            request.payload,
        );
        self.observe(request.sender.clone());
        let payload = match &request.payload {
            RequestPayload::Ping => ResponsePayload::Pong,
            RequestPayload::Store(key, value) => {
                if value.len() > MAX_VALUE_LENGTH {
                    ResponsePayload::Failed(format!(
                        "value of {} bytes exceeds {} bytes",
                        value.len(),
                        MAX_VALUE_LENGTH
                    ))
                } else {
                    self.local_store(*key, value.clone());
                    ResponsePayload::Stored
                }
            },
            RequestPayload::FindNode(key) => {
                ResponsePayload::Nodes(self.closest_known(key, REPLICATION_PARAM))
            },
            RequestPayload::FindValue(key) => match self.local_find_value(key) {
                Ok(value) => ResponsePayload::Value(value),
                Err(_) => ResponsePayload::Nodes(self.closest_known(key, REPLICATION_PARAM)),
            },
        };
        Response::new(request, self.contact(), payload)
    }

    /// Sends a request RPC to `addr`. If the id of the destination is known it is passed as
    /// `expected` and the responder must carry it.
    ///
    /// A valid response marks the responder as alive. A failed call never does. If the peer could
    /// not be reached, the expected contact is also removed from the routing table.
    fn send_request(
        &self,
        addr: SocketAddr,
        expected: Option<&Key>,
        payload: RequestPayload,
    ) -> Result<Response> {
        info!("{} - Sending request to {} {:?}", self.addr(), addr, payload);
        let request = Request::new(self.contact(), payload);
        let result = self
            .transport
            .call(addr, &request)
            .and_then(|response| validate(&request, expected, response));

        match result {
            Ok(response) => {
                info!(
                    "{} - Receiving response from {} {:?}",
                    self.addr(),
                    response.sender,
                    response.payload,
                );
                self.observe(response.sender.clone());
                Ok(response)
            },
            Err(err) => {
                warn!("{} - Request to {} failed: {}", self.addr(), addr, err);
                if let Some(id) = expected.filter(|_| err.is_unreachable()) {
                    self.routing_table.remove(id);
                }
                Err(err)
            },
        }
    }

    /// Sends a `PING` RPC to `addr` and returns the contact that answered.
    pub fn ping(&self, addr: SocketAddr) -> Result<Contact> {
        self.send_request(addr, None, RequestPayload::Ping)
            .map(|response| response.sender)
    }

    fn ping_contact(&self, dest: &Contact) -> Result<()> {
        self.send_request(dest.addr(), Some(&dest.id), RequestPayload::Ping)
            .map(|_| ())
    }

    /// Sends a `STORE` RPC.
    pub fn rpc_store(&self, dest: &Contact, key: Key, value: Vec<u8>) -> Result<()> {
        check_value_length(&value)?;
        let response =
            self.send_request(dest.addr(), Some(&dest.id), RequestPayload::Store(key, value))?;
        match response.payload {
            ResponsePayload::Stored => Ok(()),
            ResponsePayload::Failed(err) => Err(Error::Remote(err)),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends a `FIND_NODE` RPC.
    pub fn rpc_find_node(&self, dest: &Contact, key: &Key) -> Result<Vec<Contact>> {
        let response =
            self.send_request(dest.addr(), Some(&dest.id), RequestPayload::FindNode(*key))?;
        match response.payload {
            ResponsePayload::Nodes(nodes) => Ok(nodes),
            ResponsePayload::Failed(err) => Err(Error::Remote(err)),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends a `FIND_VALUE` RPC. The payload is either `ResponsePayload::Value` or
    /// `ResponsePayload::Nodes`.
    pub fn rpc_find_value(&self, dest: &Contact, key: &Key) -> Result<ResponsePayload> {
        let response =
            self.send_request(dest.addr(), Some(&dest.id), RequestPayload::FindValue(*key))?;
        match response.payload {
            ResponsePayload::Failed(err) => Err(Error::Remote(err)),
            payload => Ok(payload),
        }
    }

    /// Returns the contact with `id`, which is this node's own contact if `id` is its id.
    pub fn find_contact(&self, id: &Key) -> Result<Contact> {
        if *id == self.contact.id {
            return Ok(self.contact());
        }
        self.routing_table.find(id).ok_or(Error::NotFound(*id))
    }

    /// Returns up to `count` contacts from the routing table close to `key`, ordered by distance.
    pub fn closest_known(&self, key: &Key, count: usize) -> Vec<Contact> {
        self.routing_table.closest(key, count)
    }

    /// Returns the number of contacts in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table.size()
    }

    fn storage(&self) -> MutexGuard<Storage> {
        match self.storage.lock() {
            Ok(storage) => storage,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores a key-value pair on this node only.
    pub fn local_store(&self, key: Key, value: Vec<u8>) {
        let mut storage = self.storage();
        storage.insert(key, value);
        debug!("{} - Holding {} values", self.addr(), storage.len());
    }

    /// Returns the value stored on this node under `key`, without any network activity.
    pub fn local_find_value(&self, key: &Key) -> Result<Vec<u8>> {
        self.storage().get(key).cloned().ok_or(Error::NotFound(*key))
    }

    /// Returns the `Contact` associated with the node.
    pub fn contact(&self) -> Contact {
        (*self.contact).clone()
    }

    pub fn id(&self) -> Key {
        self.contact.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.contact.addr()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    /// Kills the current node and all active threads, and takes it off the network.
    pub fn kill(&self) {
        self.is_active.store(false, Ordering::Release);
        self.transport.shutdown(self.addr());
    }
}

/// Checks that `response` answers `request`: the correlation id is echoed, the responder is the
/// expected node, and the payload kind fits the request.
fn validate(request: &Request, expected: Option<&Key>, response: Response) -> Result<Response> {
    if response.msg_id != request.msg_id {
        return Err(Error::Malformed(format!(
            "response {:?} does not answer request {:?}",
            response.msg_id, request.msg_id
        )));
    }
    if let Some(id) = expected {
        if response.sender.id != *id {
            return Err(Error::Malformed(format!(
                "expected response from {:?}, got {:?}",
                id, response.sender.id
            )));
        }
    }
    if !request.payload.accepts(&response.payload) {
        return Err(unexpected(&response.payload));
    }
    Ok(response)
}

/// Rejects values that no node would accept in a `STORE` RPC.
pub(crate) fn check_value_length(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(Error::InvalidParameters(format!(
            "value of {} bytes exceeds {} bytes",
            value.len(),
            MAX_VALUE_LENGTH
        )));
    }
    Ok(())
}

fn unexpected(payload: &ResponsePayload) -> Error {
    Error::Malformed(format!("unexpected response {:?}", payload))
}

#[cfg(test)]
mod tests {
    use super::{check_value_length, validate};
    use crate::config::Config;
    use crate::key::Key;
    use crate::node::contact::Contact;
    use crate::protocol::{Request, RequestPayload, Response, ResponsePayload};
    use crate::routing::RoutingTable;
    use crate::transport::MemoryNetwork;
    use crate::ROUTING_TABLE_SIZE;
    use std::time::Duration;

    fn contact() -> Contact {
        Contact::new(Key::rand(), "127.0.0.1:9000".parse().unwrap())
    }

    #[test]
    fn test_validate_rejects_mismatched_msg_id() {
        let request = Request::new(contact(), RequestPayload::Ping);
        let mut response = Response::new(&request, contact(), ResponsePayload::Pong);
        response.msg_id = Key::rand();
        assert!(validate(&request, None, response).unwrap_err().is_unreachable());
    }

    #[test]
    fn test_validate_rejects_wrong_responder() {
        let request = Request::new(contact(), RequestPayload::Ping);
        let response = Response::new(&request, contact(), ResponsePayload::Pong);
        assert!(validate(&request, Some(&Key::rand()), response).is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_payload_kind() {
        let request = Request::new(contact(), RequestPayload::FindNode(Key::rand()));
        let response = Response::new(&request, contact(), ResponsePayload::Value(vec![1]));
        assert!(validate(&request, None, response).is_err());

        let request = Request::new(contact(), RequestPayload::FindValue(Key::rand()));
        let responder = contact();
        let response = Response::new(&request, responder.clone(), ResponsePayload::Value(vec![1]));
        assert!(validate(&request, Some(&responder.id), response).is_ok());
    }

    #[test]
    fn test_random_key_in_bucket() {
        let network = MemoryNetwork::new(Duration::from_millis(100));
        let node = network.spawn_node(Config::default());
        let table = RoutingTable::new(node.id());
        for index in 0..ROUTING_TABLE_SIZE {
            assert_eq!(table.bucket_index(&node.random_key_in_bucket(index)), index);
        }
        network.clear();
    }

    #[test]
    fn test_store_rejects_oversized_value() {
        let network = MemoryNetwork::new(Duration::from_millis(100));
        let node = network.spawn_node(Config::default());
        let key = Key::rand();
        let request = Request::new(
            contact(),
            RequestPayload::Store(key, vec![0; crate::MAX_VALUE_LENGTH + 1]),
        );
        match node.handle_request(&request).payload {
            ResponsePayload::Failed(_) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(node.local_find_value(&key).is_err());
        network.clear();
    }

    #[test]
    fn test_check_value_length() {
        assert!(check_value_length(&[0; crate::MAX_VALUE_LENGTH]).is_ok());
        assert!(check_value_length(&[0; crate::MAX_VALUE_LENGTH + 1]).is_err());
    }
}
