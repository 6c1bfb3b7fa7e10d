use crate::key::Key;
use crate::node::contact::Contact;
use crate::{REPLICATION_PARAM, ROUTING_TABLE_SIZE};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A k-bucket in a node's routing table that has a maximum capacity of `REPLICATION_PARAM`.
///
/// The contacts in the k-bucket are sorted by the time of the most recent communication with
/// those which have been most recently communicated at the end of the list.
#[derive(Clone, Debug)]
struct RoutingBucket {
    contacts: Vec<Contact>,
    last_update_time: Instant,
}

impl RoutingBucket {
    /// Constructs a new, empty `RoutingBucket`.
    fn new() -> Self {
        RoutingBucket {
            contacts: Vec::with_capacity(REPLICATION_PARAM),
            last_update_time: Instant::now(),
        }
    }

    /// Moves the contact with the same id as `contact` to the end of the list, replacing the
    /// stored address. Returns `false` if no such contact exists.
    fn refresh(&mut self, contact: Contact) -> bool {
        match self.position(&contact.id) {
            Some(index) => {
                self.contacts.remove(index);
                self.contacts.push(contact);
                self.last_update_time = Instant::now();
                true
            },
            None => false,
        }
    }

    /// Appends `contact` if there is room. Returns `false` if the bucket is full.
    fn insert(&mut self, contact: Contact) -> bool {
        if self.is_full() {
            return false;
        }
        self.contacts.push(contact);
        self.last_update_time = Instant::now();
        true
    }

    fn position(&self, id: &Key) -> Option<usize> {
        self.contacts.iter().position(|contact| contact.id == *id)
    }

    fn get(&self, id: &Key) -> Option<&Contact> {
        self.contacts.iter().find(|contact| contact.id == *id)
    }

    /// Returns the least recently seen contact.
    fn lrs(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    /// Removes the contact with `id` from the routing bucket.
    fn remove(&mut self, id: &Key) -> Option<Contact> {
        self.position(id).map(|index| self.contacts.remove(index))
    }

    fn get_contacts(&self) -> &[Contact] {
        self.contacts.as_slice()
    }

    fn is_full(&self) -> bool {
        self.contacts.len() >= REPLICATION_PARAM
    }

    /// Returns `true` if the routing bucket has not been updated in `interval`.
    fn is_stale(&self, interval: Duration) -> bool {
        self.last_update_time.elapsed() > interval
    }

    fn size(&self) -> usize {
        self.contacts.len()
    }
}

/// The outcome of offering a contact to the routing table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateResult {
    /// The contact was refreshed or inserted.
    Updated,
    /// The bucket is full. The least recently seen contact must be probed before the new contact
    /// can be admitted through `resolve_pending`.
    Pending(Contact),
    /// The contact is the local node.
    Ignored,
}

/// A node's routing table.
///
/// `RoutingTable` holds exactly `ROUTING_TABLE_SIZE` buckets. Bucket `i` holds contacts that share
/// `ROUTING_TABLE_SIZE - 1 - i` leading bits with the local id, so bucket 0 is the closest band.
/// Every bucket has its own lock so that updates to unrelated bands never contend, and no lock is
/// ever held across a network call.
#[derive(Debug)]
pub struct RoutingTable {
    buckets: Vec<Mutex<RoutingBucket>>,
    id: Key,
}

impl RoutingTable {
    /// Constructs a new, empty `RoutingTable`.
    pub fn new(id: Key) -> Self {
        let buckets = (0..ROUTING_TABLE_SIZE)
            .map(|_| Mutex::new(RoutingBucket::new()))
            .collect();
        RoutingTable { buckets, id }
    }

    /// Returns the index of the bucket `id` belongs to. The local id itself maps to bucket 0.
    pub fn bucket_index(&self, id: &Key) -> usize {
        let prefix_len = self.id.shared_prefix_len(id);
        if prefix_len >= ROUTING_TABLE_SIZE {
            0
        } else {
            ROUTING_TABLE_SIZE - 1 - prefix_len
        }
    }

    fn bucket(&self, index: usize) -> MutexGuard<RoutingBucket> {
        match self.buckets[index].lock() {
            Ok(bucket) => bucket,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Upserts a contact into its bucket. A known contact is moved to the most recently seen
    /// position, a new contact is appended if there is room. Otherwise the least recently seen
    /// contact is returned so that the caller can probe it without holding the bucket lock.
    pub fn update(&self, contact: Contact) -> UpdateResult {
        if contact.id == self.id {
            return UpdateResult::Ignored;
        }
        let mut bucket = self.bucket(self.bucket_index(&contact.id));
        if bucket.refresh(contact.clone()) || bucket.insert(contact) {
            return UpdateResult::Updated;
        }
        match bucket.lrs() {
            Some(lrs) => UpdateResult::Pending(lrs.clone()),
            None => UpdateResult::Updated,
        }
    }

    /// Finishes an update that returned `UpdateResult::Pending`. If `lrs` answered its probe it is
    /// kept and `candidate` is dropped. Otherwise `lrs` is evicted and `candidate` takes its place.
    /// Returns `true` if `candidate` was admitted.
    pub fn resolve_pending(&self, lrs: &Contact, candidate: Contact, lrs_alive: bool) -> bool {
        let mut bucket = self.bucket(self.bucket_index(&candidate.id));
        if bucket.get(&candidate.id).is_some() {
            return bucket.refresh(candidate);
        }
        if lrs_alive {
            return false;
        }
        bucket.remove(&lrs.id);
        bucket.insert(candidate)
    }

    /// Returns up to `count` known contacts close to `key`, ordered by distance.
    ///
    /// The search starts at the bucket `key` falls in and widens outward one band at a time in
    /// both directions until enough contacts are gathered, so the result approximates the closest
    /// known contacts without scanning the whole table.
    pub fn closest(&self, key: &Key, count: usize) -> Vec<Contact> {
        let index = self.bucket_index(key);
        let mut ret = Vec::new();
        ret.extend_from_slice(self.bucket(index).get_contacts());

        let mut offset = 1;
        while ret.len() < count && (offset <= index || index + offset < ROUTING_TABLE_SIZE) {
            if offset <= index {
                ret.extend_from_slice(self.bucket(index - offset).get_contacts());
            }
            if index + offset < ROUTING_TABLE_SIZE {
                ret.extend_from_slice(self.bucket(index + offset).get_contacts());
            }
            offset += 1;
        }

        ret.sort_by_key(|contact| contact.distance(key));
        ret.truncate(count);
        ret
    }

    /// Returns the contact with `id` if it is in the routing table.
    pub fn find(&self, id: &Key) -> Option<Contact> {
        self.bucket(self.bucket_index(id)).get(id).cloned()
    }

    /// Removes the contact with `id` from the routing table.
    pub fn remove(&self, id: &Key) -> Option<Contact> {
        self.bucket(self.bucket_index(id)).remove(id)
    }

    /// Returns the stale buckets no closer than the nearest non-empty bucket. Buckets below it are
    /// nearly always empty for lack of peers, not for lack of lookups.
    pub fn stale_indexes(&self, interval: Duration) -> Vec<usize> {
        let nearest = match (0..ROUTING_TABLE_SIZE).find(|&i| self.bucket(i).size() > 0) {
            Some(nearest) => nearest,
            None => return Vec::new(),
        };
        (nearest..ROUTING_TABLE_SIZE)
            .filter(|&i| self.bucket(i).is_stale(interval))
            .collect()
    }

    /// Returns the number of contacts in bucket `index`.
    pub fn bucket_size(&self, index: usize) -> usize {
        self.bucket(index).size()
    }

    /// Returns the number of contacts in the routing table.
    pub fn size(&self) -> usize {
        (0..ROUTING_TABLE_SIZE).map(|i| self.bucket_size(i)).sum()
    }
}
