//! Iterative `FIND_NODE` and `FIND_VALUE` lookups, and the store path built on them.

use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::contact::Contact;
use crate::node::{check_value_length, Node};
use crate::protocol::ResponsePayload;
use crate::REPLICATION_PARAM;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LookupMode {
    FindNode,
    FindValue,
}

/// The outcome of an iterative lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResult {
    /// The closest live contacts found, ordered by distance to the target.
    Nodes(Vec<Contact>),
    /// A value and the contact that returned it.
    Value(Vec<u8>, Contact),
}

#[derive(Debug)]
struct Candidate {
    contact: Contact,
    queried: bool,
}

/// The working set of a single lookup.
///
/// Candidates are keyed by their distance to the target, which is unique per id, so iteration
/// runs from the closest candidate to the farthest. At most `REPLICATION_PARAM` candidates are
/// retained. Ids that have been probed are remembered even after their candidate is dropped, so
/// no contact is ever probed twice. Only contacts that answered a probe make it into the result.
#[derive(Debug)]
struct Shortlist {
    target: Key,
    candidates: BTreeMap<Key, Candidate>,
    probed: HashSet<Key>,
    responded: BTreeMap<Key, Contact>,
    closest_distance: Key,
}

impl Shortlist {
    fn new(target: Key) -> Self {
        Shortlist {
            target,
            candidates: BTreeMap::new(),
            probed: HashSet::new(),
            responded: BTreeMap::new(),
            closest_distance: Key::new([0xFF; crate::KEY_LENGTH]),
        }
    }

    /// Offers a contact to the shortlist. It is retained if it is unknown and either the
    /// shortlist has room or it is closer than the farthest retained candidate. Returns `true` if
    /// it is closer than every contact seen so far.
    fn offer(&mut self, contact: Contact) -> bool {
        let distance = contact.distance(&self.target);
        if self.probed.contains(&contact.id) || self.candidates.contains_key(&distance) {
            return false;
        }
        if self.candidates.len() >= REPLICATION_PARAM {
            let farthest = match self.candidates.keys().next_back() {
                Some(farthest) => *farthest,
                None => return false,
            };
            if distance >= farthest {
                return false;
            }
            self.candidates.remove(&farthest);
        }
        self.candidates.insert(
            distance,
            Candidate {
                contact,
                queried: false,
            },
        );
        if distance < self.closest_distance {
            self.closest_distance = distance;
            true
        } else {
            false
        }
    }

    /// Returns up to `count` of the closest unqueried candidates and marks them as queried.
    fn next_round(&mut self, count: usize) -> Vec<Contact> {
        let mut ret = Vec::new();
        for candidate in self.candidates.values_mut() {
            if ret.len() >= count {
                break;
            }
            if !candidate.queried {
                candidate.queried = true;
                self.probed.insert(candidate.contact.id);
                ret.push(candidate.contact.clone());
            }
        }
        ret
    }

    /// Drops a contact from consideration.
    fn remove(&mut self, contact: &Contact) {
        self.candidates.remove(&contact.distance(&self.target));
    }

    /// Records that a probed contact answered.
    fn responded(&mut self, contact: Contact) {
        self.responded.insert(contact.distance(&self.target), contact);
    }

    fn has_unqueried(&self) -> bool {
        self.candidates.values().any(|candidate| !candidate.queried)
    }

    /// Returns the closest contacts that answered, ordered by distance.
    fn into_contacts(self) -> Vec<Contact> {
        self.responded
            .into_iter()
            .take(REPLICATION_PARAM)
            .map(|(_, contact)| contact)
            .collect()
    }
}

type ProbeResult = (Contact, Result<ResponsePayload>);

impl Node {
    /// Spawns a thread that sends either a `FIND_NODE` or a `FIND_VALUE` RPC and reports the
    /// outcome on `sender`.
    fn spawn_probe(&self, dest: Contact, key: Key, sender: Sender<ProbeResult>, mode: LookupMode) {
        let node = self.clone();
        thread::spawn(move || {
            let result = match mode {
                LookupMode::FindNode => node
                    .rpc_find_node(&dest, &key)
                    .map(ResponsePayload::Nodes),
                LookupMode::FindValue => node.rpc_find_value(&dest, &key),
            };
            if sender.send((dest, result)).is_err() {
                warn!("{} - Lookup finished before rpc returned.", node.addr());
            }
        });
    }

    /// Iteratively looks up the closest nodes to `key`, or a value stored under `key`.
    ///
    /// The shortlist is seeded with the `concurrency` closest contacts from the routing table.
    /// Each round probes up to `concurrency` unqueried candidates in parallel and waits for all of
    /// them or for the lookup deadline. Responses feed new candidates back into the shortlist;
    /// contacts that fail are dropped. The result holds the closest contacts that answered.
    ///
    /// The lookup ends when a round brings no contact closer than the closest seen so far, when
    /// no unqueried candidates remain, or at the deadline. In `FindValue` mode the first value
    /// received ends the lookup.
    ///
    /// Probes still outstanding when the lookup ends report into a closed channel and are
    /// discarded.
    fn lookup(&self, key: &Key, mode: LookupMode) -> LookupResult {
        let deadline = Instant::now() + self.config.lookup_timeout();
        let concurrency = self.config.concurrency.max(1);

        let mut shortlist = Shortlist::new(*key);
        for contact in self
            .closest_known(key, REPLICATION_PARAM)
            .into_iter()
            .take(concurrency)
        {
            shortlist.offer(contact);
        }

        let (tx, rx) = channel();
        let mut round = 0;

        loop {
            let probes = shortlist.next_round(concurrency);
            if probes.is_empty() {
                break;
            }
            round += 1;
            let mut outstanding = probes.len();
            for dest in probes {
                self.spawn_probe(dest, *key, tx.clone(), mode);
            }

            let mut improved = false;
            let mut timed_out = false;
            while outstanding > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let (dest, result) = match rx.recv_timeout(remaining) {
                    Ok(probe_result) => probe_result,
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                        timed_out = true;
                        break;
                    },
                };
                outstanding -= 1;

                match result {
                    Ok(ResponsePayload::Value(value)) if mode == LookupMode::FindValue => {
                        debug!(
                            "{} - Found value for {:?} at {} in round {}",
                            self.addr(),
                            key,
                            dest,
                            round
                        );
                        return LookupResult::Value(value, dest);
                    },
                    Ok(ResponsePayload::Nodes(nodes)) => {
                        shortlist.responded(dest);
                        for contact in nodes {
                            if contact.id != self.contact.id && shortlist.offer(contact) {
                                improved = true;
                            }
                        }
                    },
                    Ok(payload) => {
                        warn!("{} - Dropping {} after {:?}", self.addr(), dest, payload);
                        shortlist.remove(&dest);
                    },
                    Err(err) => {
                        debug!("{} - Dropping {}: {}", self.addr(), dest, err);
                        shortlist.remove(&dest);
                    },
                }
            }

            debug!(
                "{} - Round {} for {:?}: closest distance {:?}",
                self.addr(),
                round,
                key,
                shortlist.closest_distance
            );
            if timed_out {
                warn!(
                    "{} - Lookup for {:?} hit its deadline after {} rounds",
                    self.addr(),
                    key,
                    round
                );
                break;
            }
            if !improved || !shortlist.has_unqueried() {
                break;
            }
        }

        let contacts = shortlist.into_contacts();
        debug!(
            "{} - Lookup for {:?} terminated after {} rounds with {} contacts",
            self.addr(),
            key,
            round,
            contacts.len()
        );
        LookupResult::Nodes(contacts)
    }

    /// Iteratively looks up the closest nodes to `key`, ordered by distance.
    pub fn lookup_nodes(&self, key: &Key) -> Vec<Contact> {
        match self.lookup(key, LookupMode::FindNode) {
            LookupResult::Nodes(nodes) => nodes,
            LookupResult::Value(..) => Vec::new(),
        }
    }

    /// Gets the value associated with `key` in the DHT together with the contact that returned it.
    /// A value held by this node is returned without any network activity.
    pub fn find_value(&self, key: &Key) -> Result<(Vec<u8>, Contact)> {
        if let Ok(value) = self.local_find_value(key) {
            debug!("{} - Found value for {:?} locally", self.addr(), key);
            return Ok((value, self.contact()));
        }
        match self.lookup(key, LookupMode::FindValue) {
            LookupResult::Value(value, contact) => Ok((value, contact)),
            LookupResult::Nodes(_) => Err(Error::NotFound(*key)),
        }
    }

    /// Inserts a key-value pair into the DHT on the `concurrency` closest nodes to `key`. Returns
    /// the contacts that acknowledged the store, or `Error::Transport` if none did.
    pub fn store(&self, key: Key, value: &[u8]) -> Result<Vec<Contact>> {
        check_value_length(value)?;
        let concurrency = self.config.concurrency.max(1);
        let targets: Vec<Contact> = self
            .lookup_nodes(&key)
            .into_iter()
            .take(concurrency)
            .collect();

        let (tx, rx) = channel();
        for dest in &targets {
            let node = self.clone();
            let dest = dest.clone();
            let value = value.to_vec();
            let tx = tx.clone();
            thread::spawn(move || {
                let result = node.rpc_store(&dest, key, value);
                if tx.send((dest, result)).is_err() {
                    warn!("{} - Store finished before rpc returned.", node.addr());
                }
            });
        }
        drop(tx);

        let mut stored = Vec::new();
        for (dest, result) in rx.iter() {
            match result {
                Ok(()) => stored.push(dest),
                Err(err) => warn!(
                    "{} - Could not store {:?} on {}: {}",
                    self.addr(),
                    key,
                    dest,
                    err
                ),
            }
        }
        stored.sort_by_key(|contact| contact.distance(&key));

        if stored.is_empty() {
            return Err(Error::Transport(format!("no node accepted {:?}", key)));
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::Shortlist;
    use crate::key::Key;
    use crate::node::contact::Contact;
    use crate::{KEY_LENGTH, REPLICATION_PARAM};

    fn contact_at(distance: u8) -> Contact {
        let mut id = [0; KEY_LENGTH];
        id[KEY_LENGTH - 1] = distance;
        Contact::new(Key::new(id), "127.0.0.1:9000".parse().unwrap())
    }

    #[test]
    fn test_offer_tracks_closest_distance() {
        let mut shortlist = Shortlist::new(Key::default());
        assert!(shortlist.offer(contact_at(50)));
        assert!(!shortlist.offer(contact_at(60)));
        assert!(shortlist.offer(contact_at(40)));
        assert!(!shortlist.offer(contact_at(40)));
        assert_eq!(shortlist.candidates.len(), 3);
    }

    #[test]
    fn test_retains_closest() {
        let mut shortlist = Shortlist::new(Key::default());
        for distance in (1..=2 * REPLICATION_PARAM as u8).rev() {
            shortlist.offer(contact_at(distance));
        }
        assert_eq!(shortlist.candidates.len(), REPLICATION_PARAM);
        for (i, candidate) in shortlist.candidates.values().enumerate() {
            assert_eq!(candidate.contact.id, contact_at(i as u8 + 1).id);
        }
    }

    #[test]
    fn test_rejects_farther_when_full() {
        let mut shortlist = Shortlist::new(Key::default());
        for distance in 1..=REPLICATION_PARAM as u8 {
            shortlist.offer(contact_at(distance));
        }
        assert!(!shortlist.offer(contact_at(200)));
        assert_eq!(shortlist.candidates.len(), REPLICATION_PARAM);
        assert!(shortlist
            .candidates
            .values()
            .all(|candidate| candidate.contact.id != contact_at(200).id));
    }

    #[test]
    fn test_next_round_never_repeats() {
        let mut shortlist = Shortlist::new(Key::default());
        for distance in 1..=5 {
            shortlist.offer(contact_at(distance));
        }
        let first = shortlist.next_round(3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].id, contact_at(1).id);
        let second = shortlist.next_round(3);
        assert_eq!(second.len(), 2);
        assert!(!shortlist.has_unqueried());
        assert!(shortlist.next_round(3).is_empty());
    }

    #[test]
    fn test_removed_contact_is_not_readmitted() {
        let mut shortlist = Shortlist::new(Key::default());
        shortlist.offer(contact_at(1));
        let probed = shortlist.next_round(1);
        shortlist.remove(&probed[0]);
        assert!(!shortlist.offer(contact_at(1)));
        assert!(shortlist.candidates.is_empty());
        assert!(shortlist.into_contacts().is_empty());
    }

    #[test]
    fn test_result_holds_only_responders() {
        let mut shortlist = Shortlist::new(Key::default());
        for distance in 1..=4 {
            shortlist.offer(contact_at(distance));
        }
        let probed = shortlist.next_round(3);
        shortlist.responded(probed[2].clone());
        shortlist.responded(probed[0].clone());
        shortlist.remove(&probed[1]);

        let ids: Vec<Key> = shortlist.into_contacts().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![contact_at(1).id, contact_at(3).id]);
    }
}
