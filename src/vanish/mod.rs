//! Self-destructing data on top of the DHT.
//!
//! A payload is encrypted under a fresh content key, and the key is split into threshold shares
//! that are stored at locations derived from a random access key. The data can be read back only
//! while enough shares survive in the network; churn and expiry make it vanish.

pub mod cipher;
pub mod refresh;
mod sss;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::TryInto;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::Node;
use crate::KEY_LENGTH;

use self::cipher::CONTENT_KEY_LENGTH;
use self::sss::Share;

/// A vanishing data object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vdo {
    /// The capability that locates the shares. It is never serialized with the object and must be
    /// handed over separately.
    #[serde(skip)]
    pub access_key: i64,
    pub ciphertext: Vec<u8>,
    pub number_keys: u8,
    pub threshold: u8,
}

/// Returns the number of shares out of `number_keys` needed to reconstruct, `round(ratio * n)`
/// clamped to `[1, n]`.
pub fn threshold_for(number_keys: u8, ratio: f64) -> Result<u8> {
    if number_keys == 0 {
        return Err(Error::InvalidParameters("at least one share is needed".to_string()));
    }
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(Error::InvalidParameters(format!(
            "threshold ratio {} must be in (0, 1]",
            ratio
        )));
    }
    let threshold = (ratio * f64::from(number_keys)).round() as u8;
    Ok(threshold.max(1).min(number_keys))
}

/// Derives the `count` storage locations of an access key. The same access key always yields the
/// same locations in the same order.
pub fn share_locations(access_key: i64, count: usize) -> Vec<Key> {
    let mut rng = ChaCha20Rng::seed_from_u64(access_key as u64);
    (0..count)
        .map(|_| {
            let mut id = [0u8; KEY_LENGTH];
            rng.fill_bytes(&mut id);
            Key::new(id)
        })
        .collect()
}

fn encode_share(share: &Share) -> Vec<u8> {
    let mut ret = Vec::with_capacity(1 + share.y.len());
    ret.push(share.x);
    ret.extend_from_slice(&share.y);
    ret
}

/// Parses a stored share. Empty values are tombstones left by a refresh.
fn decode_share(bytes: &[u8]) -> Option<Share> {
    match bytes.split_first() {
        Some((&x, y)) if x != 0 && y.len() == CONTENT_KEY_LENGTH => {
            Some(Share { x, y: y.to_vec() })
        },
        _ => None,
    }
}

impl Node {
    /// Encrypts `payload` and disperses the key in `number_keys` shares, `round(threshold_ratio *
    /// number_keys)` of which are needed to read it back. Returns the access key and the object.
    ///
    /// Fails with `Error::InsufficientShares` if fewer shares than the threshold could be stored.
    pub fn vanish(
        &self,
        payload: &[u8],
        number_keys: u8,
        threshold_ratio: f64,
    ) -> Result<(i64, Vdo)> {
        let threshold = threshold_for(number_keys, threshold_ratio)?;
        let content_key = cipher::generate_key();
        let ciphertext = cipher::encrypt(&content_key, payload)?;
        let shares = sss::split(&content_key, number_keys, threshold, &mut rand::thread_rng())?;

        let access_key: i64 = rand::random();
        let locations = share_locations(access_key, shares.len());

        let mut stored = 0;
        for (share, location) in shares.iter().zip(&locations) {
            match self.store(*location, &encode_share(share)) {
                Ok(contacts) => {
                    debug!(
                        "{} - Share {} stored at {:?} on {} nodes",
                        self.addr(),
                        share.x,
                        location,
                        contacts.len()
                    );
                    stored += 1;
                },
                Err(err) => warn!("{} - Could not store share {}: {}", self.addr(), share.x, err),
            }
        }

        if stored < threshold as usize {
            return Err(Error::InsufficientShares {
                found: stored,
                threshold: threshold as usize,
            });
        }
        info!(
            "{} - Vanished {} bytes into {} shares, {} needed",
            self.addr(),
            payload.len(),
            stored,
            threshold
        );

        let vdo = Vdo {
            access_key,
            ciphertext,
            number_keys,
            threshold,
        };
        Ok((access_key, vdo))
    }

    /// Recovers the payload of `vdo` by fetching `vdo.threshold` shares from the locations of
    /// `access_key`.
    ///
    /// Fails with `Error::InsufficientShares` if fewer shares can be found. A payload is only ever
    /// returned if it authenticates under the reconstructed key.
    pub fn unvanish(&self, vdo: &Vdo, access_key: i64) -> Result<Vec<u8>> {
        let threshold = vdo.threshold as usize;
        if vdo.threshold == 0 || vdo.threshold > vdo.number_keys {
            return Err(Error::InvalidParameters(format!(
                "threshold {} of {} shares",
                vdo.threshold, vdo.number_keys
            )));
        }

        let mut shares = BTreeMap::new();
        for location in share_locations(access_key, vdo.number_keys as usize) {
            if shares.len() >= threshold {
                break;
            }
            match self.find_value(&location) {
                Ok((value, contact)) => match decode_share(&value) {
                    Some(share) => {
                        shares.entry(share.x).or_insert(share);
                    },
                    None => debug!("{} - No share at {:?} on {}", self.addr(), location, contact),
                },
                Err(err) => debug!("{} - No share at {:?}: {}", self.addr(), location, err),
            }
        }

        if shares.len() < threshold {
            return Err(Error::InsufficientShares {
                found: shares.len(),
                threshold,
            });
        }

        let shares: Vec<Share> = shares.into_iter().map(|(_, share)| share).collect();
        let content_key: [u8; CONTENT_KEY_LENGTH] = sss::combine(&shares)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Crypto("reconstructed key has the wrong length".to_string()))?;
        cipher::decrypt(&content_key, &vdo.ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_share, encode_share, share_locations, sss::Share, threshold_for, Vdo};
    use std::collections::HashSet;

    #[test]
    fn test_threshold_for() {
        assert_eq!(threshold_for(10, 0.5).unwrap(), 5);
        assert_eq!(threshold_for(5, 0.5).unwrap(), 3);
        assert_eq!(threshold_for(1, 0.5).unwrap(), 1);
        assert_eq!(threshold_for(3, 0.1).unwrap(), 1);
        assert_eq!(threshold_for(20, 1.0).unwrap(), 20);
        assert!(threshold_for(0, 0.5).is_err());
        assert!(threshold_for(10, 0.0).is_err());
        assert!(threshold_for(10, 1.5).is_err());
        assert!(threshold_for(10, std::f64::NAN).is_err());
    }

    #[test]
    fn test_share_locations_are_deterministic() {
        let locations = share_locations(42, 10);
        assert_eq!(locations, share_locations(42, 10));
        assert_eq!(locations[..4], share_locations(42, 4)[..]);
        assert_ne!(locations, share_locations(43, 10));

        let distinct: HashSet<_> = locations.iter().collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn test_share_encoding() {
        let share = Share { x: 7, y: vec![9; 32] };
        assert_eq!(decode_share(&encode_share(&share)), Some(share));
        assert_eq!(decode_share(&[]), None);
        assert_eq!(decode_share(&[0; 33]), None);
        assert_eq!(decode_share(&[1; 5]), None);
    }

    #[test]
    fn test_vdo_serialization_omits_access_key() {
        let vdo = Vdo {
            access_key: 1234,
            ciphertext: vec![1, 2, 3],
            number_keys: 10,
            threshold: 5,
        };
        let decoded: Vdo = bincode::deserialize(&bincode::serialize(&vdo).unwrap()).unwrap();
        assert_eq!(decoded.access_key, 0);
        assert_eq!(decoded.ciphertext, vdo.ciphertext);
        assert_eq!(decoded.threshold, 5);
    }
}
