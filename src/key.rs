use serde_derive::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::error::Error;
use crate::KEY_LENGTH;

/// A key that represents nodes and data.
///
/// Keys are 160 bits wide. Distances between keys are themselves keys, so the derived `Ord`
/// compares XOR distances as big-endian unsigned integers.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Key {
    type Err = Error;

    /// Parses a key from 40 hexadecimal characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|err| Error::InvalidParameters(format!("bad key {:?}: {}", s, err)))?;
        if bytes.len() != KEY_LENGTH {
            return Err(Error::InvalidParameters(format!(
                "bad key {:?}: expected {} bytes, got {}",
                s,
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut ret = [0; KEY_LENGTH];
        ret.copy_from_slice(&bytes);
        Ok(Key(ret))
    }
}

impl Key {
    /// Constructs a new `Key` from a byte array.
    pub fn new(data: [u8; KEY_LENGTH]) -> Self {
        Key(data)
    }

    /// Constructs a new, random `Key`.
    pub fn rand() -> Self {
        Key(rand::random())
    }

    /// Constructs a `Key` from the SHA-3 digest of `data`, truncated to `KEY_LENGTH` bytes.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha3_256::digest(data);
        let mut ret = [0; KEY_LENGTH];
        ret.copy_from_slice(&digest[..KEY_LENGTH]);
        Key(ret)
    }

    /// Constructs a new, random `Key` from `[2^(KEY_LENGTH * 8 - index - 1), 2^(KEY_LENGTH * 8 -
    /// index))`, i.e. with exactly `index` leading zero bits.
    pub(crate) fn rand_in_range(index: usize) -> Self {
        let mut ret = Key::rand();
        let bytes = index / 8;
        let bit = index % 8;
        for i in 0..bytes {
            ret.0[i] = 0;
        }
        ret.0[bytes] &= 0xFF >> (bit);
        ret.0[bytes] |= 1 << (8 - bit - 1);
        ret
    }

    /// Returns the XOR result between `self` and `key`.
    pub fn xor(&self, key: &Key) -> Key {
        let mut ret = [0; KEY_LENGTH];
        for (i, byte) in ret.iter_mut().enumerate() {
            *byte = self.0[i] ^ key.0[i];
        }
        Key(ret)
    }

    /// Returns the number of leading zeros in `self`. This is used to calculate the distance
    /// between keys.
    pub fn leading_zeros(&self) -> usize {
        let mut ret = 0;
        for i in 0..KEY_LENGTH {
            if self.0[i] == 0 {
                ret += 8
            } else {
                return ret + self.0[i].leading_zeros() as usize;
            }
        }
        ret
    }

    /// Returns the number of leading bits `self` and `key` have in common, in
    /// `[0, KEY_LENGTH * 8]`.
    pub fn shared_prefix_len(&self, key: &Key) -> usize {
        self.xor(key).leading_zeros()
    }

    /// Returns `true` if `a` is strictly closer to `self` than `b` is.
    pub fn closer(&self, a: &Key, b: &Key) -> bool {
        self.xor(a) < self.xor(b)
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use super::Key;
    use crate::KEY_LENGTH;

    #[test]
    fn test_rand_in_range() {
        for i in 0..KEY_LENGTH * 8 {
            let key = BigUint::from_bytes_be(&Key::rand_in_range(i).0);
            let mut lower = [0u8; KEY_LENGTH];
            lower[i / 8] = 1 << ((KEY_LENGTH * 8 - i - 1) % 8);
            assert!(BigUint::from_bytes_be(&lower) <= key);
            assert!(key < BigUint::from_bytes_be(&lower) << 1u32);
        }
    }

    #[test]
    fn test_leading_zeros() {
        for i in 0..KEY_LENGTH * 8 {
            assert_eq!(Key::rand_in_range(i).leading_zeros(), i);
        }
    }

    #[test]
    fn test_xor_with_self_is_zero() {
        for _ in 0..100 {
            let key = Key::rand();
            assert_eq!(key.xor(&key), Key::default());
            assert_eq!(key.shared_prefix_len(&key), KEY_LENGTH * 8);
        }
    }

    #[test]
    fn test_shared_prefix_len() {
        for _ in 0..100 {
            let a = Key::rand();
            let b = Key::rand();
            let len = a.shared_prefix_len(&b);
            assert!(len <= KEY_LENGTH * 8);
            assert_eq!(len == KEY_LENGTH * 8, a == b);
            assert_eq!(len, b.shared_prefix_len(&a));
        }

        let a = Key::default();
        let mut b = Key::default();
        b.0[2] = 0b0001_0000;
        assert_eq!(a.shared_prefix_len(&b), 19);
    }

    #[test]
    fn test_closer_is_antisymmetric() {
        for _ in 0..100 {
            let target = Key::rand();
            let a = Key::rand();
            let b = Key::rand();
            assert_ne!(a, b);
            assert_eq!(target.closer(&a, &b), !target.closer(&b, &a));
            assert!(!target.closer(&a, &a));
        }
    }

    #[test]
    fn test_closer_uses_xor_metric() {
        let target = Key::default();
        let mut near = Key::default();
        near.0[KEY_LENGTH - 1] = 0xFF;
        let mut far = Key::default();
        far.0[0] = 0x01;
        assert!(target.closer(&near, &far));
        assert!(!target.closer(&far, &near));
        assert!(target.closer(&target, &near));
    }

    #[test]
    fn test_from_str() {
        let key: Key = "1234567890123456789012345678901234567890".parse().unwrap();
        assert_eq!(key.0[0], 0x12);
        assert_eq!(key.0[KEY_LENGTH - 1], 0x90);
        assert_eq!(key.to_string(), "1234567890123456789012345678901234567890");

        assert!("1234".parse::<Key>().is_err());
        assert!("zz34567890123456789012345678901234567890".parse::<Key>().is_err());
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(Key::hash(b"Hello"), Key::hash(b"Hello"));
        assert_ne!(Key::hash(b"Hello"), Key::hash(b"World"));
    }
}
