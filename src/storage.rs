use std::collections::HashMap;

use crate::key::Key;

/// The values a node holds on behalf of the network. Entries never expire.
#[derive(Default, Debug)]
pub struct Storage {
    data: HashMap<Key, Vec<u8>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            data: HashMap::new(),
        }
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: Key, value: Vec<u8>) {
        debug!("Stored {:?} ({} bytes)", key, value.len());
        self.data.insert(key, value);
    }

    pub fn get(&self, key: &Key) -> Option<&Vec<u8>> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use crate::key::Key;

    #[test]
    fn test_insert_get() {
        let mut storage = Storage::new();
        let key = Key::rand();
        assert!(storage.get(&key).is_none());

        storage.insert(key, b"somedata".to_vec());
        assert_eq!(storage.get(&key).unwrap(), b"somedata");
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut storage = Storage::new();
        let key = Key::rand();
        storage.insert(key, b"first".to_vec());
        storage.insert(key, Vec::new());
        assert_eq!(storage.get(&key).unwrap().len(), 0);
        assert_eq!(storage.len(), 1);
    }
}
