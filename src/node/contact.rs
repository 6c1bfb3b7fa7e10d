use serde_derive::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter, Result};
use std::net::{IpAddr, SocketAddr};

use crate::key::Key;

/// A reachable peer: its id and the address it listens on.
#[derive(PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Key,
    pub host: IpAddr,
    pub port: u16,
}

impl Contact {
    pub fn new(id: Key, addr: SocketAddr) -> Self {
        Contact {
            id,
            host: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Returns the XOR distance between the contact and `key`.
    pub fn distance(&self, key: &Key) -> Key {
        self.id.xor(key)
    }
}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} - {:?}", self.addr(), self.id)
    }
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.addr())
    }
}
