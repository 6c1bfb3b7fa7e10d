use bincode::Options;
use serde_derive::{Deserialize, Serialize};
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::contact::Contact;
use crate::{MESSAGE_LENGTH, REPLICATION_PARAM};

/// A request RPC. `msg_id` is a fresh random token that the response must echo.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub msg_id: Key,
    pub sender: Contact,
    pub payload: RequestPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Ping,
    Store(Key, Vec<u8>),
    FindNode(Key),
    FindValue(Key),
}

/// A response RPC. `sender` is the responding node.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub msg_id: Key,
    pub sender: Contact,
    pub payload: ResponsePayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    Pong,
    Stored,
    Nodes(Vec<Contact>),
    Value(Vec<u8>),
    Failed(String),
}

impl Request {
    pub fn new(sender: Contact, payload: RequestPayload) -> Self {
        Request {
            msg_id: Key::rand(),
            sender,
            payload,
        }
    }
}

impl RequestPayload {
    /// Returns `true` if `response` is a possible answer to this request.
    pub fn accepts(&self, response: &ResponsePayload) -> bool {
        match (self, response) {
            (RequestPayload::Ping, ResponsePayload::Pong) => true,
            (RequestPayload::Ping, _) => false,
            (RequestPayload::Store(..), ResponsePayload::Stored) => true,
            (RequestPayload::FindNode(_), ResponsePayload::Nodes(nodes))
            | (RequestPayload::FindValue(_), ResponsePayload::Nodes(nodes)) => {
                nodes.len() <= REPLICATION_PARAM
            },
            (RequestPayload::FindValue(_), ResponsePayload::Value(_)) => true,
            (_, ResponsePayload::Failed(_)) => true,
            _ => false,
        }
    }
}

impl Response {
    /// Constructs the response to `request`.
    pub fn new(request: &Request, sender: Contact, payload: ResponsePayload) -> Self {
        Response {
            msg_id: request.msg_id,
            sender,
            payload,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
    Kill,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MESSAGE_LENGTH as u64)
}

/// Datagram framing for `Message` over a `UdpSocket`.
#[derive(Clone)]
pub struct Protocol {
    socket: Arc<UdpSocket>,
}

impl Protocol {
    /// Wraps `socket` and starts a thread that forwards every decoded datagram, together with
    /// its source address, to `tx`.
    pub fn new(socket: UdpSocket, tx: Sender<(Message, SocketAddr)>) -> Protocol {
        let protocol = Protocol {
            socket: Arc::new(socket),
        };
        let ret = protocol.clone();
        thread::spawn(move || {
            let mut buffer = [0u8; MESSAGE_LENGTH];
            loop {
                let (len, src_addr) = match protocol.socket.recv_from(&mut buffer) {
                    Ok(received) => received,
                    Err(err) => {
                        warn!("Protocol: Could not receive data: {}", err);
                        continue;
                    },
                };
                let message = match codec().deserialize(&buffer[..len]) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("Protocol: Dropped malformed datagram from {}: {}", src_addr, err);
                        continue;
                    },
                };

                if tx.send((message, src_addr)).is_err() {
                    warn!("Protocol: Connection closed.");
                    break;
                }
            }
        });
        ret
    }

    pub fn send_message(&self, message: &Message, addr: SocketAddr) -> Result<()> {
        let buffer = codec().serialize(message)?;
        self.socket
            .send_to(&buffer, addr)
            .map_err(|err| Error::Transport(format!("could not send data to {}: {}", addr, err)))?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::{codec, Message, Request, RequestPayload, Response, ResponsePayload};
    use crate::key::Key;
    use crate::node::contact::Contact;
    use crate::{MESSAGE_LENGTH, REPLICATION_PARAM};
    use bincode::Options;

    fn contact() -> Contact {
        Contact::new(Key::rand(), "127.0.0.1:8900".parse().unwrap())
    }

    #[test]
    fn test_response_echoes_msg_id() {
        let request = Request::new(contact(), RequestPayload::Ping);
        let response = Response::new(&request, contact(), ResponsePayload::Pong);
        assert_eq!(request.msg_id, response.msg_id);
    }

    #[test]
    fn test_full_nodes_reply_fits_datagram() {
        let nodes = (0..REPLICATION_PARAM).map(|_| contact()).collect();
        let request = Request::new(contact(), RequestPayload::FindNode(Key::rand()));
        let response = Response::new(&request, contact(), ResponsePayload::Nodes(nodes));
        let bytes = codec().serialize(&Message::Response(response)).unwrap();
        assert!(bytes.len() < MESSAGE_LENGTH);

        match codec().deserialize::<Message>(&bytes).unwrap() {
            Message::Response(decoded) => match decoded.payload {
                ResponsePayload::Nodes(nodes) => assert_eq!(nodes.len(), REPLICATION_PARAM),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let request = Request::new(
            contact(),
            RequestPayload::Store(Key::rand(), vec![0; MESSAGE_LENGTH]),
        );
        assert!(codec().serialize(&Message::Request(request)).is_err());
    }
}
