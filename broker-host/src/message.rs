//! Protocol records the host hands to callbacks and stores.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Decode the wire level, `None` for anything above 2.
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Identity of the client behind a host event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientData {
    /// MQTT client identifier
    pub client_id: String,
    /// Username presented at connect, if any
    pub username: Option<String>,
    /// Whether the host authenticated the client
    pub authenticated: bool,
    /// Remote address of the connection
    pub address: Option<IpAddr>,
}

impl ClientData {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            authenticated: false,
            address: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.authenticated = true;
        self
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }
}

/// A CONNECT request as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub username: Option<String>,
    pub clean_session: bool,
    /// Keep-alive interval in seconds
    pub keep_alive: u16,
}

impl Connect {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            clean_session: true,
            keep_alive: 60,
        }
    }
}

/// How a client left the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Disconnect {
    /// `true` when the connection dropped without a DISCONNECT packet
    pub abrupt: bool,
}

/// An inbound PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

/// A message kept by the host's retained-message store, keyed by topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// When the store accepted the message
    pub stored_at: SystemTime,
}

impl RetainedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            stored_at: SystemTime::now(),
        }
    }

    /// Time since the message was stored; zero if the clock went backwards.
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed().unwrap_or_default()
    }
}

/// A topic filter plus the QoS granted for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub filter: String,
    pub qos: QoS,
}

impl Topic {
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}
