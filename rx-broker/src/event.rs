//! Event values emitted by client-facing sources.

use broker_host::ClientData;

/// A protocol message paired with the identity of the client that sent it.
///
/// Emitted by the connect, disconnect and publish sources. The same client may
/// appear in any number of events.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent<M> {
    pub message: M,
    pub client: ClientData,
}

impl<M> ClientEvent<M> {
    pub fn new(message: M, client: ClientData) -> Self {
        Self { message, client }
    }

    pub fn client_id(&self) -> &str {
        &self.client.client_id
    }

    pub fn into_parts(self) -> (M, ClientData) {
        (self.message, self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_host::Publish;

    #[test]
    fn test_client_event_accessors() {
        let event = ClientEvent::new(Publish::new("sensor/1", &b"42"[..]), ClientData::new("dev-A"));

        assert_eq!(event.client_id(), "dev-A");
        let (publish, client) = event.into_parts();
        assert_eq!(publish.topic, "sensor/1");
        assert_eq!(client.client_id, "dev-A");
    }
}
