//! In-process relay and transport helpers for the client tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sigrelay_relay::Registry;
use sigrelay_transport::{MemoryHub, MemoryTransport, PeerTransport, TransportEvents, TransportFactory};
use tokio::sync::mpsc;

use crate::link::RelayLink;

/// A relay registry served over in-process queues.
pub(crate) struct LocalRelay {
    pub(crate) hub: MemoryHub,
    registry: Arc<Mutex<Registry>>,
}

impl LocalRelay {
    pub(crate) fn new() -> Self {
        Self {
            hub: MemoryHub::new(),
            registry: Arc::new(Mutex::new(Registry::new())),
        }
    }

    /// Open a client connection to this relay.
    pub(crate) fn attach(&self) -> RelayLink {
        let (to_client, client_inbound) = mpsc::unbounded_channel();
        let (client_outbox, mut from_client) = mpsc::unbounded_channel();
        let id = self.registry.lock().connect(to_client);

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            while let Some(envelope) = from_client.recv().await {
                registry.lock().handle(&id, &envelope);
            }
            registry.lock().disconnect(&id);
        });

        RelayLink::from_channels(client_outbox, client_inbound)
    }

    pub(crate) async fn wait_for_code(&self, code: &str) {
        self.wait(|registry| registry.find_receiver(code).is_some())
            .await;
    }

    pub(crate) async fn wait_for_code_released(&self, code: &str) {
        self.wait(|registry| registry.find_receiver(code).is_none())
            .await;
    }

    async fn wait(&self, condition: impl Fn(&Registry) -> bool) {
        for _ in 0..1000 {
            if condition(&self.registry.lock()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("relay never reached the expected state");
    }
}

/// Memory transport factory that remembers every transport it made.
pub(crate) struct RecordingFactory {
    hub: MemoryHub,
    created: Mutex<Vec<Arc<MemoryTransport>>>,
}

impl RecordingFactory {
    pub(crate) fn new(hub: MemoryHub) -> Self {
        Self {
            hub,
            created: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn created(&self) -> Vec<Arc<MemoryTransport>> {
        self.created.lock().clone()
    }
}

impl TransportFactory for RecordingFactory {
    fn create(&self) -> sigrelay_transport::Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (transport, events) = self.hub.transport();
        self.created.lock().push(Arc::clone(&transport));
        let transport: Arc<dyn PeerTransport> = transport;
        Ok((transport, events))
    }
}
