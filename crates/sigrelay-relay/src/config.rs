use std::net::{Ipv4Addr, SocketAddr};

use sigrelay_wire::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Port the relay listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8080;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address. Default: `0.0.0.0:8080`.
    pub bind: SocketAddr,
    /// Maximum envelope size accepted from or sent to a client.
    pub max_payload_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl RelayConfig {
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}
