//! Node-wide configuration consumed by the firmware runtime and the emulator.

use crate::relay::RelayConfig;
use crate::transport::TransportMode;

/// Default serial line rate, 8N1.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Complete node configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeConfig {
    pub relay: RelayConfig,
    pub transport: TransportMode,
    pub baud_rate: u32,
}

impl NodeConfig {
    #[must_use]
    pub const fn new(relay: RelayConfig, transport: TransportMode, baud_rate: u32) -> Self {
        Self {
            relay,
            transport,
            baud_rate,
        }
    }

    /// Returns a copy serviced by the given transport.
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new(
            RelayConfig::default(),
            TransportMode::Interrupt,
            DEFAULT_BAUD_RATE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{DEFAULT_DEFINITE_DELAY, DEFAULT_TICK_PERIOD};

    #[test]
    fn defaults_follow_the_relay_timing() {
        let config = NodeConfig::default();

        assert_eq!(config.relay.tick_period, DEFAULT_TICK_PERIOD);
        assert_eq!(config.relay.definite_delay, DEFAULT_DEFINITE_DELAY);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(
            config.with_transport(TransportMode::Polling).transport,
            TransportMode::Polling
        );
    }
}
