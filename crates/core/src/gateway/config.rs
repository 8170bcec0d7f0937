use serde::{Deserialize, Serialize};

/// Configuration for the real-time gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum items accepted in one upload slice.
    #[serde(default = "default_max_slice_items")]
    pub max_slice_items: usize,

    /// Status updates buffered per connection before it must resync.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_max_slice_items() -> usize {
    100
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_slice_items: default_max_slice_items(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}
