use serde::Deserialize;

/// Tunables for a [`Bus`](crate::Bus) and the transports that ship with the
/// crate. Every field has a default, so an empty document deserializes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Outbound publish queue length. Must be a power of two.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Pre-allocated publish items.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Upper bound on inbound messages delivered by one transport tick.
    #[serde(default = "default_max_deliveries_per_tick")]
    pub max_deliveries_per_tick: usize,

    /// Payload buffer capacity a recycled publish item may keep, in bytes.
    /// Larger buffers are shrunk before going back to the pool.
    #[serde(default = "default_max_retained_payload")]
    pub max_retained_payload: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            pool_capacity: default_pool_capacity(),
            max_deliveries_per_tick: default_max_deliveries_per_tick(),
            max_retained_payload: default_max_retained_payload(),
        }
    }
}

fn default_queue_capacity() -> usize {
    16384
}

fn default_pool_capacity() -> usize {
    1024
}

fn default_max_deliveries_per_tick() -> usize {
    64
}

fn default_max_retained_payload() -> usize {
    64 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.queue_capacity, 16384);
        assert_eq!(config.pool_capacity, 1024);
    }

    #[test]
    fn partial_override() {
        let config: Config = serde_json::from_str(r#"{"queue_capacity": 64}"#).unwrap();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.max_deliveries_per_tick, 64);
        assert_eq!(config.max_retained_payload, 64 * 1024);
    }
}
