//! Server configuration.

/// How the server assigns record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// Random UUIDv4 strings.
    #[default]
    Uuid,
    /// `<prefix>-<n>` with one counter across all kinds, e.g. `p-1`.
    Sequential,
}

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Id assignment strategy.
    pub id_strategy: IdStrategy,
    /// Messages buffered per subscriber before it is considered lagging.
    pub broadcast_capacity: usize,
    /// Buffer of each subscriber's outbound stream.
    pub stream_buffer: usize,
}

impl ServerConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            id_strategy: IdStrategy::Uuid,
            broadcast_capacity: 256,
            stream_buffer: 64,
        }
    }

    /// Sets the id strategy.
    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Sets the broadcast capacity.
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Sets the per-subscriber stream buffer.
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
