//! Server configuration.

/// Configuration for the reference remote.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of changes or entities returned in one page.
    pub max_page_size: u32,
    /// Maximum number of items accepted in one batch create.
    pub max_batch_size: usize,
}

impl ServerConfig {
    /// Creates a configuration with the default limits.
    pub fn new() -> Self {
        Self {
            max_page_size: 500,
            max_batch_size: 100,
        }
    }

    /// Sets the maximum page size.
    pub fn with_max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = size;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_page_size(10)
            .with_max_batch_size(5);
        assert_eq!(config.max_page_size, 10);
        assert_eq!(config.max_batch_size, 5);
    }
}
