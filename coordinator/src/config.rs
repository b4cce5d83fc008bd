use serde::Deserialize;

fn default_pool_max() -> usize {
    16
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("redis url cannot be empty")]
    EmptyRedisUrl,
    #[error("redis pool_max must be greater than 0")]
    InvalidPoolSize,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Shared Redis instance. Required when more than one process routes through the pool.
    Redis {
        url: String,
        #[serde(default = "default_pool_max")]
        pool_max: usize,
    },
    /// Process-local state. Only correct for a single process.
    Memory,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StoreConfig::Redis { url, pool_max } => {
                if url.trim().is_empty() {
                    return Err(ValidationError::EmptyRedisUrl);
                }
                if *pool_max == 0 {
                    return Err(ValidationError::InvalidPoolSize);
                }
                Ok(())
            }
            StoreConfig::Memory => Ok(()),
        }
    }
}
