/// Errors surfaced by storage operations and the worker loop.
///
/// Handler failures are not represented here: a failing job is recorded in the
/// failed log and the loop keeps running. Only infrastructure problems (Redis,
/// serialization of our own records, configuration) reach this type.
#[derive(Debug, thiserror::Error)]
pub enum RusqueError {
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),

    #[error("Redis pool creation error: {0}")]
    RedisCreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown job class: {0}")]
    UnknownClass(String),

    #[error("failed to build job {class}: {message}")]
    Factory { class: String, message: String },

    #[error("malformed worker id: {0}")]
    MalformedWorkerId(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
