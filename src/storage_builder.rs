use crate::error::RusqueError;
use crate::storage::Storage;
use crate::storage_internal::StorageInternal;

const DEFAULT_URL: &str = "redis://127.0.0.1:6379";

/// Builds a [`Storage`]: Redis connection details plus the key namespace.
#[derive(Default)]
pub struct StorageBuilder {
    url: Option<String>,
    db: Option<u32>,
    namespace: Option<String>,
    pool: Option<deadpool_redis::Pool>,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `REDIS_BACKEND` (falling back to `REDIS_URL`), `REDIS_BACKEND_DB`
    /// and `PREFIX` from the environment. Values already set on the builder
    /// win over the environment.
    pub fn from_env(mut self) -> Result<Self, RusqueError> {
        if self.url.is_none() {
            self.url = std::env::var("REDIS_BACKEND")
                .or_else(|_| std::env::var("REDIS_URL"))
                .ok();
        }
        if self.db.is_none()
            && let Ok(db) = std::env::var("REDIS_BACKEND_DB")
        {
            self.db = Some(
                db.parse()
                    .map_err(|_| RusqueError::Config(format!("bad REDIS_BACKEND_DB: {db}")))?,
            );
        }
        if self.namespace.is_none() {
            self.namespace = std::env::var("PREFIX").ok();
        }
        Ok(self)
    }

    pub fn from_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn build(self) -> Result<Storage, RusqueError> {
        let pool = match self.pool {
            Some(pool) => pool,
            None => {
                let mut url = self.url.unwrap_or_else(|| DEFAULT_URL.to_string());
                if let Some(db) = self.db {
                    url = format!("{}/{db}", url.trim_end_matches('/'));
                }
                deadpool_redis::Config::from_url(url)
                    .create_pool(Some(deadpool_redis::Runtime::Tokio1))?
            }
        };

        Ok(Storage::from_internal(StorageInternal::new(
            pool,
            self.namespace,
        )))
    }

    pub fn build_from_pool(mut self, pool: deadpool_redis::Pool) -> Result<Storage, RusqueError> {
        self.pool = Some(pool);
        self.build()
    }
}
