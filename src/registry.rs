use std::collections::HashMap;

use crate::error::RusqueError;
use crate::job::{BoxedJob, Job};

pub type JobFactory = fn(serde_json::Value) -> Result<BoxedJob, RusqueError>;

/// Maps wire class names to handler constructors.
///
/// Producers in other languages or processes only need to agree on the string
/// identifier; handlers register themselves under it at process start.
pub struct JobRegistry {
    jobs: HashMap<String, JobFactory>,
}

/// Builds a `T` by deserializing the envelope's argument value.
pub fn job_factory<T>(value: serde_json::Value) -> Result<BoxedJob, RusqueError>
where
    T: Job + serde::de::DeserializeOwned + 'static,
{
    let job: T = serde_json::from_value(value)?;
    Ok(Box::new(job))
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    pub fn register<T>(&mut self, class: &str) -> &mut Self
    where
        T: Job + serde::de::DeserializeOwned + 'static,
    {
        self.jobs.insert(class.to_string(), job_factory::<T>);
        self
    }

    /// Escape hatch for constructors that need more than deserialization.
    pub fn register_with(&mut self, class: &str, factory: JobFactory) {
        self.jobs.insert(class.to_string(), factory);
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.jobs.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_registered(&self, class: &str) -> bool {
        self.jobs.contains_key(class)
    }

    pub(crate) fn build(
        &self,
        class: &str,
        args: serde_json::Value,
    ) -> Result<BoxedJob, RusqueError> {
        let factory = self
            .jobs
            .get(class)
            .ok_or_else(|| RusqueError::UnknownClass(class.to_string()))?;
        factory(args).map_err(|e| RusqueError::Factory {
            class: class.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
