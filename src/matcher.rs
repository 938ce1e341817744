use crate::envelope::JobEnvelope;

/// Predicate for selectively removing jobs from a queue.
#[derive(Debug, Clone)]
pub enum JobMatcher {
    /// Matches on `class` equality alone.
    Class(String),
    /// Matches on `class` and tracking id.
    ClassAndId { class: String, id: String },
    /// Matches when `class` is equal and the job's argument object contains
    /// every key of `args` with an equal value. An empty `args` map matches
    /// nothing.
    ClassAndArgs {
        class: String,
        args: serde_json::Map<String, serde_json::Value>,
    },
}

impl JobMatcher {
    pub fn class(class: impl Into<String>) -> Self {
        Self::Class(class.into())
    }

    pub(crate) fn matches(&self, envelope: &JobEnvelope) -> bool {
        match self {
            Self::Class(class) => envelope.class == *class,
            Self::ClassAndId { class, id } => envelope.class == *class && envelope.id == *id,
            Self::ClassAndArgs { class, args } => {
                if envelope.class != *class || args.is_empty() {
                    return false;
                }
                let Some(job_args) = envelope.arguments().as_object() else {
                    return false;
                };
                args.iter().all(|(k, v)| job_args.get(k) == Some(v))
            }
        }
    }
}
