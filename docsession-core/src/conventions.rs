//! Store-wide conventions and per-session overrides.

use serde::{Deserialize, Serialize};

/// Behaviour shared by every session of a store handle.
///
/// ```ignore
/// let conventions = Conventions::builder()
///     .with_max_requests_per_session(100)
///     .with_optimistic_concurrency(false)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conventions {
    /// Round trips a single session may make before it refuses to send more.
    pub max_requests_per_session: usize,
    /// Whether commits carry version checks for entities the session did not load.
    pub use_optimistic_concurrency: bool,
    /// Character between the collection name and the number in an identity.
    pub identity_separator: char,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            max_requests_per_session: 30,
            use_optimistic_concurrency: true,
            identity_separator: '/',
        }
    }
}

impl Conventions {
    pub fn builder() -> ConventionsBuilder {
        ConventionsBuilder::default()
    }

    /// Applies session overrides on top of these conventions.
    pub fn with_overrides(&self, options: &SessionOptions) -> Self {
        Self {
            max_requests_per_session: options
                .max_requests
                .unwrap_or(self.max_requests_per_session),
            use_optimistic_concurrency: options
                .optimistic_concurrency
                .unwrap_or(self.use_optimistic_concurrency),
            identity_separator: self.identity_separator,
        }
    }
}

/// Builder for [`Conventions`]. Unset values keep their defaults.
#[derive(Debug, Default)]
pub struct ConventionsBuilder {
    conventions: Conventions,
}

impl ConventionsBuilder {
    pub fn with_max_requests_per_session(mut self, max: usize) -> Self {
        self.conventions.max_requests_per_session = max;
        self
    }

    pub fn with_optimistic_concurrency(mut self, enabled: bool) -> Self {
        self.conventions.use_optimistic_concurrency = enabled;
        self
    }

    pub fn with_identity_separator(mut self, separator: char) -> Self {
        self.conventions.identity_separator = separator;
        self
    }

    pub fn build(self) -> Conventions {
        self.conventions
    }
}

/// Per-session overrides of the store's [`Conventions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_requests: Option<usize>,
    pub optimistic_concurrency: Option<bool>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_requests(mut self, max: usize) -> Self {
        self.max_requests = Some(max);
        self
    }

    pub fn with_optimistic_concurrency(mut self, enabled: bool) -> Self {
        self.optimistic_concurrency = Some(enabled);
        self
    }
}
