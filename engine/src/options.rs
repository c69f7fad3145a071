//! Store configuration.

/// Options for [`Store::with_options`](crate::Store::with_options).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Label attached to the store's tracing span
    pub name: String,
    /// Ask the repository to re-deliver the canonical list after a failed
    /// durable write
    pub resync_on_persist_failure: bool,
}

impl StoreOptions {
    /// Default options with a custom span label.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set whether a failed durable write triggers a resync request.
    pub fn resync_on_persist_failure(mut self, enabled: bool) -> Self {
        self.resync_on_persist_failure = enabled;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            resync_on_persist_failure: true,
        }
    }
}
