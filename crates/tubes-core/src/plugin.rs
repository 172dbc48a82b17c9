//! Prefixed, all-or-nothing channel registration for plugins.

use crate::channel::{Channel, ChannelHandlers};
use crate::path;
use crate::store::ChannelStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type returned by plugin initializers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Plugin activation errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The initializer failed; every channel it registered was destroyed.
    #[error("Plugin '{prefix}' failed to initialize: {source}")]
    Init {
        /// Prefix the plugin was mounted under.
        prefix: String,
        /// Initializer error.
        #[source]
        source: BoxError,
    },
}

/// Registration scope handed to a plugin initializer.
///
/// Every channel name is joined to the scope's prefix before it reaches the
/// store.
pub struct ChannelScope<'a> {
    store: &'a ChannelStore,
    prefix: String,
    registered: Vec<String>,
}

impl<'a> ChannelScope<'a> {
    fn new(store: &'a ChannelStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            registered: Vec::new(),
        }
    }

    /// Register a channel under `<prefix>/<name>`.
    pub fn register_channel(&mut self, name: &str, handlers: ChannelHandlers) -> Arc<Channel> {
        let pattern = path::join(&self.prefix, name);
        let channel = self.store.register(pattern.clone(), handlers);
        self.registered.push(pattern);
        channel
    }

    /// Get the scope prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get the fully-qualified patterns registered so far.
    #[must_use]
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    fn rollback(self) {
        for pattern in self.registered {
            if self.store.destroy(&pattern).is_err() {
                debug!(channel = %pattern, "Channel already gone during rollback");
            }
        }
    }
}

/// A bundle of channels mounted under a prefix.
pub trait Plugin: Send + Sync {
    /// Register the plugin's channels.
    ///
    /// # Errors
    ///
    /// Any error aborts activation and unregisters every channel registered
    /// through `scope`.
    fn init(&self, scope: &mut ChannelScope<'_>) -> Result<(), BoxError>;
}

/// Run `init` in a scope prefixed with `prefix`, rolling back on failure.
pub(crate) fn activate<F>(store: &ChannelStore, prefix: &str, init: F) -> Result<(), PluginError>
where
    F: FnOnce(&mut ChannelScope<'_>) -> Result<(), BoxError>,
{
    let mut scope = ChannelScope::new(store, prefix);

    match init(&mut scope) {
        Ok(()) => {
            info!(
                prefix = %prefix,
                channels = scope.registered.len(),
                "Plugin activated"
            );
            Ok(())
        }
        Err(source) => {
            warn!(
                prefix = %prefix,
                channels = scope.registered.len(),
                error = %source,
                "Plugin failed, rolling back"
            );
            scope.rollback();
            Err(PluginError::Init {
                prefix: prefix.to_string(),
                source,
            })
        }
    }
}
