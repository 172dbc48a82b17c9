//! Broadcast fan-out and per-recipient outcome aggregation.
//!
//! Every target is attempted, in whatever order the subscriber store yields
//! them; a failed recipient never stops the rest. Delivery runs inline on the
//! caller's thread, so a stalled transport stalls the remainder of the call.

use crate::client::ClientId;
use crate::context::Context;
use crate::error::Error;
use std::sync::Arc;
use tracing::{debug, trace};

/// Options for a channel broadcast.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    skip: Vec<ClientId>,
}

impl BroadcastOptions {
    /// Create options delivering to every target.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip delivery to a client.
    #[must_use]
    pub fn skip(mut self, client_id: impl Into<ClientId>) -> Self {
        self.skip.push(client_id.into());
        self
    }

    /// Check if a client is on the skip list.
    #[must_use]
    pub fn should_skip(&self, client_id: &ClientId) -> bool {
        self.skip.contains(client_id)
    }
}

/// What happened for one recipient.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The payload was handed to the client's transport.
    Sent,
    /// The client was on the skip list; its transport was not invoked.
    Skipped,
    /// Delivery failed.
    Failed(Error),
}

/// Outcome of a broadcast for one recipient.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    /// The recipient's subscription.
    pub context: Arc<Context>,
    /// What happened.
    pub delivery: Delivery,
}

impl BroadcastOutcome {
    /// Check if the recipient was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.delivery, Delivery::Skipped)
    }

    /// Get the delivery error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match &self.delivery {
            Delivery::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Aggregate result of a broadcast.
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// True if at least one delivery failed.
    pub has_errors: bool,
    /// One outcome per target, in delivery order.
    pub outcomes: Vec<BroadcastOutcome>,
}

impl BroadcastResult {
    /// Number of successful deliveries.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.count(|delivery| matches!(delivery, Delivery::Sent))
    }

    /// Number of skipped recipients.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|delivery| matches!(delivery, Delivery::Skipped))
    }

    /// Number of failed deliveries.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|delivery| matches!(delivery, Delivery::Failed(_)))
    }

    /// Iterate over delivery errors.
    pub fn errors(&self) -> impl Iterator<Item = &Error> {
        self.outcomes.iter().filter_map(BroadcastOutcome::error)
    }

    /// Fold all delivery errors into one `MultipleErrors` error.
    ///
    /// Returns `None` if every delivery succeeded or was skipped.
    #[must_use]
    pub fn into_error(self, description: impl Into<String>) -> Option<Error> {
        if !self.has_errors {
            return None;
        }
        let errors = self
            .outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.delivery {
                Delivery::Failed(error) => Some(error),
                _ => None,
            })
            .collect();
        Some(Error::multiple(description, errors))
    }

    fn count(&self, predicate: impl Fn(&Delivery) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.delivery))
            .count()
    }
}

/// Deliver `payload` to every target not on the skip list.
pub(crate) fn fan_out(
    targets: Vec<Arc<Context>>,
    payload: &[u8],
    options: &BroadcastOptions,
) -> BroadcastResult {
    let mut result = BroadcastResult {
        has_errors: false,
        outcomes: Vec::with_capacity(targets.len()),
    };

    for context in targets {
        let delivery = if options.should_skip(context.client().id()) {
            Delivery::Skipped
        } else {
            match context.send(payload) {
                Ok(()) => Delivery::Sent,
                Err(error) => {
                    debug!(client = %context.client().id(), path = %context.path(), error = %error, "Broadcast delivery failed");
                    result.has_errors = true;
                    Delivery::Failed(error)
                }
            }
        };
        result.outcomes.push(BroadcastOutcome { context, delivery });
    }

    trace!(
        recipients = result.outcomes.len(),
        failed = result.has_errors,
        "Broadcast complete"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{sender_fn, Client, SendError};
    use crate::error::ErrorKind;
    use crate::path::Params;
    use parking_lot::Mutex;
    use std::sync::Weak;

    fn context(id: &str, fails: bool, calls: Arc<Mutex<Vec<String>>>) -> Arc<Context> {
        let owner = id.to_string();
        let client = Client::new(
            id,
            sender_fn(move |_| {
                calls.lock().push(owner.clone());
                if fails {
                    Err(SendError::Closed)
                } else {
                    Ok(())
                }
            }),
        );
        Arc::new(Context::new(
            Arc::new(client),
            "rooms/lobby",
            Weak::new(),
            Params::new(),
        ))
    }

    #[test]
    fn test_fan_out_with_skip_list() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![
            context("normal", false, Arc::clone(&calls)),
            context("broken", true, Arc::clone(&calls)),
            context("skipped", false, Arc::clone(&calls)),
        ];

        let result = fan_out(targets, b"{}", &BroadcastOptions::new().skip("skipped"));

        assert_eq!(result.outcomes.len(), 3);
        assert!(result.has_errors);
        assert_eq!(result.sent_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.skipped_count(), 1);
        assert!(!calls.lock().contains(&"skipped".to_string()));

        let error = result.errors().next().unwrap();
        assert_eq!(error.kind(), ErrorKind::SendingMessageFailed);
    }

    #[test]
    fn test_no_fail_fast() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![
            context("a", true, Arc::clone(&calls)),
            context("b", true, Arc::clone(&calls)),
            context("c", false, Arc::clone(&calls)),
        ];

        let result = fan_out(targets, b"1", &BroadcastOptions::new());

        assert_eq!(calls.lock().len(), 3);
        assert_eq!(result.failed_count(), 2);

        let aggregate = result.into_error("broadcast failed").unwrap();
        assert_eq!(aggregate.kind(), ErrorKind::MultipleErrors);
        assert_eq!(aggregate.errors().len(), 2);
    }

    #[test]
    fn test_clean_result_has_no_aggregate() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let result = fan_out(
            vec![context("a", false, calls)],
            b"1",
            &BroadcastOptions::new(),
        );
        assert!(!result.has_errors);
        assert!(result.into_error("unused").is_none());
    }
}
