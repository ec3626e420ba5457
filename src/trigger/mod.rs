//! Change-notification subscriptions.
//!
//! A document has at most one subscription per handler. `ensure_subscription`
//! removes whatever is registered for the pair and adds a fresh one, so it can
//! be called on every configuration save.

pub mod types;
pub mod storage;

pub use types::*;

/// Handler that publishes a document when its workbook changes
pub const PUBLISH_ON_CHANGE: &str = "publish_on_change";

/// Registry the change notifications are subscribed through
pub trait EventSubscriptions {
    type Error;

    fn subscriptions(&self, doc_id: &str) -> Result<Vec<Subscription>, Self::Error>;

    fn unsubscribe(&self, id: &str) -> Result<(), Self::Error>;

    fn subscribe(&self, doc_id: &str, handler: &str, source: &str) -> Result<Subscription, Self::Error>;
}

/// Leave exactly one subscription for `doc_id` + `handler`, pointing at `source`
pub fn ensure_subscription<S: EventSubscriptions>(
    registry: &S,
    doc_id: &str,
    handler: &str,
    source: &str,
) -> Result<Subscription, S::Error> {
    for existing in registry.subscriptions(doc_id)? {
        if existing.handler == handler {
            registry.unsubscribe(&existing.id)?;
        }
    }

    let subscription = registry.subscribe(doc_id, handler, source)?;
    tracing::debug!(doc_id, handler, source, id = %subscription.id, "subscription registered");
    Ok(subscription)
}
