//! Boundary contract toward the wire transport.
//!
//! The transport (gRPC stream, REST poller, filesystem watcher) owns
//! retries, backoff and reconnects. The engine only tells it what to be
//! subscribed to, and reacts to whatever responses it is handed via the
//! `Mux` entry points.

#[cfg(test)]
use mockall::automock;

use crate::InterestSet;

/// Outbound half of the transport boundary. Issued whenever the interest
/// union of a type changes; the transport translates this into a
/// protocol-specific subscribe/unsubscribe request.
#[cfg_attr(test, automock)]
pub trait SubscriptionTransport {
    fn set_interest(
        &self,
        type_url: &str,
        interest: &InterestSet,
    );

    /// No watch remains for the type; unsubscribe from it entirely. This
    /// is distinct from an empty `set_interest`, which cannot exist (an
    /// empty name set means wildcard).
    fn clear_interest(
        &self,
        type_url: &str,
    );
}
