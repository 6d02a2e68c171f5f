//! "Deliver this envelope to the actor's family."
//!
//! Domain services call [`GroupMessageService::send_to_family`] (or the
//! fire-and-forget [`GroupMessageService::publish`]) once, after their
//! mutation is committed. There are no retries: a client that missed an
//! event re-fetches over REST.

use std::sync::Arc;

use hearth_core::{EventEnvelope, UserId};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::family::{FamilyGroupResolver, ResolutionError};
use crate::metrics::{EVENTS_PUBLISHED_TOTAL, RESOLUTION_FAILURES_TOTAL};
use crate::websocket::registry::{BroadcastReport, ConnectionRegistry};

/// Resolver plus registry.
pub struct GroupMessageService {
    resolver: Arc<FamilyGroupResolver>,
    registry: Arc<ConnectionRegistry>,
}

impl GroupMessageService {
    /// Combine a resolver and the shared registry.
    pub fn new(resolver: Arc<FamilyGroupResolver>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { resolver, registry }
    }

    /// Resolve `actor`'s family (targeting `envelope.family_id()`) and broadcast to it.
    ///
    /// Resolution failures are logged and returned; nothing is sent.
    /// Per-connection delivery failures never surface here.
    pub async fn send_to_family(
        &self,
        actor: UserId,
        envelope: &EventEnvelope,
    ) -> Result<BroadcastReport, ResolutionError> {
        let event_type = envelope.event_type().as_str();
        let family = match self
            .resolver
            .resolve_for(actor, Some(envelope.family_id()))
            .await
        {
            Ok(family) => family,
            Err(e) => {
                counter!(RESOLUTION_FAILURES_TOTAL, "reason" => e.as_str()).increment(1);
                warn!(
                    user_id = %actor,
                    family_id = %envelope.family_id(),
                    event_type,
                    error = %e,
                    "cannot resolve family, dropping event"
                );
                return Err(e);
            }
        };

        counter!(EVENTS_PUBLISHED_TOTAL, "event_type" => event_type).increment(1);
        let report = self.registry.broadcast(family, envelope).await;
        debug!(
            user_id = %actor,
            family_id = %family,
            event_type,
            delivered = report.delivered,
            "event sent to family"
        );
        Ok(report)
    }

    /// Spawn [`send_to_family`](Self::send_to_family) and return immediately.
    pub fn publish(self: &Arc<Self>, actor: UserId, envelope: EventEnvelope) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            // Errors are already logged inside send_to_family.
            let _ = service.send_to_family(actor, &envelope).await;
        })
    }

    /// The registry this service broadcasts through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
