//! Family-scoped connection registry and event fan-out.
//!
//! The registry is the single owner of the `family → connections` map.
//! Groups appear on the first join and are removed as soon as their last
//! member leaves, so an empty group is never observable. Broadcasts copy the
//! member list under the shard lock and release it before any I/O.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MemberEntry;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as GroupEntry;
use hearth_core::{ConnectionId, EventEnvelope, FamilyId};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use super::connection::{ClientConnection, DeliveryError};
use crate::metrics::{WS_BROADCASTS_TOTAL, WS_EVICTIONS_TOTAL};

type Members = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Outcome of one [`ConnectionRegistry::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Members in the snapshot.
    pub attempted: usize,
    /// Members whose queue accepted the message.
    pub delivered: usize,
    /// Members removed because delivery failed.
    pub evicted: usize,
}

/// Process-wide map of family groups to live connections.
pub struct ConnectionRegistry {
    groups: DashMap<FamilyId, Members>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create an empty registry whose per-connection sends give up after `send_timeout`.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            groups: DashMap::new(),
            send_timeout,
        }
    }

    /// Add `conn` to `family`'s group, creating the group if needed.
    ///
    /// Returns `false` if this connection was already a member.
    pub fn join(&self, family: FamilyId, conn: Arc<ClientConnection>) -> bool {
        let mut group = self.groups.entry(family).or_default();
        match group.entry(conn.id.clone()) {
            MemberEntry::Occupied(_) => false,
            MemberEntry::Vacant(slot) => {
                debug!(conn_id = %conn.id, %family, "joined family group");
                let _ = slot.insert(conn);
                true
            }
        }
    }

    /// [`join`](Self::join) and return a guard that leaves when dropped.
    pub fn join_scoped(self: &Arc<Self>, family: FamilyId, conn: Arc<ClientConnection>) -> GroupMembership {
        let conn_id = conn.id.clone();
        let _ = self.join(family, conn);
        GroupMembership {
            registry: Arc::clone(self),
            family,
            conn_id,
        }
    }

    /// Remove a connection from `family`'s group. Absent members are a no-op.
    ///
    /// The group entry is dropped in the same critical section that removes
    /// its last member.
    pub fn leave(&self, family: FamilyId, conn_id: &ConnectionId) -> bool {
        match self.groups.entry(family) {
            GroupEntry::Occupied(mut group) => {
                let removed = group.get_mut().remove(conn_id).is_some();
                if group.get().is_empty() {
                    let _ = group.remove();
                    debug!(%family, "family group emptied");
                }
                if removed {
                    debug!(%conn_id, %family, "left family group");
                }
                removed
            }
            GroupEntry::Vacant(_) => false,
        }
    }

    /// Push `envelope` to every member of `family`.
    ///
    /// Sends run concurrently, each bounded by the registry's send timeout.
    /// A failing member is evicted and closed; the others are unaffected.
    /// Unknown families yield an empty report.
    pub async fn broadcast(&self, family: FamilyId, envelope: &EventEnvelope) -> BroadcastReport {
        let event_type = envelope.event_type().as_str();
        let message = match envelope.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_type, %family, error = %e, "failed to serialize event");
                return BroadcastReport::default();
            }
        };

        let members = self.snapshot(family);
        if members.is_empty() {
            debug!(event_type, %family, "no connected members, skipping broadcast");
            return BroadcastReport::default();
        }
        counter!(WS_BROADCASTS_TOTAL).increment(1);

        let timeout = self.send_timeout;
        let outcomes = futures::future::join_all(
            members
                .iter()
                .map(|conn| conn.deliver(Arc::clone(&message), timeout)),
        )
        .await;

        let mut report = BroadcastReport {
            attempted: members.len(),
            ..BroadcastReport::default()
        };
        for (conn, outcome) in members.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.evict(family, conn, e);
                    report.evicted += 1;
                }
            }
        }

        debug!(
            event_type,
            %family,
            recipients = report.delivered,
            evicted = report.evicted,
            "broadcast event to family"
        );
        report
    }

    fn snapshot(&self, family: FamilyId) -> Vec<Arc<ClientConnection>> {
        self.groups
            .get(&family)
            .map(|group| group.values().cloned().collect())
            .unwrap_or_default()
    }

    fn evict(&self, family: FamilyId, conn: &ClientConnection, cause: DeliveryError) {
        warn!(
            conn_id = %conn.id,
            user_id = %conn.user_id,
            %family,
            error = %cause,
            "failed to send event to client, evicting"
        );
        counter!(WS_EVICTIONS_TOTAL, "cause" => cause.cause()).increment(1);
        let _ = self.leave(family, &conn.id);
        conn.close();
    }

    /// Per-connection send timeout used by [`broadcast`](Self::broadcast).
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Members currently in `family`'s group.
    pub fn group_size(&self, family: FamilyId) -> usize {
        self.groups.get(&family).map_or(0, |group| group.len())
    }

    /// Whether `family` has a group entry (i.e. at least one member).
    pub fn contains_group(&self, family: FamilyId) -> bool {
        self.groups.contains_key(&family)
    }

    /// Whether `conn_id` is a member of `family`.
    pub fn is_member(&self, family: FamilyId, conn_id: &ConnectionId) -> bool {
        self.groups
            .get(&family)
            .is_some_and(|group| group.contains_key(conn_id))
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total memberships across all groups.
    pub fn connection_count(&self) -> usize {
        self.groups.iter().map(|group| group.len()).sum()
    }
}

/// Membership that is released when dropped.
///
/// Held by the session task, so the connection leaves its group on normal
/// return, error, cancellation, or panic.
#[must_use = "dropping the guard leaves the group immediately"]
pub struct GroupMembership {
    registry: Arc<ConnectionRegistry>,
    family: FamilyId,
    conn_id: ConnectionId,
}

impl GroupMembership {
    /// Family this membership belongs to.
    pub fn family(&self) -> FamilyId {
        self.family
    }
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        let _ = self.registry.leave(self.family, &self.conn_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::UserId;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    type Rx = mpsc::Receiver<Arc<String>>;

    fn make_connection(family: FamilyId, capacity: usize) -> (Arc<ClientConnection>, Rx) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(ConnectionId::new(), UserId::random(), family, tx);
        (Arc::new(conn), rx)
    }

    fn event(family: FamilyId) -> EventEnvelope {
        EventEnvelope::task_deleted(family, Uuid::new_v4())
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Duration::from_millis(50))
    }

    // ── join / leave ────────────────────────────────────────────────

    #[test]
    fn join_creates_group() {
        let reg = registry();
        let family = FamilyId::random();
        let (conn, _rx) = make_connection(family, 4);

        assert!(!reg.contains_group(family));
        assert!(reg.join(family, conn.clone()));
        assert!(reg.contains_group(family));
        assert!(reg.is_member(family, &conn.id));
        assert_eq!(reg.group_size(family), 1);
    }

    #[test]
    fn join_is_idempotent() {
        let reg = registry();
        let family = FamilyId::random();
        let (conn, _rx) = make_connection(family, 4);

        assert!(reg.join(family, conn.clone()));
        assert!(!reg.join(family, conn));
        assert_eq!(reg.group_size(family), 1);
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn leaving_last_member_removes_group() {
        let reg = registry();
        let family = FamilyId::random();
        let (a, _ra) = make_connection(family, 4);
        let (b, _rb) = make_connection(family, 4);
        let _ = reg.join(family, a.clone());
        let _ = reg.join(family, b.clone());

        assert!(reg.leave(family, &a.id));
        assert!(reg.contains_group(family));
        assert!(reg.leave(family, &b.id));
        assert!(!reg.contains_group(family));
        assert_eq!(reg.group_count(), 0);
    }

    #[test]
    fn leave_twice_is_noop() {
        let reg = registry();
        let family = FamilyId::random();
        let (conn, _rx) = make_connection(family, 4);
        let _ = reg.join(family, conn.clone());

        assert!(reg.leave(family, &conn.id));
        assert!(!reg.leave(family, &conn.id));
        assert!(!reg.contains_group(family));
    }

    #[test]
    fn leave_unknown_group_does_not_create_it() {
        let reg = registry();
        let family = FamilyId::random();
        assert!(!reg.leave(family, &ConnectionId::new()));
        assert!(!reg.contains_group(family));
    }

    #[test]
    fn leave_absent_member_keeps_group() {
        let reg = registry();
        let family = FamilyId::random();
        let (conn, _rx) = make_connection(family, 4);
        let _ = reg.join(family, conn);

        assert!(!reg.leave(family, &ConnectionId::new()));
        assert_eq!(reg.group_size(family), 1);
    }

    #[test]
    fn scoped_membership_leaves_on_drop() {
        let reg = Arc::new(registry());
        let family = FamilyId::random();
        let (conn, _rx) = make_connection(family, 4);

        let membership = reg.join_scoped(family, conn.clone());
        assert_eq!(membership.family(), family);
        assert!(reg.is_member(family, &conn.id));
        drop(membership);
        assert!(!reg.contains_group(family));
    }

    #[tokio::test]
    async fn scoped_membership_leaves_on_panic() {
        let reg = Arc::new(registry());
        let family = FamilyId::random();
        let (conn, _rx) = make_connection(family, 4);

        let task_reg = reg.clone();
        let result = tokio::spawn(async move {
            let _membership = task_reg.join_scoped(family, conn);
            panic!("session blew up");
        })
        .await;

        assert!(result.unwrap_err().is_panic());
        assert!(!reg.contains_group(family));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_all_land() {
        const N: usize = 64;
        let reg = Arc::new(registry());
        let family = FamilyId::random();

        let mut receivers = Vec::with_capacity(N);
        let mut handles = Vec::with_capacity(N);
        for _ in 0..N {
            let (conn, rx) = make_connection(family, 4);
            receivers.push(rx);
            let reg = reg.clone();
            handles.push(tokio::spawn(async move { reg.join(family, conn) }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(reg.group_size(family), N);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_join_leave_leaves_no_empty_group() {
        let reg = Arc::new(registry());
        let family = FamilyId::random();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                let (conn, _rx) = make_connection(family, 1);
                let _ = reg.join(family, conn.clone());
                tokio::task::yield_now().await;
                let _ = reg.leave(family, &conn.id);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(!reg.contains_group(family));
        assert_eq!(reg.group_count(), 0);
    }

    // ── broadcast ───────────────────────────────────────────────────

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let reg = registry();
        let family = FamilyId::random();
        let (a, mut ra) = make_connection(family, 4);
        let (b, mut rb) = make_connection(family, 4);
        let _ = reg.join(family, a);
        let _ = reg.join(family, b);

        let envelope = event(family);
        let report = reg.broadcast(family, &envelope).await;
        assert_eq!(
            report,
            BroadcastReport {
                attempted: 2,
                delivered: 2,
                evicted: 0
            }
        );

        let expected = envelope.to_json().unwrap();
        assert_eq!(*ra.recv().await.unwrap(), expected);
        assert_eq!(*rb.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_group_is_noop() {
        let reg = registry();
        let family = FamilyId::random();
        let report = reg.broadcast(family, &event(family)).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(!reg.contains_group(family));
    }

    #[tokio::test]
    async fn groups_are_isolated() {
        let reg = registry();
        let f = FamilyId::random();
        let g = FamilyId::random();
        let (a, mut ra) = make_connection(f, 4);
        let (c, mut rc) = make_connection(g, 4);
        let _ = reg.join(f, a);
        let _ = reg.join(g, c);

        let report = reg.broadcast(f, &event(f)).await;
        assert_eq!(report.delivered, 1);
        assert!(ra.try_recv().is_ok());
        assert!(rc.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_member_is_evicted_and_skipped_next_time() {
        let reg = registry();
        let family = FamilyId::random();
        let (a, mut ra) = make_connection(family, 4);
        let (b, rb) = make_connection(family, 4);
        let _ = reg.join(family, a.clone());
        let _ = reg.join(family, b.clone());

        // B's writer is gone.
        drop(rb);

        let first = reg.broadcast(family, &event(family)).await;
        assert_eq!(first.attempted, 2);
        assert_eq!(first.delivered, 1);
        assert_eq!(first.evicted, 1);
        assert!(!reg.is_member(family, &b.id));
        assert!(b.is_closed());
        assert!(!a.is_closed());

        let second = reg.broadcast(family, &event(family)).await;
        assert_eq!(second.attempted, 1);
        assert_eq!(second.delivered, 1);
        assert!(ra.try_recv().is_ok());
        assert!(ra.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_member_times_out_without_blocking_others() {
        let reg = ConnectionRegistry::new(Duration::from_millis(20));
        let family = FamilyId::random();
        let (fast, mut fast_rx) = make_connection(family, 4);
        let (stalled, _stalled_rx) = make_connection(family, 1);
        let _ = reg.join(family, fast);
        let _ = reg.join(family, stalled.clone());

        // Fill the stalled queue; its reader never drains.
        stalled
            .deliver(Arc::new("backlog".into()), Duration::from_millis(1))
            .await
            .unwrap();

        let report = reg.broadcast(family, &event(family)).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert!(fast_rx.try_recv().is_ok());
        assert!(!reg.is_member(family, &stalled.id));
        assert!(stalled.is_closed());
    }

    #[tokio::test]
    async fn evicting_sole_member_removes_group() {
        let reg = registry();
        let family = FamilyId::random();
        let (only, rx) = make_connection(family, 4);
        let _ = reg.join(family, only);
        drop(rx);

        let report = reg.broadcast(family, &event(family)).await;
        assert_eq!(report.evicted, 1);
        assert!(!reg.contains_group(family));
    }

    #[test]
    fn counts_span_groups() {
        let reg = registry();
        let f = FamilyId::random();
        let g = FamilyId::random();
        let (a, _ra) = make_connection(f, 1);
        let (b, _rb) = make_connection(f, 1);
        let (c, _rc) = make_connection(g, 1);
        let _ = reg.join(f, a);
        let _ = reg.join(f, b);
        let _ = reg.join(g, c);
        assert_eq!(reg.group_count(), 2);
        assert_eq!(reg.connection_count(), 3);
    }

    // ── model check ─────────────────────────────────────────────────

    mod model {
        use std::collections::{HashMap, HashSet};

        use proptest::prelude::*;

        use super::*;

        const FAMILIES: usize = 3;
        const CONNECTIONS: usize = 6;

        #[derive(Debug, Clone)]
        enum Op {
            Join(usize, usize),
            Leave(usize, usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..FAMILIES, 0..CONNECTIONS).prop_map(|(f, c)| Op::Join(f, c)),
                (0..FAMILIES, 0..CONNECTIONS).prop_map(|(f, c)| Op::Leave(f, c)),
            ]
        }

        proptest! {
            #[test]
            fn registry_matches_set_model(ops in prop::collection::vec(op(), 0..64)) {
                let reg = registry();
                let families: Vec<FamilyId> = (0..FAMILIES).map(|_| FamilyId::random()).collect();
                let conns: Vec<(Arc<ClientConnection>, Rx)> = (0..CONNECTIONS)
                    .map(|_| make_connection(families[0], 1))
                    .collect();
                let mut model: HashMap<usize, HashSet<usize>> = HashMap::new();

                for op in ops {
                    match op {
                        Op::Join(f, c) => {
                            let added = reg.join(families[f], conns[c].0.clone());
                            prop_assert_eq!(added, model.entry(f).or_default().insert(c));
                        }
                        Op::Leave(f, c) => {
                            let removed = reg.leave(families[f], &conns[c].0.id);
                            let expected = model.get_mut(&f).is_some_and(|set| set.remove(&c));
                            if model.get(&f).is_some_and(HashSet::is_empty) {
                                let _ = model.remove(&f);
                            }
                            prop_assert_eq!(removed, expected);
                        }
                    }

                    prop_assert_eq!(reg.group_count(), model.len());
                    for (i, family) in families.iter().enumerate() {
                        let size = model.get(&i).map_or(0, HashSet::len);
                        prop_assert_eq!(reg.group_size(*family), size);
                        prop_assert_eq!(reg.contains_group(*family), size > 0);
                    }
                }
            }
        }
    }
}
