//! Room broadcast dispatch.
//!
//! Delivers one bus payload to every local member of a room. Sends only push
//! into each connection's bounded outbound queue, so dispatch never waits on
//! client I/O. A member whose queue is full or closed is evicted (removed from
//! the registry and closed) and the loop moves on to the next member.

use std::sync::Arc;

use bytes::Bytes;
use chatrelay_proto::RoomName;

use crate::registry::ConnectionRegistry;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Members the payload was queued for
    pub delivered: usize,
    /// Members whose send failed (and were evicted)
    pub failed: usize,
}

/// Fans payloads out to room members.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Registry this dispatcher delivers to.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `payload` to every current member of `room`.
    ///
    /// Membership is sampled once at the start. Connections that join
    /// afterwards miss this payload; connections that leave afterwards may
    /// still be attempted, which fails harmlessly on their closed queue.
    pub fn dispatch(&self, room: &RoomName, payload: &Bytes) -> DispatchReport {
        let members = self.registry.snapshot(room);
        let mut report = DispatchReport::default();

        for conn in members {
            match conn.send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    if self.registry.evict(&conn) {
                        tracing::warn!(
                            conn_id = %conn.id(),
                            %room,
                            remote_addr = conn.remote_addr(),
                            error = %e,
                            "Broadcast send failed, connection evicted"
                        );
                    }
                },
            }
        }

        tracing::trace!(%room, delivered = report.delivered, failed = report.failed, "Dispatched");
        report
    }
}
