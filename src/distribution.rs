//! Optional hook surface for a distribution/clustering collaborator.
//!
//! The core owns no knowledge of how remote peers are implemented. A
//! `Runtime` without hooks installed simply never resolves any node id as
//! remote, so every code path that would consult these hooks is a no-op.

use async_trait::async_trait;

use crate::error::CallError;
use crate::ids::{MonitorRef, TerminateReason};

#[async_trait]
pub trait DistributionHooks: Send + Sync {
    /// Whether `node_id` is a known, reachable remote node.
    async fn resolve_remote(&self, node_id: &str) -> bool;

    /// Perform a `call` against a process on a remote node.
    async fn remote_call(
        &self,
        node_id: &str,
        target_id: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, CallError>;

    /// Perform a `cast` against a process on a remote node. Best-effort;
    /// the core never awaits a reply.
    async fn remote_cast(&self, node_id: &str, target_id: &str, payload: Vec<u8>);

    /// Establish a monitor against a process on a remote node.
    async fn remote_monitor(&self, node_id: &str, target_id: &str) -> MonitorRef;

    /// Inform a remote node that one of its monitors' local target has
    /// terminated.
    fn notify_peer_terminated(&self, node_id: &str, target_id: &str, reason: TerminateReason);
}
