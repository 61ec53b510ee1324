use std::collections::{HashMap, HashSet};

use actix::prelude::*;

use crate::raft::rpc::RaftMessage;
use crate::raft::types::NodeId;

/// An envelope fired at the transport by a replica. Delivery is best-effort;
/// the protocol tolerates loss, reordering and duplication
#[derive(Message)]
#[rtype(result = "()")]
pub struct Outbound {
    pub from: NodeId,
    pub to: NodeId,
    pub message: RaftMessage,
}

/// An envelope arriving at a replica from the transport
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver {
    pub from: NodeId,
    pub message: RaftMessage,
}

/// Register a replica's inbox with the router
#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub node_id: NodeId,
    pub inbox: Recipient<Deliver>,
}

/// Cut a replica off from the rest of the cluster; envelopes to or from it
/// are silently dropped
#[derive(Message)]
#[rtype(result = "()")]
pub struct Partition(pub NodeId);

/// Reconnect a previously partitioned replica
#[derive(Message)]
#[rtype(result = "()")]
pub struct Heal(pub NodeId);

/// In-process message router standing in for a real network. Used by the
/// demo binary and the cluster tests; the production transport lives behind
/// the same `Recipient<Outbound>` seam
#[derive(Default)]
pub struct LocalRouter {
    inboxes: HashMap<NodeId, Recipient<Deliver>>,
    partitioned: HashSet<NodeId>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for LocalRouter {
    type Context = Context<Self>;
}

impl Handler<Register> for LocalRouter {
    type Result = ();

    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) -> Self::Result {
        self.inboxes.insert(msg.node_id, msg.inbox);
    }
}

impl Handler<Outbound> for LocalRouter {
    type Result = ();

    fn handle(&mut self, msg: Outbound, _ctx: &mut Self::Context) -> Self::Result {
        if self.partitioned.contains(&msg.from) || self.partitioned.contains(&msg.to) {
            tracing::trace!("Dropping {} -> {} (partitioned)", msg.from, msg.to);
            return;
        }
        if let Some(inbox) = self.inboxes.get(&msg.to) {
            inbox.do_send(Deliver {
                from: msg.from,
                message: msg.message,
            });
        } else {
            tracing::warn!("No inbox registered for {}", msg.to);
        }
    }
}

impl Handler<Partition> for LocalRouter {
    type Result = ();

    fn handle(&mut self, msg: Partition, _ctx: &mut Self::Context) -> Self::Result {
        tracing::info!("Partitioning {}", msg.0);
        self.partitioned.insert(msg.0);
    }
}

impl Handler<Heal> for LocalRouter {
    type Result = ();

    fn handle(&mut self, msg: Heal, _ctx: &mut Self::Context) -> Self::Result {
        tracing::info!("Healing partition for {}", msg.0);
        self.partitioned.remove(&msg.0);
    }
}
