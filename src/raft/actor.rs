use std::collections::HashMap;
use std::time::Duration;

use actix::prelude::*;
use rand::Rng;
use tokio::sync::oneshot;

use super::election::{create_request_vote, handle_request_vote, handle_request_vote_response};
use super::replication::{
    advance_commit_index, create_append_entries, handle_append_entries,
    handle_append_entries_response,
};
use super::rpc::RaftMessage;
use super::state::{ReplicaRole, ReplicaState};
use super::types::{LogEntry, LogIndex, MessageId, NodeId, Term};
use crate::config::ReplicaConfig;
use crate::kv::KvStore;
use crate::storage::{
    FileLogStore, FileStateStore, LogStore, MemoryLogStore, MemoryStateStore, StateStore,
};
use crate::transport::{Deliver, Outbound};
use crate::util::errors::{RaftError, Result};

/// Wire the replica to its transport
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetTransport(pub Recipient<Outbound>);

/// Client write. Resolves once the entry is applied, or fails on redirect,
/// leadership change or deadline. `message_id` makes retries idempotent
#[derive(Message)]
#[rtype(result = "PutOutcome")]
pub struct Put {
    pub key: String,
    pub value: String,
    pub message_id: MessageId,
    pub deadline: Duration,
}

/// Client-facing outcome of a Put. Never "maybe committed": a failure is
/// always safe to retry with the same message_id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Committed { index: LogIndex },
    Redirect { leader_hint: Option<NodeId> },
    Failed,
}

/// Client read, served from this replica's applied state. May be stale;
/// see the read policy note in DESIGN.md
#[derive(Message)]
#[rtype(result = "Option<String>")]
pub struct Get {
    pub key: String,
}

/// Current replica state, for monitoring and the test harness
#[derive(Message)]
#[rtype(result = "ReplicaStateInfo")]
pub struct GetState;

#[derive(Debug, Clone)]
pub struct ReplicaStateInfo {
    pub node_id: NodeId,
    pub role: ReplicaRole,
    pub current_term: Term,
    pub current_leader: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
}

impl<A, M> actix::dev::MessageResponse<A, M> for ReplicaStateInfo
where
    A: Actor,
    M: Message<Result = ReplicaStateInfo>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

/// Election timer fired with no heartbeat since the last reset
struct ElectionTimeout;

impl Message for ElectionTimeout {
    type Result = ();
}

/// Heartbeat cadence tick (leaders only)
struct HeartbeatTick;

impl Message for HeartbeatTick {
    type Result = ();
}

/// A client write waiting for its log index to be applied
struct PendingWrite {
    index: LogIndex,
    waiters: Vec<oneshot::Sender<PutOutcome>>,
}

/// One replica of the key-value store. The actor owns all mutable state and
/// processes messages and timer events strictly sequentially; outbound sends
/// are fire-and-forget through the transport recipient
pub struct ReplicaActor {
    state: ReplicaState,
    log_store: Box<dyn LogStore>,
    state_store: Box<dyn StateStore>,
    kv: KvStore,
    config: ReplicaConfig,
    /// Every replica id in the cluster, including this one
    peers: Vec<NodeId>,
    election_timeout_handle: Option<SpawnHandle>,
    heartbeat_handle: Option<SpawnHandle>,
    transport: Option<Recipient<Outbound>>,
    pending: HashMap<MessageId, PendingWrite>,
}

impl Actor for ReplicaActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("Replica {} started", self.state.node_id);
        self.reset_election_timeout(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Replica {} stopped", self.state.node_id);
    }
}

impl ReplicaActor {
    pub fn new(
        config: ReplicaConfig,
        peers: Vec<NodeId>,
        log_store: Box<dyn LogStore>,
        state_store: Box<dyn StateStore>,
    ) -> Result<Self> {
        config.validate()?;
        if !peers.contains(&config.node_id) {
            return Err(RaftError::InvalidConfig(
                "peer list must include this replica's own id".into(),
            ));
        }

        let mut state = ReplicaState::new(config.node_id.clone());
        let durable = state_store.load()?;
        state.current_term = durable.current_term;
        state.voted_for = durable.voted_for;

        Ok(Self {
            state,
            log_store,
            state_store,
            kv: KvStore::new(),
            config,
            peers,
            election_timeout_handle: None,
            heartbeat_handle: None,
            transport: None,
            pending: HashMap::new(),
        })
    }

    /// Replica with volatile stores, for in-process clusters and tests
    pub fn in_memory(config: ReplicaConfig, peers: Vec<NodeId>) -> Result<Self> {
        Self::new(
            config,
            peers,
            Box::new(MemoryLogStore::new()),
            Box::new(MemoryStateStore::new()),
        )
    }

    /// Replica with file-backed log and term/vote state under `data_dir`
    pub fn durable(config: ReplicaConfig, peers: Vec<NodeId>) -> Result<Self> {
        let log_store = FileLogStore::new(config.data_dir.join("log"))?;
        let state_store = FileStateStore::new(config.data_dir.join("state"))?;
        Self::new(config, peers, Box::new(log_store), Box::new(state_store))
    }

    fn cluster_size(&self) -> usize {
        self.peers.len()
    }

    fn send_to(&self, to: &NodeId, message: RaftMessage) {
        if let Some(transport) = &self.transport {
            transport.do_send(Outbound {
                from: self.state.node_id.clone(),
                to: to.clone(),
                message,
            });
        }
    }

    /// Cancel and re-arm the election timer with a fresh random duration.
    /// The jitter is redrawn on every reset so replicas that timed out
    /// together do not keep timing out together
    fn reset_election_timeout(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.election_timeout_handle.take() {
            ctx.cancel_future(handle);
        }

        let min_ms = self.config.election_timeout_min_ms;
        let max_ms = min_ms + self.config.election_timeout_window_ms;
        let timeout_ms = rand::thread_rng().gen_range(min_ms..max_ms);

        tracing::debug!(
            "Replica {} reset election timeout to {}ms",
            self.state.node_id,
            timeout_ms
        );

        let handle = ctx.run_later(Duration::from_millis(timeout_ms), |_act, ctx| {
            ctx.notify(ElectionTimeout);
        });
        self.election_timeout_handle = Some(handle);
    }

    fn start_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_handle.take() {
            ctx.cancel_future(handle);
        }
        let interval = self.config.heartbeat_interval();
        let handle = ctx.run_interval(interval, |_act, ctx| {
            ctx.notify(HeartbeatTick);
        });
        self.heartbeat_handle = Some(handle);
    }

    fn stop_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_handle.take() {
            ctx.cancel_future(handle);
        }
    }

    fn start_election(&mut self, ctx: &mut Context<Self>) {
        self.state.become_candidate();

        // Durable before any vote request leaves this replica
        if let Err(e) = self.state_store.save_term(self.state.current_term) {
            tracing::error!("Failed to save term: {}", e);
        }
        if let Err(e) = self.state_store.save_voted_for(self.state.voted_for.clone()) {
            tracing::error!("Failed to save voted_for: {}", e);
        }

        let request = create_request_vote(&self.state, self.log_store.as_ref());

        tracing::info!(
            "Replica {} starting election for term {}",
            self.state.node_id,
            self.state.current_term
        );

        for peer in &self.peers {
            if peer != &self.state.node_id {
                self.send_to(peer, RaftMessage::RequestVote(request.clone()));
            }
        }

        // A cluster of one wins on its own vote; there is nobody to answer
        if self.state.has_majority(self.cluster_size()) {
            self.become_leader(ctx);
            return;
        }

        self.reset_election_timeout(ctx);
    }

    fn become_leader(&mut self, ctx: &mut Context<Self>) {
        let last_log_index = self.log_store.last_index();
        let peers = self.peers.clone();
        self.state.become_leader(last_log_index, &peers);

        if let Some(handle) = self.election_timeout_handle.take() {
            ctx.cancel_future(handle);
        }
        self.start_heartbeat_timer(ctx);

        // Empty AppendEntries asserts authority immediately
        self.broadcast_append_entries();
    }

    fn broadcast_append_entries(&mut self) {
        if !self.state.is_leader() {
            return;
        }
        for peer in self.peers.clone() {
            if peer == self.state.node_id {
                continue;
            }
            match create_append_entries(&self.state, self.log_store.as_ref(), &peer) {
                Ok(request) => {
                    self.send_to(&peer, RaftMessage::AppendEntries(request));
                }
                Err(e) => {
                    tracing::error!("Failed to create AppendEntries for {}: {}", peer, e);
                }
            }
        }
    }

    /// Apply newly committed entries in index order, exactly once each, and
    /// release any client writes waiting on them
    fn apply_committed(&mut self) {
        while self.state.commit_index > self.state.last_applied {
            let next = self.state.last_applied + 1;
            let entry = match self.log_store.get(next) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    tracing::error!(
                        "Replica {}: {}",
                        self.state.node_id,
                        RaftError::IndexOutOfRange(next)
                    );
                    return;
                }
                Err(e) => {
                    tracing::error!("Replica {} failed to read log: {}", self.state.node_id, e);
                    return;
                }
            };

            self.kv.apply(&entry);
            self.state.last_applied = next;
            tracing::debug!(
                "Replica {} applied index {} ({}={})",
                self.state.node_id,
                next,
                entry.key,
                entry.value
            );

            if let Some(pending) = self.pending.remove(&entry.message_id) {
                for waiter in pending.waiters {
                    let _ = waiter.send(PutOutcome::Committed { index: entry.index });
                }
            }
        }
    }

    /// Release every waiting client write with a failure. Called when this
    /// replica stops being leader; the writes may still commit under the new
    /// leader, and clients retry idempotently by message_id
    fn fail_pending_writes(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::warn!(
            "Replica {} releasing {} pending writes after losing leadership",
            self.state.node_id,
            self.pending.len()
        );
        for (_, pending) in self.pending.drain() {
            for waiter in pending.waiters {
                let _ = waiter.send(PutOutcome::Failed);
            }
        }
    }

    /// Housekeeping after any inbound message: persist an advanced term,
    /// re-arm timers for a demoted replica, release orphaned client writes
    fn after_dispatch(&mut self, ctx: &mut Context<Self>, term_before: Term) {
        let term_changed = self.state.current_term != term_before;

        if term_changed {
            if let Err(e) = self.state_store.save_term(self.state.current_term) {
                tracing::error!("Failed to save term: {}", e);
            }
            if let Err(e) = self.state_store.save_voted_for(self.state.voted_for.clone()) {
                tracing::error!("Failed to save voted_for: {}", e);
            }
        }

        if !self.state.is_leader() {
            self.stop_heartbeat_timer(ctx);
            self.fail_pending_writes();
            if term_changed {
                self.reset_election_timeout(ctx);
            }
        }
    }
}

impl Handler<SetTransport> for ReplicaActor {
    type Result = ();

    fn handle(&mut self, msg: SetTransport, _ctx: &mut Self::Context) -> Self::Result {
        self.transport = Some(msg.0);
    }
}

impl Handler<Deliver> for ReplicaActor {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) -> Self::Result {
        let term_before = self.state.current_term;

        match msg.message {
            RaftMessage::RequestVote(request) => {
                match handle_request_vote(
                    &mut self.state,
                    self.state_store.as_mut(),
                    self.log_store.as_ref(),
                    request,
                ) {
                    Ok(response) => {
                        // Granting defers to the candidate; hold our own timer back
                        if response.vote_granted {
                            self.reset_election_timeout(ctx);
                        }
                        self.send_to(&msg.from, RaftMessage::RequestVoteResponse(response));
                    }
                    Err(e) => {
                        tracing::error!(
                            "Replica {} failed to handle RequestVote: {}",
                            self.state.node_id,
                            e
                        );
                    }
                }
            }

            RaftMessage::RequestVoteResponse(response) => {
                let cluster_size = self.cluster_size();
                match handle_request_vote_response(
                    &mut self.state,
                    msg.from,
                    response,
                    cluster_size,
                ) {
                    Ok(true) => self.become_leader(ctx),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            "Replica {} failed to handle vote response: {}",
                            self.state.node_id,
                            e
                        );
                    }
                }
            }

            RaftMessage::AppendEntries(request) => {
                let request_term = request.term;
                match handle_append_entries(
                    &mut self.state,
                    self.state_store.as_mut(),
                    self.log_store.as_mut(),
                    request,
                ) {
                    Ok(response) => {
                        // Equal terms after handling means the sender is the
                        // legitimate leader; only then does its message count
                        // as a heartbeat
                        if request_term == self.state.current_term {
                            self.reset_election_timeout(ctx);
                        }
                        self.apply_committed();
                        self.send_to(&msg.from, RaftMessage::AppendEntriesResponse(response));
                    }
                    Err(e) => {
                        tracing::error!(
                            "Replica {} failed to handle AppendEntries: {}",
                            self.state.node_id,
                            e
                        );
                    }
                }
            }

            RaftMessage::AppendEntriesResponse(response) => {
                match handle_append_entries_response(
                    &mut self.state,
                    self.log_store.as_ref(),
                    msg.from,
                    response,
                ) {
                    Ok(true) => self.apply_committed(),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            "Replica {} failed to handle append response: {}",
                            self.state.node_id,
                            e
                        );
                    }
                }
            }
        }

        self.after_dispatch(ctx, term_before);
    }
}

impl Handler<ElectionTimeout> for ReplicaActor {
    type Result = ();

    fn handle(&mut self, _msg: ElectionTimeout, ctx: &mut Self::Context) -> Self::Result {
        if self.state.is_leader() {
            // Leaders do not run elections against themselves
            return;
        }

        tracing::info!(
            "Replica {} election timeout, starting election",
            self.state.node_id
        );
        self.start_election(ctx);
    }
}

impl Handler<HeartbeatTick> for ReplicaActor {
    type Result = ();

    fn handle(&mut self, _msg: HeartbeatTick, _ctx: &mut Self::Context) -> Self::Result {
        if !self.state.is_leader() {
            return;
        }
        tracing::debug!("Leader {} sending heartbeats", self.state.node_id);
        self.broadcast_append_entries();
    }
}

impl Handler<Put> for ReplicaActor {
    type Result = ResponseFuture<PutOutcome>;

    fn handle(&mut self, msg: Put, _ctx: &mut Self::Context) -> Self::Result {
        if !self.state.is_leader() {
            let leader_hint = self.state.current_leader.clone();
            return Box::pin(async move { PutOutcome::Redirect { leader_hint } });
        }

        let (tx, rx) = oneshot::channel();

        if let Some(pending) = self.pending.get_mut(&msg.message_id) {
            // Retry of an in-flight write: wait on the same index instead of
            // appending a second entry
            tracing::debug!(
                "Leader {} attaching retry of {} to pending index {}",
                self.state.node_id,
                msg.message_id,
                pending.index
            );
            pending.waiters.push(tx);
        } else {
            let index = self.log_store.last_index() + 1;
            let entry = LogEntry::new(
                self.state.current_term,
                index,
                msg.message_id.clone(),
                msg.key,
                msg.value,
            );

            if let Err(e) = self.log_store.append(vec![entry]) {
                tracing::error!(
                    "Leader {} failed to append client write: {}",
                    self.state.node_id,
                    e
                );
                return Box::pin(async { PutOutcome::Failed });
            }

            tracing::info!(
                "Leader {} appended entry at index {}",
                self.state.node_id,
                index
            );

            self.pending.insert(
                msg.message_id,
                PendingWrite {
                    index,
                    waiters: vec![tx],
                },
            );

            // Replicate now rather than waiting out the heartbeat interval
            self.broadcast_append_entries();

            // A cluster of one is its own majority
            match advance_commit_index(&mut self.state, self.log_store.as_ref()) {
                Ok(true) => self.apply_committed(),
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to advance commit index: {}", e),
            }
        }

        let deadline = msg.deadline;
        Box::pin(async move {
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(outcome)) => outcome,
                // Sender dropped or deadline elapsed: not committed as far as
                // this caller knows, safe to retry
                _ => PutOutcome::Failed,
            }
        })
    }
}

impl Handler<Get> for ReplicaActor {
    type Result = MessageResult<Get>;

    fn handle(&mut self, msg: Get, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.kv.get(&msg.key).map(str::to_string))
    }
}

impl Handler<GetState> for ReplicaActor {
    type Result = ReplicaStateInfo;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Self::Context) -> Self::Result {
        ReplicaStateInfo {
            node_id: self.state.node_id.clone(),
            role: self.state.role,
            current_term: self.state.current_term,
            current_leader: self.state.current_leader.clone(),
            commit_index: self.state.commit_index,
            last_applied: self.state.last_applied,
            last_log_index: self.log_store.last_index(),
        }
    }
}
