use super::rpc::{RequestVoteRequest, RequestVoteResponse};
use super::state::ReplicaState;
use super::types::NodeId;
use crate::storage::{LogStore, StateStore};
use crate::util::errors::Result;

/// Build the vote request a fresh candidate broadcasts to every peer
pub fn create_request_vote<L: LogStore + ?Sized>(
    state: &ReplicaState,
    log_store: &L,
) -> RequestVoteRequest {
    RequestVoteRequest {
        term: state.current_term,
        candidate_id: state.node_id.clone(),
        last_log_index: log_store.last_index(),
        last_log_term: log_store.last_term(),
    }
}

/// Handle an incoming RequestVote RPC.
///
/// Grants iff the candidate's term is current, we have not voted for anyone
/// else this term, and the candidate's log is at least as up-to-date as ours
/// by (last_log_term, last_log_index).
pub fn handle_request_vote<L: LogStore + ?Sized, S: StateStore + ?Sized>(
    state: &mut ReplicaState,
    state_store: &mut S,
    log_store: &L,
    request: RequestVoteRequest,
) -> Result<RequestVoteResponse> {
    tracing::debug!(
        "Replica {} received RequestVote from {} (term: {})",
        state.node_id,
        request.candidate_id,
        request.term
    );

    // A higher term demotes us before we consider the vote
    if request.term > state.current_term {
        state.update_term(request.term);
        state_store.save_term(state.current_term)?;
        state_store.save_voted_for(None)?;
    }

    let mut vote_granted = false;

    if request.term >= state.current_term {
        let can_vote = state.voted_for.is_none()
            || state.voted_for.as_ref() == Some(&request.candidate_id);

        if can_vote {
            let last_log_term = log_store.last_term();
            let last_log_index = log_store.last_index();

            let log_is_up_to_date = request.last_log_term > last_log_term
                || (request.last_log_term == last_log_term
                    && request.last_log_index >= last_log_index);

            if log_is_up_to_date {
                vote_granted = true;
                state.voted_for = Some(request.candidate_id.clone());
                // Durable before the grant leaves this replica
                state_store.save_voted_for(state.voted_for.clone())?;

                tracing::info!(
                    "Replica {} granted vote to {} in term {}",
                    state.node_id,
                    request.candidate_id,
                    request.term
                );
            } else {
                tracing::debug!(
                    "Replica {} denied vote to {} - log not up-to-date",
                    state.node_id,
                    request.candidate_id
                );
            }
        } else {
            tracing::debug!(
                "Replica {} denied vote to {} - already voted for {:?}",
                state.node_id,
                request.candidate_id,
                state.voted_for
            );
        }
    } else {
        tracing::debug!(
            "Replica {} denied vote to {} - request term {} < current term {}",
            state.node_id,
            request.candidate_id,
            request.term,
            state.current_term
        );
    }

    Ok(RequestVoteResponse {
        term: state.current_term,
        vote_granted,
    })
}

/// Handle a vote response while campaigning. Returns true if this vote
/// completed a strict majority and we should become leader
pub fn handle_request_vote_response(
    state: &mut ReplicaState,
    from: NodeId,
    response: RequestVoteResponse,
    total_nodes: usize,
) -> Result<bool> {
    // A denial from a higher term means we are stale
    if response.term > state.current_term {
        state.update_term(response.term);
        return Ok(false);
    }

    // Late responses from an abandoned candidacy or an old term carry no weight
    if !state.is_candidate() || response.term < state.current_term {
        return Ok(false);
    }

    if response.vote_granted {
        state.add_vote(from.clone());

        tracing::debug!(
            "Replica {} received vote from {} ({}/{} votes)",
            state.node_id,
            from,
            state.votes_received.len(),
            total_nodes
        );

        if state.has_majority(total_nodes) {
            tracing::info!(
                "Replica {} won election in term {} with {} votes",
                state.node_id,
                state.current_term,
                state.votes_received.len()
            );
            return Ok(true);
        }
    }

    Ok(false)
}
