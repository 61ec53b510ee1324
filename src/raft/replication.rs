use super::rpc::{AppendEntriesRequest, AppendEntriesResponse};
use super::state::ReplicaState;
use super::types::NodeId;
use crate::storage::{LogStore, StateStore};
use crate::util::errors::Result;

/// Build the AppendEntries request for one follower from its next_index.
/// With nothing outstanding this degenerates to an empty heartbeat
pub fn create_append_entries<L: LogStore + ?Sized>(
    state: &ReplicaState,
    log_store: &L,
    follower_id: &NodeId,
) -> Result<AppendEntriesRequest> {
    let next_index = state.next_index.get(follower_id).copied().unwrap_or(1);

    let prev_log_index = next_index.saturating_sub(1);
    let prev_log_term = if prev_log_index > 0 {
        log_store
            .get(prev_log_index)?
            .map(|e| e.term)
            .unwrap_or(0)
    } else {
        0
    };

    let last_log_index = log_store.last_index();
    let entries = if next_index <= last_log_index {
        log_store.get_range(next_index, last_log_index)?
    } else {
        Vec::new()
    };

    Ok(AppendEntriesRequest {
        term: state.current_term,
        leader_id: state.node_id.clone(),
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit: state.commit_index,
    })
}

/// Handle an incoming AppendEntries RPC on a follower or candidate.
///
/// On success the response carries the highest index now known to match the
/// leader's log, so the leader can update its progress maps without tracking
/// outstanding requests
pub fn handle_append_entries<L: LogStore + ?Sized, S: StateStore + ?Sized>(
    state: &mut ReplicaState,
    state_store: &mut S,
    log_store: &mut L,
    request: AppendEntriesRequest,
) -> Result<AppendEntriesResponse> {
    if request.term > state.current_term {
        state.update_term(request.term);
        state_store.save_term(state.current_term)?;
    }

    // Reply false if term < currentTerm
    if request.term < state.current_term {
        tracing::debug!(
            "Replica {} rejected AppendEntries from {} - stale term ({} < {})",
            state.node_id,
            request.leader_id,
            request.term,
            state.current_term
        );
        return Ok(AppendEntriesResponse::rejected(state.current_term, None, None));
    }

    // Valid leader for this term
    state.current_leader = Some(request.leader_id.clone());
    if state.is_candidate() {
        state.become_follower(request.term, Some(request.leader_id.clone()));
    }

    // Log-matching check: we must hold the entry preceding the new ones
    if request.prev_log_index > 0 {
        match log_store.get(request.prev_log_index)? {
            None => {
                tracing::debug!(
                    "Replica {} rejected AppendEntries - missing entry at index {}",
                    state.node_id,
                    request.prev_log_index
                );
                return Ok(AppendEntriesResponse::rejected(
                    state.current_term,
                    Some(log_store.last_index() + 1),
                    None,
                ));
            }
            Some(entry) => {
                if entry.term != request.prev_log_term {
                    tracing::debug!(
                        "Replica {} rejected AppendEntries - term mismatch at index {} ({} != {})",
                        state.node_id,
                        request.prev_log_index,
                        entry.term,
                        request.prev_log_term
                    );

                    // Point the leader at the first index of the conflicting term
                    let mut conflict_index = request.prev_log_index;
                    while conflict_index > 1 {
                        match log_store.get(conflict_index - 1)? {
                            Some(e) if e.term == entry.term => conflict_index -= 1,
                            _ => break,
                        }
                    }

                    return Ok(AppendEntriesResponse::rejected(
                        state.current_term,
                        Some(conflict_index),
                        Some(entry.term),
                    ));
                }
            }
        }
    }

    // Truncate on conflict, then append whatever we do not already hold
    if !request.entries.is_empty() {
        for (i, new_entry) in request.entries.iter().enumerate() {
            match log_store.get(new_entry.index)? {
                Some(existing) if existing.term == new_entry.term => {
                    // Already have this entry, keep scanning
                }
                Some(_) => {
                    tracing::info!(
                        "Replica {} found log conflict at index {}, truncating",
                        state.node_id,
                        new_entry.index
                    );
                    log_store.truncate_from(new_entry.index)?;
                    log_store.append(request.entries[i..].to_vec())?;
                    break;
                }
                None => {
                    log_store.append(request.entries[i..].to_vec())?;
                    break;
                }
            }
        }

        tracing::debug!(
            "Replica {} appended {} entries from leader {}",
            state.node_id,
            request.entries.len(),
            request.leader_id
        );
    }

    // Highest index this replica now knows matches the leader's log
    let match_index = request.prev_log_index + request.entries.len() as u64;

    if request.leader_commit > state.commit_index {
        let new_commit = std::cmp::min(request.leader_commit, match_index);
        if new_commit > state.commit_index {
            state.set_commit_index(new_commit);
            tracing::debug!(
                "Replica {} updated commit_index to {}",
                state.node_id,
                state.commit_index
            );
        }
    }

    Ok(AppendEntriesResponse {
        term: state.current_term,
        success: true,
        match_index,
        conflict_index: None,
        conflict_term: None,
    })
}

/// Handle an AppendEntries response on the leader. Returns true if the
/// commit index advanced
pub fn handle_append_entries_response<L: LogStore + ?Sized>(
    state: &mut ReplicaState,
    log_store: &L,
    from: NodeId,
    response: AppendEntriesResponse,
) -> Result<bool> {
    if response.term > state.current_term {
        state.update_term(response.term);
        return Ok(false);
    }

    if !state.is_leader() || response.term < state.current_term {
        return Ok(false);
    }

    if response.success {
        if let Some(match_idx) = state.match_index.get_mut(&from) {
            *match_idx = std::cmp::max(*match_idx, response.match_index);
        }
        if let Some(next_idx) = state.next_index.get_mut(&from) {
            *next_idx = std::cmp::max(*next_idx, response.match_index + 1);
        }

        tracing::debug!(
            "Leader {} updated match_index for {} to {}",
            state.node_id,
            from,
            response.match_index
        );

        advance_commit_index(state, log_store)
    } else {
        // Renegotiate next_index backwards; the retry itself rides the next
        // heartbeat rather than being re-sent immediately
        if let Some(conflict_index) = response.conflict_index {
            if let Some(next_idx) = state.next_index.get_mut(&from) {
                *next_idx = std::cmp::max(1, conflict_index);
                tracing::debug!(
                    "Leader {} moved next_index for {} back to {} (conflict)",
                    state.node_id,
                    from,
                    *next_idx
                );
            }
        } else if let Some(next_idx) = state.next_index.get_mut(&from) {
            if *next_idx > 1 {
                *next_idx -= 1;
            }
            tracing::debug!(
                "Leader {} decremented next_index for {} to {}",
                state.node_id,
                from,
                *next_idx
            );
        }
        Ok(false)
    }
}

/// Advance commit_index to the highest index replicated on a strict majority,
/// counting the leader's own log, and only across entries of the current term
pub fn advance_commit_index<L: LogStore + ?Sized>(
    state: &mut ReplicaState,
    log_store: &L,
) -> Result<bool> {
    if !state.is_leader() {
        return Ok(false);
    }

    let last_log_index = log_store.last_index();
    let mut advanced = false;

    for n in (state.commit_index + 1)..=last_log_index {
        let mut count = 1; // the leader's own log
        for match_idx in state.match_index.values() {
            if *match_idx >= n {
                count += 1;
            }
        }

        let total_nodes = state.match_index.len() + 1;
        let majority = (total_nodes / 2) + 1;

        if count >= majority {
            // Committing an older-term entry by count alone is the classic
            // safety pitfall; only current-term entries commit by majority
            if let Some(entry) = log_store.get(n)? {
                if entry.term == state.current_term {
                    state.set_commit_index(n);
                    advanced = true;
                    tracing::info!(
                        "Leader {} advanced commit_index to {}",
                        state.node_id,
                        n
                    );
                }
            }
        }
    }

    Ok(advanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::types::LogEntry;
    use crate::storage::{MemoryLogStore, MemoryStateStore};

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(term, index, format!("m{}", index), "key", "value")
    }

    fn follower(term: u64) -> (ReplicaState, MemoryStateStore, MemoryLogStore) {
        let mut state = ReplicaState::new("replica-1".to_string());
        state.current_term = term;
        (state, MemoryStateStore::new(), MemoryLogStore::new())
    }

    #[test]
    fn accepts_entries_and_reports_match_index() {
        let (mut state, mut state_store, mut log_store) = follower(1);

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "replica-2".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1), entry(1, 2)],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(response.success);
        assert_eq!(response.match_index, 2);
        assert_eq!(log_store.last_index(), 2);
        assert_eq!(state.current_leader, Some("replica-2".to_string()));
    }

    #[test]
    fn rejects_stale_term() {
        let (mut state, mut state_store, mut log_store) = follower(2);

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "replica-2".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(!response.success);
        assert_eq!(response.term, 2);
    }

    #[test]
    fn rejects_when_prev_entry_missing() {
        let (mut state, mut state_store, mut log_store) = follower(1);

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "replica-2".to_string(),
            prev_log_index: 3,
            prev_log_term: 1,
            entries: vec![entry(1, 4)],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(!response.success);
        // Hint points one past our (empty) tail so the leader can jump back
        assert_eq!(response.conflict_index, Some(1));
    }

    #[test]
    fn truncates_conflicting_suffix() {
        let (mut state, mut state_store, mut log_store) = follower(3);
        log_store
            .append(vec![entry(1, 1), entry(2, 2), entry(2, 3)])
            .unwrap();

        let request = AppendEntriesRequest {
            term: 3,
            leader_id: "replica-2".to_string(),
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![entry(3, 2)],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(response.success);
        assert_eq!(log_store.last_index(), 2);
        assert_eq!(log_store.get(2).unwrap().unwrap().term, 3);
    }

    #[test]
    fn does_not_truncate_on_duplicate_delivery() {
        let (mut state, mut state_store, mut log_store) = follower(1);
        log_store
            .append(vec![entry(1, 1), entry(1, 2), entry(1, 3)])
            .unwrap();

        // Re-delivery of an already-appended prefix must leave the tail alone
        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "replica-2".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1), entry(1, 2)],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(response.success);
        assert_eq!(log_store.last_index(), 3);
    }

    #[test]
    fn heartbeat_advances_follower_commit_up_to_matched_prefix() {
        let (mut state, mut state_store, mut log_store) = follower(1);
        log_store.append(vec![entry(1, 1), entry(1, 2)]).unwrap();

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "replica-2".to_string(),
            prev_log_index: 2,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 5,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(response.success);
        // Commit is clamped to what this heartbeat proved matching, not to
        // whatever the leader has committed globally
        assert_eq!(state.commit_index, 2);
    }

    #[test]
    fn candidate_steps_down_for_legitimate_leader() {
        let (mut state, mut state_store, mut log_store) = follower(0);
        state.become_candidate();
        assert_eq!(state.current_term, 1);

        let request = AppendEntriesRequest {
            term: 1,
            leader_id: "replica-2".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };

        let response =
            handle_append_entries(&mut state, &mut state_store, &mut log_store, request).unwrap();

        assert!(response.success);
        assert!(state.is_follower());
    }

    fn leader_with_peers(term: u64, log: Vec<LogEntry>) -> (ReplicaState, MemoryLogStore) {
        let mut state = ReplicaState::new("replica-1".to_string());
        let mut log_store = MemoryLogStore::new();
        log_store.append(log).unwrap();
        state.current_term = term.saturating_sub(1);
        state.become_candidate(); // bumps to `term`
        state.become_leader(
            log_store.last_index(),
            &[
                "replica-1".to_string(),
                "replica-2".to_string(),
                "replica-3".to_string(),
            ],
        );
        (state, log_store)
    }

    #[test]
    fn success_response_advances_progress_and_commit() {
        let (mut state, mut log_store) = leader_with_peers(1, vec![]);
        log_store.append(vec![entry(1, 1)]).unwrap();

        let response = AppendEntriesResponse {
            term: 1,
            success: true,
            match_index: 1,
            conflict_index: None,
            conflict_term: None,
        };

        let advanced = handle_append_entries_response(
            &mut state,
            &log_store,
            "replica-2".to_string(),
            response,
        )
        .unwrap();

        assert!(advanced);
        assert_eq!(state.commit_index, 1);
        assert_eq!(state.match_index["replica-2"], 1);
        assert_eq!(state.next_index["replica-2"], 2);
    }

    #[test]
    fn old_term_entries_never_commit_by_count_alone() {
        // Leader of term 3 holds an uncommitted entry from term 1
        let (mut state, log_store) = leader_with_peers(3, vec![entry(1, 1)]);
        // become_candidate in the helper bumped us to term 3
        assert_eq!(state.current_term, 3);

        let response = AppendEntriesResponse {
            term: 3,
            success: true,
            match_index: 1,
            conflict_index: None,
            conflict_term: None,
        };

        let advanced = handle_append_entries_response(
            &mut state,
            &log_store,
            "replica-2".to_string(),
            response,
        )
        .unwrap();

        assert!(!advanced);
        assert_eq!(state.commit_index, 0);
    }

    #[test]
    fn current_term_commit_carries_older_prefix() {
        let (mut state, mut log_store) = leader_with_peers(2, vec![entry(1, 1)]);
        assert_eq!(state.current_term, 2);
        log_store.append(vec![entry(2, 2)]).unwrap();

        let response = AppendEntriesResponse {
            term: 2,
            success: true,
            match_index: 2,
            conflict_index: None,
            conflict_term: None,
        };

        handle_append_entries_response(&mut state, &log_store, "replica-2".to_string(), response)
            .unwrap();

        // Committing the term-2 entry commits the term-1 entry beneath it
        assert_eq!(state.commit_index, 2);
    }

    #[test]
    fn failure_response_moves_next_index_back() {
        let (mut state, log_store) = leader_with_peers(1, vec![entry(1, 1), entry(1, 2)]);
        assert_eq!(state.next_index["replica-2"], 3);

        let plain_failure = AppendEntriesResponse::rejected(1, None, None);
        handle_append_entries_response(
            &mut state,
            &log_store,
            "replica-2".to_string(),
            plain_failure,
        )
        .unwrap();
        assert_eq!(state.next_index["replica-2"], 2);

        let with_hint = AppendEntriesResponse::rejected(1, Some(1), Some(1));
        handle_append_entries_response(
            &mut state,
            &log_store,
            "replica-2".to_string(),
            with_hint,
        )
        .unwrap();
        assert_eq!(state.next_index["replica-2"], 1);
    }

    #[test]
    fn higher_term_response_demotes_leader() {
        let (mut state, log_store) = leader_with_peers(1, vec![]);

        let response = AppendEntriesResponse::rejected(5, None, None);
        handle_append_entries_response(&mut state, &log_store, "replica-2".to_string(), response)
            .unwrap();

        assert!(state.is_follower());
        assert_eq!(state.current_term, 5);
    }

    #[test]
    fn create_sends_pending_suffix_with_prev_anchor() {
        let (state, mut log_store) = leader_with_peers(1, vec![]);
        log_store.append(vec![entry(1, 1), entry(1, 2)]).unwrap();

        let request = create_append_entries(&state, &log_store, &"replica-2".to_string()).unwrap();
        // next_index for the peer was initialized to 1 at election
        assert_eq!(request.prev_log_index, 0);
        assert_eq!(request.prev_log_term, 0);
        assert_eq!(request.entries.len(), 2);
        assert_eq!(request.leader_commit, 0);
    }
}
