use std::time::Duration;

use actix::prelude::*;
use replikv::{
    config::ReplicaConfig,
    raft::actor::{Get, GetState, Put, PutOutcome, ReplicaActor, SetTransport},
    transport::{LocalRouter, Register},
};

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting a 3-replica in-process cluster...");

    let peers: Vec<String> = (1..=3).map(|i| format!("replica-{}", i)).collect();
    let router = LocalRouter::new().start();

    let mut replicas = Vec::new();
    for node_id in &peers {
        let config = ReplicaConfig {
            node_id: node_id.clone(),
            ..Default::default()
        };
        let replica = ReplicaActor::in_memory(config, peers.clone())?.start();
        router.send(Register {
            node_id: node_id.clone(),
            inbox: replica.clone().recipient(),
        })
        .await?;
        replica.send(SetTransport(router.clone().recipient())).await?;
        replicas.push(replica);
    }

    // Let an election settle
    let leader = loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut found = None;
        for replica in &replicas {
            let info = replica.send(GetState).await?;
            if info.role == replikv::raft::state::ReplicaRole::Leader {
                found = Some((replica.clone(), info));
            }
        }
        if let Some(found) = found {
            break found;
        }
    };
    tracing::info!("Leader elected: {} (term {})", leader.1.node_id, leader.1.current_term);

    let outcome = leader
        .0
        .send(Put {
            key: "greeting".to_string(),
            value: "hello".to_string(),
            message_id: "demo-1".to_string(),
            deadline: Duration::from_secs(2),
        })
        .await?;

    match outcome {
        PutOutcome::Committed { index } => {
            tracing::info!("PUT committed at index {}", index)
        }
        other => anyhow::bail!("PUT did not commit: {:?}", other),
    }

    // Give replication a heartbeat to fan out, then read from every replica
    tokio::time::sleep(Duration::from_millis(300)).await;
    for replica in &replicas {
        let info = replica.send(GetState).await?;
        let value = replica
            .send(Get {
                key: "greeting".to_string(),
            })
            .await?;
        tracing::info!(
            "{}: role={} term={} greeting={:?}",
            info.node_id,
            info.role,
            info.current_term,
            value
        );
    }

    Ok(())
}
