#![allow(dead_code)]

use std::time::Duration;

use actix::prelude::*;
use replikv::{
    config::ReplicaConfig,
    raft::actor::{GetState, ReplicaActor, ReplicaStateInfo, SetTransport},
    raft::state::ReplicaRole,
    raft::types::NodeId,
    transport::{Heal, LocalRouter, Partition, Register},
};

/// In-process cluster of replicas joined through a LocalRouter
pub struct Cluster {
    pub router: Addr<LocalRouter>,
    pub replicas: Vec<(NodeId, Addr<ReplicaActor>)>,
}

impl Cluster {
    pub async fn start(size: usize) -> Self {
        let peers: Vec<NodeId> = (1..=size).map(|i| format!("replica-{}", i)).collect();
        let router = LocalRouter::new().start();

        let mut replicas = Vec::new();
        for node_id in &peers {
            let config = ReplicaConfig {
                node_id: node_id.clone(),
                ..Default::default()
            };
            let replica = ReplicaActor::in_memory(config, peers.clone())
                .expect("valid replica config")
                .start();
            router
                .send(Register {
                    node_id: node_id.clone(),
                    inbox: replica.clone().recipient(),
                })
                .await
                .unwrap();
            replica
                .send(SetTransport(router.clone().recipient()))
                .await
                .unwrap();
            replicas.push((node_id.clone(), replica));
        }

        Cluster { router, replicas }
    }

    pub fn addr_of(&self, node_id: &str) -> Addr<ReplicaActor> {
        self.replicas
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, addr)| addr.clone())
            .expect("unknown replica id")
    }

    pub async fn states(&self) -> Vec<ReplicaStateInfo> {
        let mut states = Vec::new();
        for (_, replica) in &self.replicas {
            states.push(replica.send(GetState).await.unwrap());
        }
        states
    }

    /// Poll until some replica (optionally excluding one) believes itself
    /// leader. Panics after five seconds without one
    pub async fn wait_for_leader(&self, exclude: Option<&str>) -> ReplicaStateInfo {
        for _ in 0..100 {
            for info in self.states().await {
                if info.role == ReplicaRole::Leader && Some(info.node_id.as_str()) != exclude {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no leader elected within five seconds");
    }

    pub async fn partition(&self, node_id: &str) {
        self.router
            .send(Partition(node_id.to_string()))
            .await
            .unwrap();
    }

    pub async fn heal(&self, node_id: &str) {
        self.router.send(Heal(node_id.to_string())).await.unwrap();
    }
}
