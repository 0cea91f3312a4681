//! Leader election for leaderless partitions.
//!
//! On every tick the controller asks the coordinator for partitions without a
//! leader and assigns them round-robin across live brokers. It only acts
//! while its own broker is registered, so a freshly created topic never gets
//! leaders before a broker is serving.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::types::BrokerId;

pub struct Controller {
    broker_id: BrokerId,
    coordinator: Arc<dyn Coordinator>,
}

impl Controller {
    pub fn new(broker_id: BrokerId, coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            broker_id,
            coordinator,
        }
    }

    /// Run one election round, logging instead of failing.
    pub async fn tick(&self) {
        match self.elect_once().await {
            Ok(0) => {}
            Ok(elected) => {
                info!(broker_id = self.broker_id, elected, "Assigned partition leaders");
            }
            Err(Error::ServiceStopped { .. }) => {
                debug!("Coordinator stopped, skipping election");
            }
            Err(e) => {
                warn!(broker_id = self.broker_id, error = %e, "Leader election failed");
            }
        }
    }

    /// Assign leaders to every leaderless partition. Returns how many were
    /// elected in this round.
    pub async fn elect_once(&self) -> Result<usize> {
        let live: Vec<BrokerId> = self
            .coordinator
            .live_brokers()
            .await?
            .into_iter()
            .map(|b| b.broker_id)
            .collect();

        if !live.contains(&self.broker_id) {
            return Ok(0);
        }

        let mut elected = 0;
        for (topic, partition) in self.coordinator.leaderless_partitions().await? {
            let leader = live[partition as usize % live.len()];
            if self
                .coordinator
                .elect_leader(&topic, partition, leader)
                .await?
            {
                elected += 1;
            }
        }
        Ok(elected)
    }
}
