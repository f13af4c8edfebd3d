use chrono::Utc;
use uuid::Uuid;

use crate::models::{LightSnapshot, OltFailure};
use crate::optics_client::PonProxyClient;
use crate::optics_extract;
use crate::snapshot::readings_digest;

/// The OLT/slot/port sets covered by one fan-out cycle.
#[derive(Debug, Clone)]
pub struct FanoutPlan {
    pub olts: Vec<String>,
    pub slots: Vec<String>,
    pub ports: Vec<i64>,
}

impl FanoutPlan {
    /// Full cross-product size, reported per cycle even though requests
    /// group per OLT.
    pub fn combos(&self) -> usize {
        self.olts.len() * self.slots.len() * self.ports.len()
    }

    /// Any empty dimension means there is nothing to ask for.
    pub fn is_empty(&self) -> bool {
        self.olts.is_empty() || self.slots.is_empty() || self.ports.is_empty()
    }
}

/// Dispatches one request per OLT concurrently and settles them all into a
/// snapshot. Failures are recorded per OLT and never cancel the siblings;
/// there are no retries within a cycle.
pub struct OpticsFanout {
    client: PonProxyClient,
}

impl OpticsFanout {
    pub fn new(client: PonProxyClient) -> Self {
        Self { client }
    }

    /// Runs one complete cycle and returns its snapshot. A cycle always
    /// produces a snapshot, even when every request fails.
    pub async fn run_cycle(&self, plan: &FanoutPlan) -> LightSnapshot {
        let cycle_id = Uuid::new_v4();
        let combos = plan.combos();

        if plan.is_empty() {
            tracing::info!(
                "Fan-out cycle {}: no OLT/slot/port combinations, nothing to request",
                cycle_id
            );
            return LightSnapshot {
                cycle_id,
                fetched_at: Utc::now(),
                requests_ok: 0,
                requests_total: 0,
                combos,
                readings: Vec::new(),
                failures: Vec::new(),
                digest: readings_digest(&[]),
            };
        }

        tracing::info!(
            "Fan-out cycle {}: {} OLT request(s) covering {} combination(s)",
            cycle_id,
            plan.olts.len(),
            combos
        );

        let mut handles = Vec::with_capacity(plan.olts.len());
        for olt in &plan.olts {
            let client = self.client.clone();
            let olt_name = olt.clone();
            let olt = olt.clone();
            let slots = plan.slots.clone();
            let ports = plan.ports.clone();
            let handle = tokio::spawn(async move {
                let outcome = client.fetch_olt(&olt, &slots, &ports).await;
                (olt, outcome)
            });
            handles.push((olt_name, handle));
        }

        let mut readings = Vec::new();
        let mut failures = Vec::new();
        let mut requests_ok = 0usize;

        // Await in spawn order so readings and failures stay deterministic.
        for (olt_name, handle) in handles {
            match handle.await {
                Ok((olt, Ok(rows))) => {
                    requests_ok += 1;
                    let extracted =
                        optics_extract::extract_readings(&olt, &rows, &plan.slots, &plan.ports);
                    tracing::debug!(
                        "OLT {}: {} payload row(s), {} reading(s)",
                        olt,
                        rows.len(),
                        extracted.len()
                    );
                    readings.extend(extracted);
                }
                Ok((olt, Err(err))) => {
                    tracing::warn!("OLT {} request failed: {}", olt, err.body);
                    failures.push(OltFailure {
                        olt,
                        status: err.status,
                        body: err.body,
                    });
                }
                Err(join_err) => {
                    // A panicked task costs its OLT, never the cycle.
                    tracing::error!("OLT {} request task failed: {}", olt_name, join_err);
                    failures.push(OltFailure {
                        olt: olt_name,
                        status: None,
                        body: format!("request task failed: {}", join_err),
                    });
                }
            }
        }

        let digest = readings_digest(&readings);
        let snapshot = LightSnapshot {
            cycle_id,
            fetched_at: Utc::now(),
            requests_ok,
            requests_total: plan.olts.len(),
            combos,
            readings,
            failures,
            digest,
        };

        tracing::info!(
            "Fan-out cycle {} complete: {} reading(s) ({}/{} requests ok; {} combos)",
            cycle_id,
            snapshot.readings.len(),
            snapshot.requests_ok,
            snapshot.requests_total,
            snapshot.combos
        );

        snapshot
    }
}
