use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::StatsConfig;
use crate::platform::Button;

/// One mining server as reported by the stats endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Miner {
    pub ip: String,
    #[serde(default)]
    pub blocks_count: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub hashrate: f64,
}

// The endpoint also reports `start_time`, `pool` and `active_pool`; only the
// server list is used.
#[derive(Debug, Deserialize)]
struct StatsReport {
    servers: Vec<Miner>,
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_miners(&self) -> Result<Vec<Miner>>;
}

pub struct StatsClient {
    client: reqwest::Client,
    url: String,
    auth: Option<String>,
}

impl StatsClient {
    pub fn new(config: &StatsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build stats HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            auth: config.auth.clone(),
        })
    }
}

#[async_trait]
impl StatsSource for StatsClient {
    async fn fetch_miners(&self) -> Result<Vec<Miner>> {
        debug!("Fetching stats from {}", self.url);

        let mut request = self.client.get(&self.url);
        if let Some(auth) = &self.auth {
            request = request.header("Authorization", format!("Basic {}", auth));
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to stats endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Stats endpoint error ({}): {}", status, error_body);
        }

        let report: StatsReport = response
            .json()
            .await
            .context("Failed to parse stats response")?;

        debug!("Stats endpoint returned {} server(s)", report.servers.len());
        Ok(report.servers)
    }
}

/// Aggregate over active miners for a single `/stats` reply
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub total_hashrate: f64,
    pub buttons: Vec<Button>,
}

impl StatsSummary {
    pub fn from_miners(miners: &[Miner]) -> Self {
        let active: Vec<&Miner> = miners.iter().filter(|m| m.active).collect();
        Self {
            total_hashrate: active.iter().map(|m| m.hashrate).sum(),
            buttons: active
                .iter()
                .map(|m| Button {
                    label: format!("⛏ {} - {:.2} h/s", m.ip, m.hashrate),
                    data: m.ip.clone(),
                })
                .collect(),
        }
    }

    pub fn headline(&self) -> String {
        format!("💎 Total hashrate {:.2}", self.total_hashrate)
    }
}
