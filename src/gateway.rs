//! Content network access
//!
//! File sizes are always resolved live from IPFS rather than trusted from the
//! catalog. A CID the network cannot stat, or one that stats to zero bytes,
//! is not worth a storage order.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{MigrateError, Result};

/// What the network knows about a CID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentStat {
    pub byte_size: u64,
}

/// A content-addressed network that can report object sizes.
#[async_trait]
pub trait ContentNetwork: Send + Sync {
    async fn stat(&self, cid: &str) -> Result<ContentStat>;
}

/// Kubo RPC response for `files/stat`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FilesStatResponse {
    cumulative_size: u64,
}

/// IPFS node reached over the Kubo RPC API.
pub struct IpfsGateway {
    base_url: String,
    client: Client,
}

impl IpfsGateway {
    pub fn new(base_url: &str, config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| MigrateError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ContentNetwork for IpfsGateway {
    async fn stat(&self, cid: &str) -> Result<ContentStat> {
        let url = format!("{}/api/v0/files/stat", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("arg", format!("/ipfs/{}", cid))])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MigrateError::SizeUnavailable {
                cid: cid.to_string(),
                reason: format!("gateway returned {}: {}", status, body.trim()),
            });
        }

        let stat: FilesStatResponse = response.json().await?;
        debug!(cid = %cid, size = stat.cumulative_size, "Stat from gateway");
        Ok(ContentStat {
            byte_size: stat.cumulative_size,
        })
    }
}

/// Resolves the byte size to declare in a storage order.
pub struct SizeResolver {
    network: Arc<dyn ContentNetwork>,
}

impl SizeResolver {
    pub fn new(network: Arc<dyn ContentNetwork>) -> Self {
        Self { network }
    }

    /// Size in bytes, or `SizeUnavailable` if the network cannot answer or
    /// reports an empty object.
    pub async fn resolve_size(&self, cid: &str) -> Result<u64> {
        let stat = self.network.stat(cid).await.map_err(|e| match e {
            e @ MigrateError::SizeUnavailable { .. } => e,
            other => MigrateError::SizeUnavailable {
                cid: cid.to_string(),
                reason: other.to_string(),
            },
        })?;

        if stat.byte_size == 0 {
            return Err(MigrateError::SizeUnavailable {
                cid: cid.to_string(),
                reason: "network reports zero bytes".into(),
            });
        }
        Ok(stat.byte_size)
    }
}
