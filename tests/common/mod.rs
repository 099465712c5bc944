//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cid::multihash::Multihash;
use cid::Cid;
use elohim_migrate::ledger::ChainEvent;
use elohim_migrate::{
    ContentNetwork, ContentStat, Ledger, MigrateError, Result, StatusEvent, StatusStream,
    StorageOrder,
};
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;

/// A valid CIDv1 (raw codec, sha2-256 shaped digest filled with `fill`).
pub fn cid(fill: u8) -> String {
    let digest = Multihash::<64>::wrap(0x12, &[fill; 32]).unwrap();
    Cid::new_v1(0x55, digest).to_string()
}

/// Content network with a fixed size table. Unknown CIDs are unavailable.
#[derive(Default)]
pub struct FakeNetwork {
    sizes: HashMap<String, u64>,
    pub stat_calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn with_sizes(sizes: &[(&str, u64)]) -> Self {
        Self {
            sizes: sizes.iter().map(|(c, s)| (c.to_string(), *s)).collect(),
            stat_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.stat_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentNetwork for FakeNetwork {
    async fn stat(&self, cid: &str) -> Result<ContentStat> {
        self.stat_calls.lock().unwrap().push(cid.to_string());
        match self.sizes.get(cid) {
            Some(size) => Ok(ContentStat { byte_size: *size }),
            None => Err(MigrateError::SizeUnavailable {
                cid: cid.to_string(),
                reason: "not found".into(),
            }),
        }
    }
}

/// Ledger that answers every order with a scripted status sequence.
///
/// CIDs without a script are included in a block with `ExtrinsicSuccess`.
#[derive(Default)]
pub struct ScriptedLedger {
    scripts: HashMap<String, Vec<StatusEvent>>,
    pub orders: Mutex<Vec<StorageOrder>>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, cid: &str, events: Vec<StatusEvent>) -> Self {
        self.scripts.insert(cid.to_string(), events);
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.orders.lock().unwrap().iter().map(|o| o.cid.clone()).collect()
    }
}

pub fn confirmed(block: &str) -> Vec<StatusEvent> {
    vec![
        StatusEvent::Broadcast,
        StatusEvent::InBlock {
            block: block.to_string(),
            events: vec![ChainEvent::extrinsic_success()],
        },
    ]
}

#[async_trait]
impl Ledger for ScriptedLedger {
    async fn submit_order(&self, order: &StorageOrder) -> Result<StatusStream> {
        self.orders.lock().unwrap().push(order.clone());
        let events = self
            .scripts
            .get(&order.cid)
            .cloned()
            .unwrap_or_else(|| confirmed("0xb1"));
        Ok(stream::iter(events).boxed())
    }
}
