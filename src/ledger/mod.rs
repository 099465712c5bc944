//! Ledger Connection Module
//!
//! | Module      | Responsibility                                     |
//! |-------------|----------------------------------------------------|
//! | `transport` | WebSocket connect/send/receive                     |
//! | `types`     | Orders, status updates, chain events, rejections   |
//! | `signer`    | The run's single ed25519 signing identity          |
//! | `rpc`       | JSON-RPC client with subscription routing          |
//!
//! The rest of the crate only sees the [`Ledger`] trait: submit an order,
//! get back a stream of [`StatusEvent`]s. Turning that stream into one
//! outcome is the job of [`crate::confirmation`].

mod transport;

pub mod rpc;
pub mod signer;
pub mod types;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

pub use rpc::{RpcLedger, WatchStream};
pub use signer::{OrderCall, OrderSigner, SignedOrder};
pub use types::{parse_status, ChainEvent, ChainRejection, StatusEvent, StorageOrder};

/// Status updates for one submitted order, in arrival order.
pub type StatusStream = BoxStream<'static, StatusEvent>;

/// A ledger that accepts storage orders.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Sign and submit `order`, returning its status updates.
    ///
    /// An error means nothing reached the ledger's pool as far as we know.
    async fn submit_order(&self, order: &StorageOrder) -> Result<StatusStream>;

    /// Release the connection. Called once, on every exit path.
    async fn disconnect(&self) {}
}
