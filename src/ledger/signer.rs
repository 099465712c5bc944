//! Order signing
//!
//! The signing identity is a single ed25519 key derived from the configured
//! seed. The signature covers the canonical JSON of `{call, signer, nonce}`,
//! so the node can verify it without any extra framing.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use super::types::StorageOrder;
use crate::error::{MigrateError, Result};

const ORDER_MODULE: &str = "market";
const ORDER_METHOD: &str = "placeStorageOrder";

/// The runtime call carried by a signed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCall {
    pub module: String,
    pub method: String,
    pub cid: String,
    pub size: u64,
    pub tip: u64,
    pub memo: String,
}

impl From<&StorageOrder> for OrderCall {
    fn from(order: &StorageOrder) -> Self {
        Self {
            module: ORDER_MODULE.to_string(),
            method: ORDER_METHOD.to_string(),
            cid: order.cid.clone(),
            size: order.size,
            tip: order.tip,
            memo: order.memo.clone(),
        }
    }
}

/// What gets submitted to `author_submitAndWatchExtrinsic`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOrder {
    pub call: OrderCall,
    /// `0x`-prefixed public key of the signer
    pub signer: String,
    pub nonce: u64,
    /// `0x`-prefixed ed25519 signature
    pub signature: String,
}

#[derive(Serialize)]
struct SigningPayload<'a> {
    call: &'a OrderCall,
    signer: &'a str,
    nonce: u64,
}

fn signing_bytes(call: &OrderCall, signer: &str, nonce: u64) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&SigningPayload { call, signer, nonce })?)
}

/// The migration's single signing identity.
pub struct OrderSigner {
    key: SigningKey,
    account: String,
}

impl OrderSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let key = SigningKey::from_bytes(seed);
        let account = format!("0x{}", hex::encode(key.verifying_key().as_bytes()));
        Self { key, account }
    }

    /// Account id as the ledger knows it.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn sign(&self, order: &StorageOrder, nonce: u64) -> Result<SignedOrder> {
        let call = OrderCall::from(order);
        let message = signing_bytes(&call, &self.account, nonce)?;
        let signature = self.key.sign(&message);

        Ok(SignedOrder {
            call,
            signer: self.account.clone(),
            nonce,
            signature: format!("0x{}", hex::encode(signature.to_bytes())),
        })
    }
}

impl std::fmt::Debug for OrderSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSigner").field("account", &self.account).finish()
    }
}

impl SignedOrder {
    /// Check the signature against the embedded signer key.
    pub fn verify(&self) -> Result<()> {
        let key_bytes: [u8; 32] = decode_fixed(&self.signer)?;
        let sig_bytes: [u8; 64] = decode_fixed(&self.signature)?;

        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| MigrateError::Signing(format!("bad signer key: {}", e)))?;
        let signature = Signature::from_bytes(&sig_bytes);
        let message = signing_bytes(&self.call, &self.signer, self.nonce)?;

        key.verify(&message, &signature)
            .map_err(|e| MigrateError::Signing(format!("signature mismatch: {}", e)))
    }
}

fn decode_fixed<const N: usize>(hex_str: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| MigrateError::Signing(format!("bad hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| MigrateError::Signing(format!("expected {} bytes, got {}", N, b.len())))
}
