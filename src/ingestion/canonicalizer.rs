use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{CopySignal, OutcomeSide, SignalMeta, Trade};

const SIGNAL_ID_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum CanonicalizeError {
    #[error("trade has neither a trade id nor a transaction hash")]
    MissingIdentifier,

    #[error("unrecognized outcome label: {0}")]
    UnknownOutcome(String),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("price {0} outside [0, 1]")]
    PriceOutOfRange(Decimal),
}

/// Deterministic identity for a venue fill. Two observations of the same
/// fill always produce the same id.
pub fn signal_id(trade_id: &str, fill_index: u32, tx_hash: Option<&str>) -> String {
    let material = format!("{trade_id}|{fill_index}|{}", tx_hash.unwrap_or(""));
    let digest = format!("{:x}", Sha256::digest(material.as_bytes()));
    digest[..SIGNAL_ID_LEN].to_string()
}

/// Convert a raw venue trade into a `CopySignal`.
///
/// `source` is the label recorded on the signal (normally the tracked wallet).
pub fn canonicalize(trade: &Trade, source: &str) -> Result<CopySignal, CanonicalizeError> {
    let tx_hash = trade.tx_hash.as_deref().filter(|h| !h.is_empty());
    if trade.trade_id.is_empty() && tx_hash.is_none() {
        return Err(CanonicalizeError::MissingIdentifier);
    }
    if trade.quantity <= Decimal::ZERO {
        return Err(CanonicalizeError::NonPositiveQuantity(trade.quantity));
    }
    if trade.price < Decimal::ZERO || trade.price > Decimal::ONE {
        return Err(CanonicalizeError::PriceOutOfRange(trade.price));
    }
    let side = OutcomeSide::from_api_str(&trade.raw_outcome)
        .ok_or_else(|| CanonicalizeError::UnknownOutcome(trade.raw_outcome.clone()))?;

    // A fill without its own id is identified by its transaction.
    let trade_id = if trade.trade_id.is_empty() {
        tx_hash.unwrap_or_default().to_string()
    } else {
        trade.trade_id.clone()
    };

    Ok(CopySignal {
        signal_id: signal_id(&trade_id, trade.fill_index, tx_hash),
        timestamp: trade.timestamp,
        source: source.to_string(),
        market_id: trade.market_id.clone(),
        market_name: trade.market_title.clone(),
        market_slug: trade.market_slug.clone(),
        side,
        action: trade.action,
        quantity: trade.quantity,
        price: trade.price,
        value: trade.quantity * trade.price,
        meta: SignalMeta {
            wallet: trade.wallet.clone().unwrap_or_else(|| source.to_string()),
            trade_id,
            fill_index: trade.fill_index,
            tx_hash: tx_hash.map(str::to_string),
            asset_id: trade.asset_id.clone(),
            raw_outcome: trade.raw_outcome.clone(),
        },
    })
}
