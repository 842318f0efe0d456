//! Wire records and framing for cross-rank messages.
//!
//! ## Records
//!
//! | Message          | Record       | Bytes |
//! |------------------|--------------|-------|
//! | seller snapshot  | [`Seller`]   | 96    |
//! | bids             | [`BidRecord`]| 37    |
//! | proposals        | [`ProposalRecord`] | 41 |
//! | committed deltas | [`Trade`]    | 57    |
//! | buyer state      | [`Buyer`]    | 116   |
//!
//! ## Framing
//!
//! A frame is a little-endian `u64` record count followed by that many
//! SSZ-encoded records, each exactly [`WireRecord::ENCODED_LEN`] bytes.

use ssz_rs::prelude::*;

use crate::engine::{Bid, Proposal};
use crate::error::MarketError;
use crate::types::{Buyer, GoodType, Seller, Trade};

/// A fixed-size SSZ record that can be framed.
pub trait WireRecord: SimpleSerialize + Sized {
    const ENCODED_LEN: usize;

    /// Reject a decoded record whose fields SSZ alone cannot constrain.
    fn check(&self) -> crate::error::Result<()> {
        Ok(())
    }
}

impl WireRecord for Seller {
    const ENCODED_LEN: usize = 96;
}

impl WireRecord for Buyer {
    const ENCODED_LEN: usize = 116;
}

impl WireRecord for Trade {
    const ENCODED_LEN: usize = 57;

    fn check(&self) -> crate::error::Result<()> {
        decode_good(self.good_raw).map(|_| ())
    }
}

// ============================================================================
// Bid and Proposal Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct BidRecord {
    pub buyer: u64,
    pub priority: u32,
    pub good_raw: u8,
    pub max_price: u64,
    pub demand: u64,
    pub budget: u64,
}

impl WireRecord for BidRecord {
    const ENCODED_LEN: usize = 37;

    fn check(&self) -> crate::error::Result<()> {
        decode_good(self.good_raw).map(|_| ())
    }
}

impl From<&Bid> for BidRecord {
    fn from(bid: &Bid) -> Self {
        Self {
            buyer: bid.buyer,
            priority: bid.priority,
            good_raw: bid.good.to_u8(),
            max_price: bid.max_price,
            demand: bid.demand,
            budget: bid.budget,
        }
    }
}

impl TryFrom<BidRecord> for Bid {
    type Error = MarketError;

    fn try_from(record: BidRecord) -> crate::error::Result<Self> {
        Ok(Self {
            buyer: record.buyer,
            priority: record.priority,
            good: decode_good(record.good_raw)?,
            max_price: record.max_price,
            demand: record.demand,
            budget: record.budget,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct ProposalRecord {
    pub seq: u64,
    pub buyer: u64,
    pub seller: u64,
    pub good_raw: u8,
    pub quantity: u64,
    pub unit_price: u64,
}

impl WireRecord for ProposalRecord {
    const ENCODED_LEN: usize = 41;

    fn check(&self) -> crate::error::Result<()> {
        decode_good(self.good_raw).map(|_| ())
    }
}

impl From<&Proposal> for ProposalRecord {
    fn from(p: &Proposal) -> Self {
        Self {
            seq: p.seq,
            buyer: p.buyer,
            seller: p.seller,
            good_raw: p.good.to_u8(),
            quantity: p.quantity,
            unit_price: p.unit_price,
        }
    }
}

impl TryFrom<ProposalRecord> for Proposal {
    type Error = MarketError;

    fn try_from(record: ProposalRecord) -> crate::error::Result<Self> {
        Ok(Self {
            seq: record.seq,
            buyer: record.buyer,
            seller: record.seller,
            good: decode_good(record.good_raw)?,
            quantity: record.quantity,
            unit_price: record.unit_price,
        })
    }
}

fn decode_good(raw: u8) -> crate::error::Result<GoodType> {
    GoodType::from_u8(raw).ok_or_else(|| MarketError::Codec(format!("unknown good tag {raw}")))
}

// ============================================================================
// Framing
// ============================================================================

const COUNT_LEN: usize = std::mem::size_of::<u64>();

pub fn encode_frame<T: WireRecord>(records: &[T]) -> crate::error::Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(COUNT_LEN + records.len() * T::ENCODED_LEN);
    frame.extend_from_slice(&(records.len() as u64).to_le_bytes());
    for record in records {
        let bytes = ssz_rs::serialize(record).map_err(|e| MarketError::Codec(format!("{e:?}")))?;
        if bytes.len() != T::ENCODED_LEN {
            return Err(MarketError::Codec(format!(
                "record encoded to {} bytes, expected {}",
                bytes.len(),
                T::ENCODED_LEN
            )));
        }
        frame.extend_from_slice(&bytes);
    }
    Ok(frame)
}

pub fn decode_frame<T: WireRecord>(frame: &[u8]) -> crate::error::Result<Vec<T>> {
    if frame.len() < COUNT_LEN {
        return Err(MarketError::Codec(format!("frame of {} bytes has no count", frame.len())));
    }
    let (head, body) = frame.split_at(COUNT_LEN);
    let mut count_bytes = [0u8; COUNT_LEN];
    count_bytes.copy_from_slice(head);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let expected = count.checked_mul(T::ENCODED_LEN);
    if expected != Some(body.len()) {
        return Err(MarketError::Codec(format!(
            "frame declares {count} records of {} bytes but carries {} bytes",
            T::ENCODED_LEN,
            body.len()
        )));
    }

    body.chunks_exact(T::ENCODED_LEN)
        .map(|chunk| -> crate::error::Result<T> {
            let record = ssz_rs::deserialize::<T>(chunk).map_err(|e| MarketError::Codec(format!("{e:?}")))?;
            record.check()?;
            Ok(record)
        })
        .collect()
}

/// Encode bids for the gather to the coordinator.
pub fn encode_bids(bids: &[Bid]) -> crate::error::Result<Vec<u8>> {
    let records: Vec<BidRecord> = bids.iter().map(BidRecord::from).collect();
    encode_frame(&records)
}

pub fn decode_bids(frame: &[u8]) -> crate::error::Result<Vec<Bid>> {
    decode_frame::<BidRecord>(frame)?.into_iter().map(Bid::try_from).collect()
}

pub fn encode_proposals(proposals: &[Proposal]) -> crate::error::Result<Vec<u8>> {
    let records: Vec<ProposalRecord> = proposals.iter().map(ProposalRecord::from).collect();
    encode_frame(&records)
}

pub fn decode_proposals(frame: &[u8]) -> crate::error::Result<Vec<Proposal>> {
    decode_frame::<ProposalRecord>(frame)?
        .into_iter()
        .map(Proposal::try_from)
        .collect()
}

// ============================================================================
// Unit Tests
// ============================================================================
