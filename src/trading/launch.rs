// src/trading/launch.rs
//
// Factory launch-event decoding. The factory has emitted two event shapes
// over its lifetime; both are decoded side by side against explicit ABI
// layouts. Anything that does not match a known shape exactly is dropped --
// the decoder fails closed rather than guessing at fields.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::chain::client::RawLog;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Selector for the legacy factory event
/// `TokenLaunched(address indexed creator, address indexed referrer,
///  address indexed rewardRecipient, address token, string name,
///  string symbol, address currency)`.
pub const TOKEN_LAUNCHED_V1_SELECTOR: &str =
    "0x21f84ee3a6e9fc2c8a307d0e167d0d20c0527b6bbb3ad6d2860f1e2b01b5f8a9";

/// Selector for the current factory event
/// `LaunchCreated(address indexed creator, address indexed referrer,
///  address indexed rewardRecipient, string name, string symbol,
///  address token, address currency)`.
pub const LAUNCH_CREATED_V2_SELECTOR: &str =
    "0x7d6b2c54dbf902aadef24b1d04e1b2c9f6b298ac9aeecb4f45ef0e1e33b07d42";

/// ABI word size.
const WORD: usize = 32;

/// Upper bound on decoded name/symbol byte length. Factory metadata is
/// short; anything longer is treated as a corrupt record.
const MAX_TEXT_BYTES: usize = 256;

lazy_static! {
    /// Event selectors the decoder will even look at.
    static ref LAUNCH_SELECTORS: HashSet<&'static str> = {
        let mut set = HashSet::new();
        set.insert(TOKEN_LAUNCHED_V1_SELECTOR);
        set.insert(LAUNCH_CREATED_V2_SELECTOR);
        set
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventShape {
    /// token at word 0, name/symbol offsets at words 1-2, currency at word 3.
    TokenLaunchedV1,
    /// name/symbol offsets at words 0-1, token at word 2, currency at word 3.
    LaunchCreatedV2,
}

// ============================================================================
// LAUNCH EVENT
// ============================================================================

/// A normalized token launch decoded from a factory log. Produced once by
/// the decoder and handed through the gating pipeline; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchEvent {
    /// Creator (dev) wallet address, lowercase.
    pub creator: String,
    /// Address of the freshly created token, lowercase.
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    /// When this engine first saw the record.
    pub observed_at: DateTime<Utc>,
}

/// Whether a selector belongs to one of the supported launch event shapes.
pub fn is_launch_selector(selector: &str) -> bool {
    LAUNCH_SELECTORS.contains(selector.to_lowercase().as_str())
}

/// Decode a raw factory log into a `LaunchEvent`.
///
/// Pure function of its inputs: no network access, and malformed input of
/// any kind yields `None` rather than a panic. `observed_at` is supplied by
/// the caller so the result is reproducible in tests.
pub fn decode(raw: &RawLog, observed_at: DateTime<Utc>) -> Option<LaunchEvent> {
    let selector = raw.topics.first()?.to_lowercase();
    if !is_launch_selector(&selector) {
        return None;
    }
    let shape = if selector == TOKEN_LAUNCHED_V1_SELECTOR {
        EventShape::TokenLaunchedV1
    } else {
        EventShape::LaunchCreatedV2
    };

    // Both shapes index creator plus two referrer-style addresses. All three
    // topics must look like addresses or this is not a record we understand.
    if raw.topics.len() != 4 {
        return None;
    }
    let creator = topic_address(&raw.topics[1])?;
    topic_address(&raw.topics[2])?;
    topic_address(&raw.topics[3])?;

    let data = hex_bytes(&raw.data)?;
    let (token_address, name, symbol) = match shape {
        EventShape::TokenLaunchedV1 => {
            let token = word_address(&data, 0)?;
            let name = abi_string_at(&data, word_usize(&data, 1)?)?;
            let symbol = abi_string_at(&data, word_usize(&data, 2)?)?;
            word_address(&data, 3)?; // currency slot must also be plausible
            (token, name, symbol)
        }
        EventShape::LaunchCreatedV2 => {
            let name = abi_string_at(&data, word_usize(&data, 0)?)?;
            let symbol = abi_string_at(&data, word_usize(&data, 1)?)?;
            let token = word_address(&data, 2)?;
            word_address(&data, 3)?;
            (token, name, symbol)
        }
    };

    Some(LaunchEvent {
        creator,
        token_address,
        symbol,
        name,
        block_number: raw.block_number()?,
        tx_hash: raw.transaction_hash.to_lowercase(),
        log_index: raw.log_index()?,
        observed_at,
    })
}

// ============================================================================
// ABI HELPERS
// ============================================================================

fn hex_bytes(value: &str) -> Option<Vec<u8>> {
    let stripped = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    hex::decode(stripped).ok()
}

fn word(data: &[u8], index: usize) -> Option<&[u8]> {
    let start = index.checked_mul(WORD)?;
    data.get(start..start.checked_add(WORD)?)
}

/// Extract a plausible address from a 32-byte word: the 12 padding bytes
/// must be zero and the address itself must be non-zero.
fn address_from_word(word: &[u8]) -> Option<String> {
    if word.len() != WORD {
        return None;
    }
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    if word[12..].iter().all(|b| *b == 0) {
        return None;
    }
    Some(format!("0x{}", hex::encode(&word[12..])))
}

fn word_address(data: &[u8], index: usize) -> Option<String> {
    address_from_word(word(data, index)?)
}

fn topic_address(topic: &str) -> Option<String> {
    let bytes = hex_bytes(topic)?;
    address_from_word(&bytes)
}

/// Read a word as a usize, requiring the high 24 bytes to be zero so the
/// value is small enough to be a sane offset or length.
fn word_usize(data: &[u8], index: usize) -> Option<usize> {
    let w = word(data, index)?;
    if w[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&w[24..]);
    Some(u64::from_be_bytes(tail) as usize)
}

/// Read a length-prefixed ABI string at `offset` (relative to the start of
/// the non-indexed payload). Bounds, length cap, and UTF-8 are all enforced.
fn abi_string_at(data: &[u8], offset: usize) -> Option<String> {
    let len_word = data.get(offset..offset.checked_add(WORD)?)?;
    if len_word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&len_word[24..]);
    let len = u64::from_be_bytes(tail) as usize;
    if len > MAX_TEXT_BYTES {
        return None;
    }
    let start = offset.checked_add(WORD)?;
    let bytes = data.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

// ============================================================================
// TESTS
// ============================================================================

/// Hand-rolled ABI encoding of the factory payloads, shared by the decoder
/// tests and the engine pipeline tests.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) const CREATOR: &str =
        "0x0000000000000000000000001111222233334444555566667777888899990000";
    pub(crate) const REFERRER: &str =
        "0x0000000000000000000000009999aaaabbbbccccddddeeeeffff000011110001";
    pub(crate) const RECIPIENT: &str =
        "0x0000000000000000000000009999aaaabbbbccccddddeeeeffff000011110002";
    pub(crate) const TOKEN: &str = "c0ffee254729296a45a3885639ac7e10f9d54979";
    pub(crate) const CURRENCY: &str = "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

    pub(crate) fn word_for_address(addr_hex: &str) -> String {
        format!("{:0>64}", addr_hex)
    }

    pub(crate) fn word_for_usize(value: usize) -> String {
        format!("{:064x}", value)
    }

    pub(crate) fn abi_string(text: &str) -> String {
        let hex_text = hex::encode(text.as_bytes());
        let padded_len = (text.len() + 31) / 32 * 32;
        format!(
            "{}{:0<width$}",
            word_for_usize(text.len()),
            hex_text,
            width = padded_len * 2
        )
    }

    /// ABI-encode the V1 payload: (address token, string name, string symbol,
    /// address currency).
    pub(crate) fn encode_v1_data(token: &str, name: &str, symbol: &str, currency: &str) -> String {
        let name_enc = abi_string(name);
        let symbol_offset = 4 * WORD + name_enc.len() / 2;
        let mut data = String::from("0x");
        data.push_str(&word_for_address(token));
        data.push_str(&word_for_usize(4 * WORD));
        data.push_str(&word_for_usize(symbol_offset));
        data.push_str(&word_for_address(currency));
        data.push_str(&name_enc);
        data.push_str(&abi_string(symbol));
        data
    }

    /// ABI-encode the V2 payload: (string name, string symbol, address token,
    /// address currency).
    pub(crate) fn encode_v2_data(token: &str, name: &str, symbol: &str, currency: &str) -> String {
        let name_enc = abi_string(name);
        let symbol_offset = 4 * WORD + name_enc.len() / 2;
        let mut data = String::from("0x");
        data.push_str(&word_for_usize(4 * WORD));
        data.push_str(&word_for_usize(symbol_offset));
        data.push_str(&word_for_address(token));
        data.push_str(&word_for_address(currency));
        data.push_str(&name_enc);
        data.push_str(&abi_string(symbol));
        data
    }

    pub(crate) fn raw_log(selector: &str, data: String) -> RawLog {
        raw_log_at(selector, data, 100, "0xDEADBEEF", 3)
    }

    pub(crate) fn raw_log_at(
        selector: &str,
        data: String,
        block: u64,
        tx_hash: &str,
        log_index: u64,
    ) -> RawLog {
        RawLog {
            address: "0xfac7000000000000000000000000000000000001".to_string(),
            topics: vec![
                selector.to_string(),
                CREATOR.to_string(),
                REFERRER.to_string(),
                RECIPIENT.to_string(),
            ],
            data,
            block_number: format!("0x{:x}", block),
            transaction_hash: tx_hash.to_string(),
            log_index: format!("0x{:x}", log_index),
        }
    }
}
