//! The emitted depth document, matching the field names of the system this
//! lineage was prototyped against: `m.v`/`m.s`, `t`, one key per exchange (`cb`,
//! `bi`, ...), each holding base-currency-symbol -> [`SessionRecord`].

use crate::orderbook::depth::{SideBands, NUM_BANDS};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub const DOCUMENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub v: String,
    pub s: String,
}

impl DocumentMeta {
    pub fn new(session_id_hex6: impl Into<String>) -> Self {
        Self {
            v: DOCUMENT_VERSION.to_string(),
            s: session_id_hex6.into(),
        }
    }
}

/// Ten-band depth, serialized as `{"B0": ..., "B1": ..., ..., "B9": ...}` for bids
/// or `{"A0": ..., ..., "A9": ...}` for asks. Band 0 sits nearest the top of book,
/// matching [`crate::orderbook::depth::DepthBucketizer`]'s own indexing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandMap {
    prefix: char,
    bands: SideBands,
}

impl BandMap {
    pub fn bids(bands: SideBands) -> Self {
        Self { prefix: 'B', bands }
    }

    pub fn asks(bands: SideBands) -> Self {
        Self { prefix: 'A', bands }
    }

    pub fn bands(&self) -> SideBands {
        self.bands
    }
}

impl Serialize for BandMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_BANDS))?;
        for (i, size) in self.bands.0.iter().enumerate() {
            map.serialize_entry(&format!("{}{i}", self.prefix), size)?;
        }
        map.end()
    }
}

/// Deserializes whichever of `{B0..B9}` / `{A0..A9}` is present, recovering the
/// side from the key prefix so a round-tripped `BandMap` knows whether it's a
/// bid or ask map without a separate tag in the wire format.
impl<'de> Deserialize<'de> for BandMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BandMapVisitor;

        impl<'de> Visitor<'de> for BandMapVisitor {
            type Value = BandMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of B0..B9 or A0..A9 to band sizes")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<BandMap, M::Error> {
                let mut bands = [Decimal::ZERO; NUM_BANDS];
                let mut prefix: Option<char> = None;
                while let Some((key, value)) = access.next_entry::<String, Decimal>()? {
                    let mut chars = key.chars();
                    let label = chars.next().ok_or_else(|| de::Error::custom("empty band label"))?;
                    let index: usize = chars
                        .as_str()
                        .parse()
                        .map_err(|_| de::Error::custom(format!("invalid band label '{key}'")))?;
                    if index >= NUM_BANDS {
                        return Err(de::Error::custom(format!("band index out of range: {key}")));
                    }
                    if let Some(seen) = prefix {
                        if seen != label {
                            return Err(de::Error::custom("mixed bid/ask band labels in one map"));
                        }
                    } else {
                        prefix = Some(label);
                    }
                    bands[index] = value;
                }
                let prefix = prefix.ok_or_else(|| de::Error::custom("empty band map"))?;
                Ok(BandMap {
                    prefix,
                    bands: SideBands(bands),
                })
            }
        }

        deserializer.deserialize_map(BandMapVisitor)
    }
}

/// A single exchange/symbol's record within the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Event time of the most recently applied diff.
    pub u: DateTime<Utc>,
    pub b: Option<Decimal>,
    pub a: Option<Decimal>,
    pub bd: BandMap,
    pub ad: BandMap,
}

/// One ~1Hz depth snapshot across every tracked exchange/symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedDocument {
    pub m: DocumentMeta,
    pub t: DateTime<Utc>,
    /// One key per exchange id (e.g. `"cb"`, `"bi"`), each a map of base-currency
    /// symbol to [`SessionRecord`].
    #[serde(flatten)]
    pub exchanges: BTreeMap<String, BTreeMap<String, SessionRecord>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn band_map_serializes_with_prefixed_keys() {
        let mut bands = SideBands::default();
        bands.0[0] = dec!(1.5);
        let map = BandMap::bids(bands);
        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value["B0"], serde_json::json!("1.5"));
        assert!(value.get("B9").is_some());
    }

    #[test]
    fn document_flattens_exchange_keys_to_top_level() {
        let mut exchanges = BTreeMap::new();
        let mut cb = BTreeMap::new();
        cb.insert(
            "BTC".to_string(),
            SessionRecord {
                u: Utc::now(),
                b: Some(dec!(100.0)),
                a: Some(dec!(100.5)),
                bd: BandMap::bids(SideBands::default()),
                ad: BandMap::asks(SideBands::default()),
            },
        );
        exchanges.insert("cb".to_string(), cb);

        let document = EmittedDocument {
            m: DocumentMeta::new("a1b2c3"),
            t: Utc::now(),
            exchanges,
        };
        let value = serde_json::to_value(&document).unwrap();
        assert!(value.get("cb").is_some());
        assert!(value.get("m").is_some());
        assert_eq!(value["cb"]["BTC"]["b"], serde_json::json!("100.0"));
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut bid_bands = SideBands::default();
        bid_bands.0[0] = dec!(12.375);
        bid_bands.0[9] = dec!(0.001);
        let mut ask_bands = SideBands::default();
        ask_bands.0[3] = dec!(7.5);

        let mut exchanges = BTreeMap::new();
        let mut cb = BTreeMap::new();
        cb.insert(
            "BTC".to_string(),
            SessionRecord {
                u: Utc::now(),
                b: Some(dec!(100.25)),
                a: Some(dec!(100.5)),
                bd: BandMap::bids(bid_bands),
                ad: BandMap::asks(ask_bands),
            },
        );
        cb.insert(
            "ETH".to_string(),
            SessionRecord {
                u: Utc::now(),
                b: None,
                a: None,
                bd: BandMap::bids(SideBands::default()),
                ad: BandMap::asks(SideBands::default()),
            },
        );
        exchanges.insert("cb".to_string(), cb);

        let document = EmittedDocument {
            m: DocumentMeta::new("a1b2c3"),
            t: Utc::now(),
            exchanges,
        };

        let json = serde_json::to_string(&document).unwrap();
        let round_tripped: EmittedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(document, round_tripped);

        let btc = &round_tripped.exchanges["cb"]["BTC"];
        assert_eq!(btc.bd.bands.0[0], dec!(12.375));
        assert_eq!(btc.bd.bands.0[9], dec!(0.001));
        assert_eq!(btc.ad.bands.0[3], dec!(7.5));
    }
}
