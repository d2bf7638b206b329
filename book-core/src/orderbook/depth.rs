//! Deterministic depth bucketization.
//!
//! Ten bands per side are carved out of the percentage range `[0%, 20%]` away from the
//! top of book. Band 0 sits adjacent to the top; band 9 is furthest out. Edges are
//! described from the top of book outward: the edge nearest the top is inclusive, the
//! edge farther from the top is exclusive, except for the single outermost edge (the
//! 20% edge) which is inclusive on both sides it bounds, so a level sitting exactly on
//! that boundary is never silently dropped. Levels outside the 0%-20% range are
//! dropped entirely. All arithmetic is `Decimal` — no floating point enters a band sum.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const NUM_BANDS: usize = 10;

/// Ascending percentage offsets from the top of book, e.g. `[0, 0.02, ..., 0.20]`.
/// Must have exactly `NUM_BANDS + 1` entries, starting at zero.
pub fn default_depth_bands() -> Vec<Decimal> {
    vec![
        dec!(0.00),
        dec!(0.02),
        dec!(0.04),
        dec!(0.06),
        dec!(0.08),
        dec!(0.10),
        dec!(0.12),
        dec!(0.14),
        dec!(0.16),
        dec!(0.18),
        dec!(0.20),
    ]
}

/// Summed band sizes for one side of the book, indexed 0 (nearest top) to 9 (furthest).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SideBands(pub [Decimal; NUM_BANDS]);

impl SideBands {
    pub fn sum(&self) -> Decimal {
        self.0.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBuckets {
    pub bids: SideBands,
    pub asks: SideBands,
}

/// Computes ten-band depth aggregation for a book's bid/ask levels.
pub struct DepthBucketizer {
    bands: Vec<Decimal>,
}

impl DepthBucketizer {
    pub fn new(bands: Vec<Decimal>) -> Self {
        assert_eq!(
            bands.len(),
            NUM_BANDS + 1,
            "depth_bands must have exactly {} ascending entries",
            NUM_BANDS + 1
        );
        Self { bands }
    }

    pub fn with_default_bands() -> Self {
        Self::new(default_depth_bands())
    }

    /// Bucketize ask levels. `top` is the best ask price. Edges ascend away from top.
    pub fn bucketize_asks<I>(&self, top: Decimal, levels: I) -> SideBands
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        let edges: Vec<Decimal> = self.bands.iter().map(|b| top * (Decimal::ONE + *b)).collect();
        self.bucketize_ascending(&edges, levels)
    }

    /// Bucketize bid levels. `top` is the best bid price. Edges descend away from top.
    pub fn bucketize_bids<I>(&self, top: Decimal, levels: I) -> SideBands
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        let edges: Vec<Decimal> = self.bands.iter().map(|b| top * (Decimal::ONE - *b)).collect();
        self.bucketize_descending(&edges, levels)
    }

    /// `edges[0]` is nearest the top (smallest price), `edges[last]` is furthest
    /// (largest price) — the ask case.
    fn bucketize_ascending<I>(&self, edges: &[Decimal], levels: I) -> SideBands
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        let mut bands = [Decimal::ZERO; NUM_BANDS];
        for (price, size) in levels {
            for i in 0..NUM_BANDS {
                let near = edges[i];
                let far = edges[i + 1];
                let in_band = if i == NUM_BANDS - 1 {
                    price >= near && price <= far
                } else {
                    price >= near && price < far
                };
                if in_band {
                    bands[i] += size;
                    break;
                }
            }
        }
        SideBands(bands)
    }

    /// `edges[0]` is nearest the top (largest price), `edges[last]` is furthest
    /// (smallest price) — the bid case.
    fn bucketize_descending<I>(&self, edges: &[Decimal], levels: I) -> SideBands
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        let mut bands = [Decimal::ZERO; NUM_BANDS];
        for (price, size) in levels {
            for i in 0..NUM_BANDS {
                let near = edges[i];
                let far = edges[i + 1];
                let in_band = if i == NUM_BANDS - 1 {
                    price <= near && price >= far
                } else {
                    price <= near && price > far
                };
                if in_band {
                    bands[i] += size;
                    break;
                }
            }
        }
        SideBands(bands)
    }
}

impl Default for DepthBucketizer {
    fn default() -> Self {
        Self::with_default_bands()
    }
}
