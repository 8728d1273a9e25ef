//! Downsampling of transformed series.
//!
//! The sampler keeps chart payloads bounded: a `target` point budget is
//! split across series, and each series over budget is reduced with one
//! of three strategies. Sampling is pure and deterministic — the same
//! input, target, and strategy always produce byte-identical output —
//! and infallible: strategy validity is enforced where strategy strings
//! are parsed, not here.

use std::str::FromStr;

use snafu::prelude::*;

use crate::chart::transform::{SeriesMap, SeriesPoint};

/// How an over-budget series is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// Keep every n-th point.
    NthPoint,
    /// Replace each index bucket with its arithmetic mean.
    BucketAverage,
    /// Keep each bucket's extremes, at most two points per bucket.
    MinMax,
}

/// Error parsing a strategy name.
#[derive(Debug, Snafu)]
#[snafu(display(
    "Unknown sampling strategy {input:?} (expected nth-point, bucket-average, or min-max)"
))]
pub struct ParseStrategyError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for SamplingStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nth-point" => Ok(SamplingStrategy::NthPoint),
            "bucket-average" => Ok(SamplingStrategy::BucketAverage),
            "min-max" => Ok(SamplingStrategy::MinMax),
            other => Err(ParseStrategyError {
                input: other.to_string(),
            }),
        }
    }
}

/// Downsample every over-budget series in `map`.
///
/// The budget is split equally across series, remainder to the
/// lexicographically-first ids, and each series keeps at least one
/// point so a crowded chart never starves a small series entirely.
/// A series at or under its share passes through untouched. Output is
/// re-sorted by x ascending per series (bucket means can reorder when
/// the x-axis itself came from a parameter). `target == 0` is a no-op.
pub fn sample(map: SeriesMap, target: usize, strategy: SamplingStrategy) -> SeriesMap {
    if target == 0 || map.is_empty() {
        return map;
    }

    let n = map.len();
    let base = target / n;
    let remainder = target % n;

    map.into_iter()
        .enumerate()
        .map(|(i, (id, points))| {
            let share = (base + usize::from(i < remainder)).max(1);
            (id, sample_series(points, share, strategy))
        })
        .collect()
}

fn sample_series(points: Vec<SeriesPoint>, share: usize, strategy: SamplingStrategy) -> Vec<SeriesPoint> {
    if points.len() <= share {
        return points;
    }

    let mut out = match strategy {
        SamplingStrategy::NthPoint => nth_point(&points, share),
        SamplingStrategy::BucketAverage => bucket_average(&points, share),
        SamplingStrategy::MinMax => min_max(&points, share),
    };
    out.sort_by(|a, b| a.x.total_cmp(&b.x));
    out
}

fn nth_point(points: &[SeriesPoint], share: usize) -> Vec<SeriesPoint> {
    let stride = points.len().div_ceil(share);
    points.iter().step_by(stride).copied().collect()
}

/// Index ranges that split `len` items into at most `buckets` non-empty
/// runs of near-equal size.
fn bucket_bounds(len: usize, buckets: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..buckets)
        .map(move |b| (b * len / buckets, (b + 1) * len / buckets))
        .filter(|(start, end)| end > start)
}

fn bucket_average(points: &[SeriesPoint], share: usize) -> Vec<SeriesPoint> {
    bucket_bounds(points.len(), share)
        .map(|(start, end)| {
            let bucket = &points[start..end];
            let count = bucket.len() as f64;
            SeriesPoint {
                x: bucket.iter().map(|p| p.x).sum::<f64>() / count,
                y: bucket.iter().map(|p| p.y).sum::<f64>() / count,
                source_ts: bucket[0].source_ts,
            }
        })
        .collect()
}

fn min_max(points: &[SeriesPoint], share: usize) -> Vec<SeriesPoint> {
    let mut out = Vec::new();
    for (start, end) in bucket_bounds(points.len(), share) {
        let bucket = &points[start..end];
        let mut min_idx = 0;
        let mut max_idx = 0;
        for (i, p) in bucket.iter().enumerate() {
            if p.y.total_cmp(&bucket[min_idx].y).is_lt() {
                min_idx = i;
            }
            if p.y.total_cmp(&bucket[max_idx].y).is_gt() {
                max_idx = i;
            }
        }
        // Extremes keep their original order; a flat bucket yields one
        // point, not two copies.
        let (first, second) = (min_idx.min(max_idx), min_idx.max(max_idx));
        out.push(bucket[first]);
        if second != first {
            out.push(bucket[second]);
        }
    }
    out
}
