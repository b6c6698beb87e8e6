//! Pump-and-dump detection
//!
//! Builds a bucketed USD volume series per (chain, token) over the window,
//! aligned to the window start. A bucket is a spike when its volume is more
//! than `spike_multiplier` times the trailing average of the previous N
//! buckets; the spike is a pump-and-dump when volume collapses below
//! `decay_threshold` of the spike within `decay_window` buckets.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::detect::{
    clamp_score, Evidence, PatternDetector, PatternFinding, PatternKind, Snapshot, TimeWindow,
};
use crate::model::Chain;

/// Configuration for pump-and-dump detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpDumpConfig {
    /// Volume bucket width in seconds
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: i64,

    /// Buckets in the trailing average
    #[serde(default = "default_trailing_buckets")]
    pub trailing_buckets: usize,

    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,

    /// Buckets after a spike in which the collapse must happen
    #[serde(default = "default_decay_window")]
    pub decay_window: usize,

    /// Collapse level as a fraction of the spike volume
    #[serde(default = "default_decay_threshold")]
    pub decay_threshold: f64,

    /// Observed spike ratio that maps to the maximum score
    #[serde(default = "default_score_saturation")]
    pub score_saturation: f64,
}

fn default_bucket_secs() -> i64 {
    3600 // 1 hour
}
fn default_trailing_buckets() -> usize {
    24
}
fn default_spike_multiplier() -> f64 {
    5.0
}
fn default_decay_window() -> usize {
    6
}
fn default_decay_threshold() -> f64 {
    0.3
}
fn default_score_saturation() -> f64 {
    20.0
}

impl Default for PumpDumpConfig {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            trailing_buckets: default_trailing_buckets(),
            spike_multiplier: default_spike_multiplier(),
            decay_window: default_decay_window(),
            decay_threshold: default_decay_threshold(),
            score_saturation: default_score_saturation(),
        }
    }
}

/// Bucketed volume of one token
#[derive(Debug, Clone)]
struct VolumeSeries {
    volumes: Vec<Decimal>,
    first_active: Option<usize>,
}

/// A spike that decayed
#[derive(Debug, Clone, Copy)]
struct Dump {
    spike: usize,
    decay: usize,
    baseline: Decimal,
    ratio: f64,
}

/// Flags volume spikes followed by a collapse
pub struct PumpDumpDetector {
    config: PumpDumpConfig,
}

impl PumpDumpDetector {
    pub fn new(config: PumpDumpConfig) -> Self {
        Self { config }
    }

    fn width(&self) -> i64 {
        self.config.bucket_secs.max(1)
    }

    fn bucket_start(&self, snapshot: &Snapshot, index: usize) -> DateTime<Utc> {
        snapshot.window().start + Duration::seconds(self.width() * index as i64)
    }

    fn series<'a>(&self, snapshot: &'a Snapshot) -> BTreeMap<(Chain, &'a str), VolumeSeries> {
        let window = snapshot.window();
        let width = self.width();
        let buckets = ((window.end - window.start).num_seconds().max(0) / width) as usize + 1;

        let mut series: BTreeMap<(Chain, &'a str), VolumeSeries> = BTreeMap::new();
        for tx in snapshot.transactions() {
            let Some(usd) = tx.usd_value else {
                continue;
            };
            let index = ((tx.timestamp - window.start).num_seconds() / width) as usize;
            let entry = series
                .entry((tx.chain, tx.token_symbol.as_str()))
                .or_insert_with(|| VolumeSeries {
                    volumes: vec![Decimal::ZERO; buckets],
                    first_active: None,
                });
            if let Some(slot) = entry.volumes.get_mut(index) {
                *slot = slot.saturating_add(usd);
                entry.first_active = Some(entry.first_active.map_or(index, |f| f.min(index)));
            }
        }
        series
    }

    /// Spike ratio of bucket `i`, if it has a full non-zero trailing history
    fn spike_ratio(&self, series: &VolumeSeries, i: usize) -> Option<(Decimal, f64)> {
        let n = self.config.trailing_buckets.max(1);
        if i < series.first_active? + n {
            return None;
        }

        let trailing = series.volumes[i - n..i]
            .iter()
            .fold(Decimal::ZERO, |acc, v| acc.saturating_add(*v));
        let baseline = trailing / Decimal::from(n);
        if baseline <= Decimal::ZERO {
            return None;
        }

        let ratio = series.volumes[i].checked_div(baseline)?.to_f64()?;
        Some((baseline, ratio))
    }

    /// Scan one series. After a flag, scanning resumes past the decay bucket.
    fn scan(&self, series: &VolumeSeries) -> Vec<Dump> {
        let volumes = &series.volumes;
        let mut dumps = Vec::new();
        let mut i = 0;

        while i < volumes.len() {
            let Some((baseline, ratio)) = self.spike_ratio(series, i) else {
                i += 1;
                continue;
            };
            if ratio <= self.config.spike_multiplier {
                i += 1;
                continue;
            }

            let floor = Decimal::from_f64(self.config.decay_threshold)
                .unwrap_or(Decimal::ZERO)
                .saturating_mul(volumes[i]);
            let last = (i + self.config.decay_window).min(volumes.len() - 1);
            match (i + 1..=last).find(|&j| volumes[j] < floor) {
                Some(decay) => {
                    dumps.push(Dump {
                        spike: i,
                        decay,
                        baseline,
                        ratio,
                    });
                    i = decay + 1;
                }
                None => i += 1,
            }
        }
        dumps
    }

    fn finding(
        &self,
        snapshot: &Snapshot,
        chain: Chain,
        token: &str,
        series: &VolumeSeries,
        dump: Dump,
    ) -> PatternFinding {
        let spike_start = self.bucket_start(snapshot, dump.spike);
        let spike_end = spike_start + Duration::seconds(self.width());
        let decay_start = self.bucket_start(snapshot, dump.decay);
        let labels = snapshot.labels();

        let participants: BTreeSet<String> = snapshot
            .transactions()
            .iter()
            .filter(|tx| {
                tx.chain == chain
                    && tx.token_symbol == token
                    && tx.timestamp >= spike_start
                    && tx.timestamp < spike_end
            })
            .flat_map(|tx| tx.participants())
            .filter(|address| !labels.is_labelled(chain, address))
            .map(str::to_string)
            .collect();

        let score = clamp_score((dump.ratio / self.config.score_saturation.max(f64::EPSILON)).min(1.0) * 100.0);

        debug!(
            chain = %chain,
            token = %token,
            ratio = %format!("{:.2}", dump.ratio),
            spike_at = %spike_start,
            score = %format!("{:.1}", score),
            "Pump-and-dump"
        );

        PatternFinding {
            pattern_kind: PatternKind::PumpAndDump,
            participants,
            suspicion_score: score,
            evidence: Evidence::PumpAndDump {
                chain,
                token_symbol: token.to_string(),
                baseline_volume_usd: dump.baseline,
                spike_volume_usd: series.volumes[dump.spike],
                decay_volume_usd: series.volumes[dump.decay],
                spike_ratio: dump.ratio,
                spike_bucket_start: spike_start,
                decay_bucket_start: decay_start,
            },
            time_window: TimeWindow {
                start: spike_start,
                end: decay_start + Duration::seconds(self.width()),
            },
        }
    }
}

impl PatternDetector for PumpDumpDetector {
    fn name(&self) -> &'static str {
        "pump_dump"
    }

    fn kind(&self) -> PatternKind {
        PatternKind::PumpAndDump
    }

    fn detect<'a>(&'a self, snapshot: &'a Snapshot) -> Box<dyn Iterator<Item = PatternFinding> + 'a> {
        let series = self.series(snapshot);
        Box::new(series.into_iter().flat_map(move |((chain, token), series)| {
            self.scan(&series)
                .into_iter()
                .map(|dump| self.finding(snapshot, chain, token, &series, dump))
                .collect::<Vec<_>>()
        }))
    }
}
