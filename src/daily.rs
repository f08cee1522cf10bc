use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::MinuteDemand;

/// Weighted tokens-per-minute statistics of one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub minutes: usize,
    pub requests: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub max_tpm: f64,
    pub min_tpm: f64,
    pub median_tpm: f64,
    pub mean_tpm: f64,
    /// Minutes whose weighted demand exceeded capacity, when one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_over_capacity: Option<usize>,
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Per-day statistics over a gap-filled minute series.
pub fn daily_stats(
    demand: &[MinuteDemand],
    output_weight: f64,
    capacity_tpm: Option<f64>,
) -> Vec<DailyStats> {
    let mut days: BTreeMap<NaiveDate, Vec<&MinuteDemand>> = BTreeMap::new();
    for d in demand {
        days.entry(d.minute.date_naive()).or_default().push(d);
    }

    days.into_iter()
        .map(|(date, minutes)| {
            let mut tpm: Vec<f64> = minutes.iter().map(|m| m.weighted(output_weight)).collect();
            tpm.sort_by(|a, b| a.total_cmp(b));
            let sum: f64 = tpm.iter().sum();

            DailyStats {
                date,
                minutes: minutes.len(),
                requests: minutes.iter().map(|m| m.requests).sum(),
                input_tokens: minutes.iter().fold(0u64, |n, m| n.saturating_add(m.input_tokens)),
                output_tokens: minutes.iter().fold(0u64, |n, m| n.saturating_add(m.output_tokens)),
                max_tpm: tpm.last().copied().unwrap_or(0.0),
                min_tpm: tpm.first().copied().unwrap_or(0.0),
                median_tpm: median(&tpm),
                mean_tpm: sum / tpm.len().max(1) as f64,
                minutes_over_capacity: capacity_tpm
                    .map(|cap| tpm.iter().filter(|&&v| v > cap).count()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::bucket_requests;
    use crate::types::Request;
    use chrono::{TimeZone, Utc};

    fn req(day: u32, h: u32, m: u32, input: u64, output: u64) -> Request {
        Request {
            timestamp: Utc.with_ymd_and_hms(2025, 8, day, h, m, 0).unwrap(),
            input_tokens: input,
            output_tokens: output,
            model: None,
        }
    }

    #[test]
    fn stats_per_day_include_idle_minutes() {
        let requests = [
            req(18, 23, 57, 100, 0),
            req(18, 23, 59, 300, 0),
            req(19, 0, 0, 10, 10),
        ];
        let demand = bucket_requests(&requests).unwrap();
        let stats = daily_stats(&demand, 2.0, Some(150.0));

        assert_eq!(stats.len(), 2);
        let first = &stats[0];
        // 23:57, 23:58 (idle), 23:59
        assert_eq!(first.minutes, 3);
        assert_eq!(first.requests, 2);
        assert_eq!(first.max_tpm, 300.0);
        assert_eq!(first.min_tpm, 0.0);
        assert_eq!(first.median_tpm, 100.0);
        assert!((first.mean_tpm - 400.0 / 3.0).abs() < 1e-9);
        assert_eq!(first.minutes_over_capacity, Some(1));

        let second = &stats[1];
        assert_eq!(second.max_tpm, 30.0);
        assert_eq!(second.output_tokens, 10);
    }

    #[test]
    fn median_of_even_count() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 10.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }
}
