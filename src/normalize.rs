use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::types::Request;

/// Naive layouts tried after RFC 3339, interpreted as UTC.
/// `%.f` also matches a missing fraction.
const NAIVE_FORMATS: &[&str] = &[
    // Azure portal export: "8/18/2025, 12:06:23.290 AM"
    "%m/%d/%Y, %I:%M:%S%.f %p",
    "%m/%d/%Y %I:%M:%S%.f %p",
    "%m/%d/%Y, %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    MissingField,
    BadTimestamp,
    NegativeTokens,
    NonNumericTokens,
    TokensOutOfRange,
    Unreadable,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingField => "missing field",
            RejectReason::BadTimestamp => "unparseable timestamp",
            RejectReason::NegativeTokens => "negative token count",
            RejectReason::NonNumericTokens => "non-numeric token count",
            RejectReason::TokensOutOfRange => "token count out of range",
            RejectReason::Unreadable => "unreadable record",
        }
    }
}

/// Accepted/rejected row counts for one or more inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub accepted: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
}

impl NormalizeReport {
    pub fn reject(&mut self, reason: RejectReason) {
        *self.rejected.entry(reason).or_default() += 1;
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn merge(&mut self, other: &NormalizeReport) {
        self.accepted += other.accepted;
        for (reason, n) in &other.rejected {
            *self.rejected.entry(*reason).or_default() += n;
        }
    }

    /// "3 missing field, 1 unparseable timestamp"
    pub fn summary(&self) -> String {
        self.rejected
            .iter()
            .map(|(reason, n)| format!("{n} {}", reason.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Normalized {
    pub requests: Vec<Request>,
    pub report: NormalizeReport,
}

/// Positions of the recognised columns in a header row.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub timestamp: usize,
    pub input: Option<usize>,
    pub output: Option<usize>,
    /// Recognised so it is never mistaken for a token column; its values are ignored.
    pub total: Option<usize>,
    pub model: Option<usize>,
    pub model_version: Option<usize>,
}

/// Lowercase, treat `_`/`-` as spaces, collapse whitespace.
fn canonical_header(header: &str) -> String {
    header
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_timestamp_header(h: &str) -> bool {
    h.contains("timestamp")
        || matches!(h, "time" | "date" | "datetime" | "time generated")
        || h.starts_with("time [")
        || h.starts_with("time (")
}

fn is_model_header(h: &str) -> bool {
    matches!(
        h,
        "model" | "model name" | "deployment" | "deployment name" | "model deployment name"
    )
}

pub fn find_columns<S: AsRef<str>>(headers: &[S]) -> Result<ColumnMap, SimError> {
    let canon: Vec<String> = headers.iter().map(|h| canonical_header(h.as_ref())).collect();

    let timestamp = canon.iter().position(|h| is_timestamp_header(h));
    let mut input = None;
    let mut output = None;
    let mut total = None;
    let model = canon.iter().position(|h| is_model_header(h));
    let model_version = canon.iter().position(|h| h == "model version");

    for (i, h) in canon.iter().enumerate() {
        if !h.contains("token") {
            continue;
        }
        // "total input tokens" is still an input column
        if h.contains("input") || h.contains("prompt") {
            input = input.or(Some(i));
        } else if h.contains("output") || h.contains("completion") {
            output = output.or(Some(i));
        } else if h.contains("total") {
            total = total.or(Some(i));
        }
    }

    let Some(timestamp) = timestamp else {
        return Err(SimError::Schema(format!(
            "no timestamp column among [{}]",
            headers.iter().map(|h| h.as_ref()).collect::<Vec<_>>().join(", ")
        )));
    };
    if input.is_none() && output.is_none() {
        return Err(SimError::Schema(format!(
            "no input/output token columns among [{}]",
            headers.iter().map(|h| h.as_ref()).collect::<Vec<_>>().join(", ")
        )));
    }

    Ok(ColumnMap {
        timestamp,
        input,
        output,
        total,
        model,
        model_version,
    })
}

/// Parse a timestamp in any of the accepted layouts, truncated to milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    // Newer exports put a narrow no-break space before AM/PM
    let s = raw.trim().replace(['\u{202f}', '\u{a0}'], " ");
    let s = s.strip_suffix(" UTC").unwrap_or(&s).trim();
    if s.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| {
            OFFSET_FORMATS
                .iter()
                .find_map(|f| DateTime::parse_from_str(s, f).ok())
        })
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|naive| naive.and_utc())
        })?;

    Some(parsed.trunc_subsecs(3))
}

/// Largest token count accepted for one side of one call. Per-minute and
/// per-run sums of such counts stay far below `u64::MAX`.
pub const MAX_TOKENS_PER_CALL: u64 = u32::MAX as u64;

/// Parse a token count. Integral floats ("12.0") are accepted; fractions are not.
pub fn parse_tokens(raw: &str) -> Result<u64, RejectReason> {
    let s = raw.trim().replace(',', "");
    if s.is_empty() {
        return Err(RejectReason::MissingField);
    }
    let value = if let Ok(v) = s.parse::<i128>() {
        if v < 0 {
            return Err(RejectReason::NegativeTokens);
        }
        u64::try_from(v).map_err(|_| RejectReason::TokensOutOfRange)?
    } else {
        match s.parse::<f64>() {
            Ok(f) if !f.is_finite() => return Err(RejectReason::NonNumericTokens),
            Ok(f) if f < 0.0 => return Err(RejectReason::NegativeTokens),
            Ok(f) if f.fract() != 0.0 => return Err(RejectReason::NonNumericTokens),
            Ok(f) if f > MAX_TOKENS_PER_CALL as f64 => return Err(RejectReason::TokensOutOfRange),
            Ok(f) => f as u64,
            Err(_) => return Err(RejectReason::NonNumericTokens),
        }
    };
    if value > MAX_TOKENS_PER_CALL {
        return Err(RejectReason::TokensOutOfRange);
    }
    Ok(value)
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize) -> Result<&'a str, RejectReason> {
    match record.get(idx) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RejectReason::MissingField),
    }
}

/// A token column the input doesn't carry counts as zero for every row.
fn token_field(record: &csv::StringRecord, idx: Option<usize>) -> Result<u64, RejectReason> {
    match idx {
        Some(i) => parse_tokens(field(record, i)?),
        None => Ok(0),
    }
}

pub fn normalize_record(cols: &ColumnMap, record: &csv::StringRecord) -> Result<Request, RejectReason> {
    let ts_raw = field(record, cols.timestamp)?;
    let input_tokens = token_field(record, cols.input)?;
    let output_tokens = token_field(record, cols.output)?;
    let timestamp = parse_timestamp(ts_raw).ok_or(RejectReason::BadTimestamp)?;

    Ok(Request {
        timestamp,
        input_tokens,
        output_tokens,
        model: model_key(cols, record),
    })
}

/// "gpt-4o" or, with a version column, "gpt-4o (2024-11-20)".
fn model_key(cols: &ColumnMap, record: &csv::StringRecord) -> Option<String> {
    let text = |idx: Option<usize>| {
        idx.and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let model = text(cols.model)?;
    Some(match text(cols.model_version) {
        Some(version) => format!("{model} ({version})"),
        None => model.to_string(),
    })
}

/// Read a CSV table and return its valid requests sorted by timestamp.
///
/// Fails only when the header row can't be read or lacks the required
/// columns; bad rows are dropped and counted.
pub fn normalize_reader<R: Read>(reader: R) -> Result<Normalized, SimError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| SimError::Schema(format!("unreadable header row: {e}")))?
        .clone();
    let headers: Vec<&str> = headers.iter().collect();
    let cols = find_columns(&headers)?;

    let mut out = Normalized::default();
    for result in rdr.records() {
        let outcome = result
            .map_err(|_| RejectReason::Unreadable)
            .and_then(|record| normalize_record(&cols, &record));
        match outcome {
            Ok(req) => {
                out.report.accepted += 1;
                out.requests.push(req);
            }
            Err(reason) => out.report.reject(reason),
        }
    }

    out.requests.sort_by_key(|r| r.timestamp);
    Ok(out)
}
