use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::timezone::SourceTimezone;
use crate::models::{MarketSnapshot, Underlying};

/// Short-horizon contract shapes the mapper can pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    UpDown15m,
    UpDown1h,
    AboveBelow,
    Range,
}

impl ContractType {
    pub fn window_minutes(self) -> Option<i64> {
        match self {
            ContractType::UpDown15m => Some(15),
            ContractType::UpDown1h => Some(60),
            _ => None,
        }
    }
}

/// Features extracted from a market's title or ticker. Every field is
/// optional; the scorer degrades gracefully on missing data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFeatures {
    pub underlying: Option<Underlying>,
    pub contract_type: Option<ContractType>,
    pub expiry: Option<DateTime<Utc>>,
    pub strike: Option<f64>,
    pub window_minutes: Option<i64>,
}

fn month_from_word(word: &str) -> Option<u32> {
    let month = match word.to_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

fn words(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Source titles ("Bitcoin Up or Down - January 7, 6:45PM-7:00PM ET")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockTime {
    time: NaiveTime,
    has_minutes: bool,
    end: usize,
}

/// Parse `H[:MM]` followed by optional spaces and AM/PM at byte offset `i`.
fn parse_clock_at(bytes: &[u8], i: usize) -> Option<ClockTime> {
    let mut j = i;
    let mut hour: u32 = 0;
    while j < bytes.len() && bytes[j].is_ascii_digit() && j - i < 2 {
        hour = hour * 10 + u32::from(bytes[j] - b'0');
        j += 1;
    }
    if j == i || (j < bytes.len() && bytes[j].is_ascii_digit()) {
        return None;
    }

    let mut minute = 0;
    let mut has_minutes = false;
    if bytes.get(j) == Some(&b':') {
        let (a, b) = (bytes.get(j + 1)?, bytes.get(j + 2)?);
        if !a.is_ascii_digit() || !b.is_ascii_digit() {
            return None;
        }
        minute = u32::from(a - b'0') * 10 + u32::from(b - b'0');
        has_minutes = true;
        j += 3;
    }

    while j < bytes.len() && bytes[j] == b' ' {
        j += 1;
    }
    let meridiem = bytes.get(j..j + 2)?.to_ascii_lowercase();
    let pm = match meridiem.as_slice() {
        b"am" => false,
        b"pm" => true,
        _ => return None,
    };
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    Some(ClockTime {
        time: NaiveTime::from_hms_opt(hour24, minute, 0)?,
        has_minutes,
        end: j + 2,
    })
}

fn clock_times(title: &str) -> Vec<ClockTime> {
    let bytes = title.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let starts_number = bytes[i].is_ascii_digit() && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if starts_number {
            if let Some(t) = parse_clock_at(bytes, i) {
                i = t.end;
                out.push(t);
                continue;
            }
        }
        i += 1;
    }
    out
}

/// "January 7" style date. Returns (month, day).
fn month_day(title: &str) -> Option<(u32, u32)> {
    let ws = words(title);
    ws.windows(2).find_map(|pair| {
        let month = month_from_word(&pair[0])?;
        let day: u32 = pair[1].parse().ok()?;
        (1..=31).contains(&day).then_some((month, day))
    })
}

/// Pick the year that puts month/day closest to the reference date.
fn infer_date(month: u32, day: u32, reference: NaiveDate) -> Option<NaiveDate> {
    let candidates = [reference.year() - 1, reference.year(), reference.year() + 1];
    candidates
        .iter()
        .filter_map(|y| NaiveDate::from_ymd_opt(*y, month, day))
        .min_by_key(|d| (*d - reference).num_days().abs())
}

fn strike_from_title(title: &str) -> Option<f64> {
    let tokens: Vec<&str> = title.split_whitespace().collect();
    for (idx, token) in tokens.iter().enumerate() {
        let lower = token.to_lowercase();
        let candidate = if token.starts_with('$') {
            Some(*token)
        } else if (lower == "above" || lower == "below") && idx + 1 < tokens.len() {
            Some(tokens[idx + 1])
        } else {
            None
        };
        if let Some(raw) = candidate {
            let cleaned: String = raw
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if let Ok(v) = cleaned.trim_end_matches('.').parse::<f64>() {
                if v > 0.0 {
                    return Some(v);
                }
            }
        }
    }
    None
}

/// Extract mapping features from a source-venue title.
///
/// `reference` anchors the calendar date when the title omits one and picks
/// the year when it does not.
pub fn extract_source_features(
    title: &str,
    reference: DateTime<Utc>,
    tz: SourceTimezone,
) -> MarketFeatures {
    let lower = title.to_lowercase();
    let ws = words(title);

    let underlying = ws.iter().find_map(|w| Underlying::from_word(w));
    let times = clock_times(title);

    let mut contract_type = if lower.contains("up or down") {
        // A bare hour ("7PM ET") names an hourly window.
        match times.as_slice() {
            [only] if !only.has_minutes => Some(ContractType::UpDown1h),
            _ => Some(ContractType::UpDown15m),
        }
    } else if ws.iter().any(|w| w == "above" || w == "below") {
        Some(ContractType::AboveBelow)
    } else if ws.iter().any(|w| w == "between" || w == "range") {
        Some(ContractType::Range)
    } else {
        None
    };

    let mut window_minutes = contract_type.and_then(ContractType::window_minutes);
    let mut expiry = None;

    if let Some(start) = times.first() {
        let reference_local = tz.utc_to_local(reference).date();
        let date = month_day(title)
            .and_then(|(m, d)| infer_date(m, d, reference_local))
            .unwrap_or(reference_local);

        let start_at = date.and_time(start.time);
        let end_at = match times.get(1) {
            Some(end) => {
                let mut end_at = date.and_time(end.time);
                if end_at <= start_at {
                    end_at += Duration::days(1);
                }
                window_minutes = Some((end_at - start_at).num_minutes());
                end_at
            }
            None => match window_minutes {
                Some(w) => start_at + Duration::minutes(w),
                None => start_at,
            },
        };

        if let (Some(ContractType::UpDown15m | ContractType::UpDown1h), Some(w)) = (contract_type, window_minutes) {
            contract_type = Some(if w >= 60 { ContractType::UpDown1h } else { ContractType::UpDown15m });
        }
        expiry = Some(tz.local_to_utc(end_at));
    }

    MarketFeatures {
        underlying,
        contract_type,
        expiry,
        strike: strike_from_title(title),
        window_minutes,
    }
}

// ---------------------------------------------------------------------------
// Target tickers ("KXBTC15M-26JAN071845-45")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TickerParts {
    pub underlying: Option<Underlying>,
    pub contract_type: Option<ContractType>,
    /// Expiry wall-clock time, US/Eastern.
    pub expiry_local: Option<chrono::NaiveDateTime>,
}

/// Parse a Kalshi-style ticker. The series carries underlying and horizon,
/// the date code is `YYMONDD` plus optional `HH` or `HHMM` in US/Eastern.
pub fn parse_kalshi_ticker(ticker: &str) -> TickerParts {
    let upper = ticker.to_uppercase();
    let mut parts = upper.split('-');
    let series = parts.next().unwrap_or_default();
    let date_code = parts.next();

    let series_body = series.strip_prefix("KX").unwrap_or(series);
    let (underlying, horizon) = [("BTC", Underlying::Btc), ("ETH", Underlying::Eth), ("SOL", Underlying::Sol)]
        .iter()
        .find_map(|(prefix, u)| series_body.strip_prefix(prefix).map(|rest| (Some(*u), rest)))
        .unwrap_or((None, ""));

    let contract_type = match horizon {
        "15M" => Some(ContractType::UpDown15m),
        "1H" | "H" => Some(ContractType::UpDown1h),
        "D" => Some(ContractType::AboveBelow),
        "" if underlying.is_some() => Some(ContractType::Range),
        _ => None,
    };

    TickerParts {
        underlying,
        contract_type,
        expiry_local: date_code.and_then(parse_date_code),
    }
}

fn parse_date_code(code: &str) -> Option<chrono::NaiveDateTime> {
    if code.len() < 7 || !code.is_ascii() {
        return None;
    }
    let year = 2000 + code.get(0..2)?.parse::<i32>().ok()?;
    let month = month_from_word(code.get(2..5)?)?;
    let day = code.get(5..7)?.parse::<u32>().ok()?;
    let clock = code.get(7..).unwrap_or_default();
    let (hour, minute) = match clock.len() {
        0 => (23, 59),
        2 => (clock.parse::<u32>().ok()?, 0),
        4 => (clock.get(0..2)?.parse().ok()?, clock.get(2..4)?.parse().ok()?),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Extract mapping features from a target-venue market. The venue's own
/// close time wins over the ticker date code.
pub fn extract_target_features(market: &MarketSnapshot) -> MarketFeatures {
    let ticker = market.ticker.as_deref().unwrap_or(&market.market_id);
    let parts = parse_kalshi_ticker(ticker);

    let underlying = parts
        .underlying
        .or_else(|| words(&market.title).iter().find_map(|w| Underlying::from_word(w)));
    let expiry = market.expiry.or_else(|| {
        parts
            .expiry_local
            .map(|local| SourceTimezone::UsEastern.local_to_utc(local))
    });

    MarketFeatures {
        underlying,
        contract_type: parts.contract_type,
        expiry,
        strike: market.strike.and_then(|s| s.to_f64()),
        window_minutes: parts.contract_type.and_then(ContractType::window_minutes),
    }
}
