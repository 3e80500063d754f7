use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
    Weekday,
};
use std::fmt;

const HOUR: i32 = 3600;

/// Time zone the source venue writes its market titles in.
///
/// `UsEastern` applies the US daylight-saving rule (second Sunday of March
/// 02:00 local until first Sunday of November 02:00 local). Ambiguous local
/// times in the repeated November hour resolve to daylight time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTimezone {
    UsEastern,
    Fixed(FixedOffset),
}

impl SourceTimezone {
    /// Accepts `US/Eastern`, `America/New_York`, `ET`, `UTC`, or a fixed
    /// `+HH:MM` / `-HH:MM` offset.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "us/eastern" | "america/new_york" | "et" | "eastern" => {
                return Some(SourceTimezone::UsEastern)
            }
            "utc" | "z" | "gmt" => return Some(SourceTimezone::Fixed(Utc.fix())),
            _ => {}
        }

        let (sign, rest) = match s.as_bytes().first()? {
            b'+' => (1, &s[1..]),
            b'-' => (-1, &s[1..]),
            _ => return None,
        };
        let (h, m) = match rest.split_once(':') {
            Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
            None => (rest.parse::<i32>().ok()?, 0),
        };
        if !(0..=14).contains(&h) || !(0..60).contains(&m) {
            return None;
        }
        FixedOffset::east_opt(sign * (h * HOUR + m * 60)).map(SourceTimezone::Fixed)
    }

    /// Offset in effect at the given local wall-clock time.
    pub fn offset_for_local(&self, local: NaiveDateTime) -> FixedOffset {
        match self {
            SourceTimezone::Fixed(offset) => *offset,
            SourceTimezone::UsEastern => {
                if us_dst_active_local(local) {
                    eastern_daylight()
                } else {
                    eastern_standard()
                }
            }
        }
    }

    /// Offset in effect at the given UTC instant.
    pub fn offset_for_utc(&self, utc: DateTime<Utc>) -> FixedOffset {
        match self {
            SourceTimezone::Fixed(offset) => *offset,
            SourceTimezone::UsEastern => {
                let naive = utc.naive_utc();
                let year = naive.year();
                // DST starts at 02:00 EST = 07:00 UTC and ends at 02:00 EDT = 06:00 UTC.
                let active = match (dst_start_date(year), dst_end_date(year)) {
                    (Some(start), Some(end)) => {
                        let start_utc = at(start, 7);
                        let end_utc = at(end, 6);
                        naive >= start_utc && naive < end_utc
                    }
                    _ => false,
                };
                if active {
                    eastern_daylight()
                } else {
                    eastern_standard()
                }
            }
        }
    }

    /// Interpret a local wall-clock time in this zone as a UTC instant.
    pub fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let offset = self.offset_for_local(local);
        let shifted = local - Duration::seconds(i64::from(offset.local_minus_utc()));
        Utc.from_utc_datetime(&shifted)
    }

    /// Wall-clock time in this zone for a UTC instant.
    pub fn utc_to_local(&self, utc: DateTime<Utc>) -> NaiveDateTime {
        let offset = self.offset_for_utc(utc);
        utc.naive_utc() + Duration::seconds(i64::from(offset.local_minus_utc()))
    }
}

impl Default for SourceTimezone {
    fn default() -> Self {
        SourceTimezone::UsEastern
    }
}

impl fmt::Display for SourceTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTimezone::UsEastern => f.write_str("US/Eastern"),
            SourceTimezone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

fn eastern_standard() -> FixedOffset {
    FixedOffset::west_opt(5 * HOUR).unwrap_or_else(|| Utc.fix())
}

fn eastern_daylight() -> FixedOffset {
    FixedOffset::west_opt(4 * HOUR).unwrap_or_else(|| Utc.fix())
}

fn dst_start_date(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)
}

fn dst_end_date(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)
}

fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, 0, 0).unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}

fn us_dst_active_local(local: NaiveDateTime) -> bool {
    let year = local.year();
    match (dst_start_date(year), dst_end_date(year)) {
        (Some(start), Some(end)) => local >= at(start, 2) && local < at(end, 2),
        _ => false,
    }
}
