//! Date and time text parsing and wire encoding
//!
//! Text values arrive in ISO-like form (`YYYY-MM-DD`, `HH:MM:SS[.fraction]`,
//! `YYYY-MM-DD HH:MM:SS[.fraction]`). Fractions carry anywhere from one to
//! nine digits and are scaled to nanoseconds by position, so `.5` is half a
//! second and `.000000090` is ninety nanoseconds.
//!
//! On the wire:
//!
//! - DATE: `sb8 year`, `u8 month`, `u8 day`
//! - TIME: `ub4 seconds since midnight`, `ub4 nanoseconds`
//! - DATETIME: DATE followed by TIME
//! - TIMESTAMP WITH TIME ZONE: DATETIME in UTC followed by `sb8` offset seconds

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{Error, Result};

/// Years below this pivot in two-digit form belong to the 2000s
pub const YEAR_PIVOT: i32 = 70;

/// Expand a two-digit year: `0..70` maps to 2000s, `70..100` to 1900s.
/// Years of three or more digits are returned unchanged.
pub fn expand_two_digit_year(year: i32) -> i32 {
    match year {
        0..=99 if year < YEAR_PIVOT => 2000 + year,
        0..=99 => 1900 + year,
        _ => year,
    }
}

/// Parse the digits after the decimal point into nanoseconds.
///
/// Digits beyond the ninth are truncated.
pub fn parse_fraction_nanos(digits: &str) -> Result<u32> {
    if digits.is_empty() {
        return Ok(0);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::conversion("TIME", format!(".{}", digits)));
    }
    let mut nanos = 0u32;
    for (i, b) in digits.bytes().take(9).enumerate() {
        nanos += (b - b'0') as u32 * 10u32.pow(8 - i as u32);
    }
    Ok(nanos)
}

/// Render nanoseconds as a fraction with trailing zeros removed, or an
/// empty string for whole seconds
pub fn format_fraction(nanos: u32) -> String {
    if nanos == 0 {
        return String::new();
    }
    let digits = format!("{:09}", nanos);
    format!(".{}", digits.trim_end_matches('0'))
}

/// Parse `YYYY-MM-DD`. A bare year (`1999`, or `72` with pivot) yields
/// January 1st of that year.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    let invalid = || Error::conversion("DATE", text);

    if !text.contains('-') {
        let year: i32 = text.parse().map_err(|_| invalid())?;
        let year = if text.len() <= 2 {
            expand_two_digit_year(year)
        } else {
            year
        };
        return NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid);
    }

    let mut parts = text.splitn(3, '-');
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let month: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let day: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Parse `HH:MM[:SS[.fraction]]`
pub fn parse_time(text: &str) -> Result<NaiveTime> {
    let text = text.trim();
    let invalid = || Error::conversion("TIME", text);

    let (clock, fraction) = match text.split_once('.') {
        Some((clock, fraction)) => (clock, fraction),
        None => (text, ""),
    };
    let mut parts = clock.split(':');
    let hour: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let minute: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let second: u32 = match parts.next() {
        Some(p) => p.parse().map_err(|_| invalid())?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    let nanos = parse_fraction_nanos(fraction).map_err(|_| invalid())?;
    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).ok_or_else(invalid)
}

/// Parse `YYYY-MM-DD[ |T]HH:MM:SS[.fraction]`; a date alone is midnight
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    match text.split_once([' ', 'T']) {
        Some((date, time)) => {
            let date = parse_date(date).map_err(|_| Error::conversion("TIMESTAMP", text))?;
            let time = parse_time(time).map_err(|_| Error::conversion("TIMESTAMP", text))?;
            Ok(date.and_time(time))
        }
        None => Ok(parse_date(text)
            .map_err(|_| Error::conversion("TIMESTAMP", text))?
            .and_time(NaiveTime::MIN)),
    }
}

/// Format a time with a trimmed fraction
pub fn format_time(time: &NaiveTime) -> String {
    format!(
        "{:02}:{:02}:{:02}{}",
        time.hour(),
        time.minute(),
        time.second(),
        format_fraction(time.nanosecond())
    )
}

/// Format a datetime as `YYYY-MM-DD HH:MM:SS[.fraction]`
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    format!("{} {}", dt.date().format("%Y-%m-%d"), format_time(&dt.time()))
}

// =============================================================================
// Wire encoding
// =============================================================================

/// Write a DATE
pub fn write_date(buf: &mut WriteBuffer, date: &NaiveDate) -> Result<()> {
    buf.write_sb8(date.year() as i64)?;
    buf.write_u8(date.month() as u8)?;
    buf.write_u8(date.day() as u8)
}

/// Read a DATE
pub fn read_date(buf: &mut ReadBuffer) -> Result<NaiveDate> {
    let year = buf.read_sb8()?;
    let month = buf.read_u8()?;
    let day = buf.read_u8()?;
    i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month as u32, day as u32))
        .ok_or_else(|| Error::Protocol(format!("invalid date {}-{}-{}", year, month, day)))
}

/// Write a TIME
pub fn write_time(buf: &mut WriteBuffer, time: &NaiveTime) -> Result<()> {
    buf.write_ub4(time.num_seconds_from_midnight())?;
    buf.write_ub4(time.nanosecond())
}

/// Read a TIME
pub fn read_time(buf: &mut ReadBuffer) -> Result<NaiveTime> {
    let secs = buf.read_ub4()?;
    let nanos = buf.read_ub4()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| Error::Protocol(format!("invalid time {}s {}ns", secs, nanos)))
}

/// Write a DATETIME
pub fn write_datetime(buf: &mut WriteBuffer, dt: &NaiveDateTime) -> Result<()> {
    write_date(buf, &dt.date())?;
    write_time(buf, &dt.time())
}

/// Read a DATETIME
pub fn read_datetime(buf: &mut ReadBuffer) -> Result<NaiveDateTime> {
    let date = read_date(buf)?;
    let time = read_time(buf)?;
    Ok(date.and_time(time))
}

/// Write a TIMESTAMP WITH TIME ZONE
pub fn write_timestamp_tz(buf: &mut WriteBuffer, ts: &DateTime<FixedOffset>) -> Result<()> {
    write_datetime(buf, &ts.naive_utc())?;
    buf.write_sb8(ts.offset().local_minus_utc() as i64)
}

/// Read a TIMESTAMP WITH TIME ZONE
pub fn read_timestamp_tz(buf: &mut ReadBuffer) -> Result<DateTime<FixedOffset>> {
    let utc = read_datetime(buf)?;
    let offset_secs = buf.read_sb8()?;
    let offset = i32::try_from(offset_secs)
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| Error::Protocol(format!("invalid zone offset {}", offset_secs)))?;
    Ok(offset.from_utc_datetime(&utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_scaled_by_position() {
        assert_eq!(parse_fraction_nanos("000000090").unwrap(), 90);
        assert_eq!(parse_fraction_nanos("5").unwrap(), 500_000_000);
        assert_eq!(parse_fraction_nanos("123456").unwrap(), 123_456_000);
        assert_eq!(parse_fraction_nanos("1234567891").unwrap(), 123_456_789);
        assert!(parse_fraction_nanos("12a").is_err());
    }

    #[test]
    fn test_parse_time_with_nanos() {
        let t = parse_time("10:11:12.000000090").unwrap();
        assert_eq!(t.nanosecond(), 90);
        assert_eq!(format_time(&t), "10:11:12.00000009");
        assert_eq!(format_time(&parse_time("01:02:03").unwrap()), "01:02:03");
    }

    #[test]
    fn test_two_digit_year_pivot() {
        assert_eq!(expand_two_digit_year(72), 1972);
        assert_eq!(expand_two_digit_year(69), 2069);
        assert_eq!(expand_two_digit_year(0), 2000);
        assert_eq!(expand_two_digit_year(1999), 1999);
        assert_eq!(parse_date("72").unwrap(), NaiveDate::from_ymd_opt(1972, 1, 1).unwrap());
    }

    #[test]
    fn test_parse_datetime_forms() {
        let a = parse_datetime("2024-02-29 23:59:59.5").unwrap();
        let b = parse_datetime("2024-02-29T23:59:59.500").unwrap();
        assert_eq!(a, b);
        assert_eq!(format_datetime(&a), "2024-02-29 23:59:59.5");
        assert!(parse_datetime("2023-02-29 00:00:00").is_err());
        assert_eq!(parse_datetime("2024-01-01").unwrap().time(), NaiveTime::MIN);
    }

    #[test]
    fn test_timestamp_tz_wire() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let mut buf = WriteBuffer::new();
        write_timestamp_tz(&mut buf, &ts).unwrap();
        let decoded = read_timestamp_tz(&mut ReadBuffer::new(buf.freeze())).unwrap();
        assert_eq!(decoded, ts);
        assert_eq!(decoded.offset().local_minus_utc(), 8 * 3600);
    }
}
