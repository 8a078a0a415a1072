//! Generalized Time codec for directory change timestamps.
//!
//! Directories expose change timestamps (`modifyTimestamp`, `whenChanged`)
//! as RFC 4517 Generalized Time with second granularity. Filters built from
//! a watermark must compare at that granularity, so encoding always
//! truncates sub-second precision instead of rounding: rounding up could
//! skip an entry changed in the same second as the watermark.
//!
//! Encoded form: `YYYYMMDDHHMMSS.0+HHMM`. The `.0` fraction is optional in
//! the standard but Active Directory rejects filters without it.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc,
};

use crate::error::{LdapError, LdapResult};

/// Encode a timestamp as Generalized Time in its own UTC offset.
///
/// Naive timestamps are not accepted: the `TimeZone` bound makes the
/// offset part of the input contract.
pub fn encode_generalized_time<Tz: TimeZone>(ts: &DateTime<Tz>) -> String {
    let offset_secs = ts.offset().fix().local_minus_utc();
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let offset_abs = offset_secs.unsigned_abs();
    let local = ts.naive_local();

    // Explicit widths: the year must stay 4 digits even before year 1000.
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}.0{}{:02}{:02}",
        local.year(),
        local.month(),
        local.day(),
        local.hour(),
        local.minute(),
        local.second(),
        sign,
        offset_abs / 3600,
        (offset_abs % 3600) / 60,
    )
}

/// Decode a Generalized Time value.
///
/// Accepts `YYYYMMDDHHMMSS`, an optional `.`/`,` fraction (truncated), and
/// either `Z` or a `+HHMM`/`-HHMM` offset.
pub fn decode_generalized_time(value: &str) -> LdapResult<DateTime<FixedOffset>> {
    let bytes = value.as_bytes();
    if bytes.len() < 15 || !bytes[..14].iter().all(u8::is_ascii_digit) {
        return Err(LdapError::invalid_timestamp(
            value,
            "expected 14 leading digits",
        ));
    }

    let field = |range: std::ops::Range<usize>| -> u32 {
        value[range].parse::<u32>().unwrap_or_default()
    };
    let year = field(0..4) as i32;
    let date = NaiveDate::from_ymd_opt(year, field(4..6), field(6..8))
        .ok_or_else(|| LdapError::invalid_timestamp(value, "date out of range"))?;
    let naive = date
        .and_hms_opt(field(8..10), field(10..12), field(12..14))
        .ok_or_else(|| LdapError::invalid_timestamp(value, "time out of range"))?;

    let mut rest = &value[14..];
    if let Some(fraction) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(',')) {
        let digits = fraction.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return Err(LdapError::invalid_timestamp(value, "empty fraction"));
        }
        rest = &fraction[digits..];
    }

    let offset = parse_offset(rest)
        .ok_or_else(|| LdapError::invalid_timestamp(value, "invalid UTC offset"))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| LdapError::invalid_timestamp(value, "ambiguous local time"))
}

/// Drop sub-second precision, keeping the offset.
pub fn truncate_to_second<Tz: TimeZone>(ts: DateTime<Tz>) -> DateTime<Tz> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Decode and normalise to UTC at second granularity.
pub fn decode_to_utc(value: &str) -> LdapResult<DateTime<Utc>> {
    decode_generalized_time(value).map(|ts| truncate_to_second(ts.with_timezone(&Utc)))
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    if zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, digits) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_encode_truncates_sub_second() {
        let ts = utc(2021, 1, 1, 10, 45, 20) + chrono::Duration::microseconds(2100);
        assert_eq!(encode_generalized_time(&ts), "20210101104520.0+0000");
    }

    #[test]
    fn test_encode_never_rounds_up() {
        let ts = utc(2021, 1, 1, 10, 45, 20) + chrono::Duration::microseconds(999_999);
        assert_eq!(encode_generalized_time(&ts), "20210101104520.0+0000");
    }

    #[test]
    fn test_encode_pads_early_years() {
        assert_eq!(
            encode_generalized_time(&utc(1, 1, 1, 0, 0, 0)),
            "00010101000000.0+0000"
        );
        assert_eq!(
            encode_generalized_time(&utc(999, 12, 31, 23, 59, 59)),
            "09991231235959.0+0000"
        );
    }

    #[test]
    fn test_encode_keeps_positive_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 6, 20, 15, 30, 45).unwrap();
        assert_eq!(encode_generalized_time(&ts), "20240620153045.0+0200");
    }

    #[test]
    fn test_encode_keeps_negative_offset() {
        let offset = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 6, 20, 9, 0, 1).unwrap();
        assert_eq!(encode_generalized_time(&ts), "20240620090001.0-0530");
    }

    #[test]
    fn test_encoded_shape() {
        let ts = utc(2023, 11, 5, 7, 8, 9);
        let encoded = encode_generalized_time(&ts);
        assert_eq!(encoded.len(), 21);
        assert!(encoded[..14].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(&encoded[14..16], ".0");
        assert!(matches!(&encoded[16..17], "+" | "-"));
        assert!(encoded[17..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_numeric_fields_recover_truncated_value() {
        let ts = utc(2022, 2, 28, 23, 59, 58) + chrono::Duration::milliseconds(750);
        let decoded = decode_to_utc(&encode_generalized_time(&ts)).unwrap();
        assert_eq!(decoded, utc(2022, 2, 28, 23, 59, 58));
    }

    #[test]
    fn test_decode_zulu_with_fraction() {
        let decoded = decode_generalized_time("20240620153045.0Z").unwrap();
        assert_eq!(decoded.with_timezone(&Utc), utc(2024, 6, 20, 15, 30, 45));
    }

    #[test]
    fn test_decode_zulu_without_fraction() {
        let decoded = decode_to_utc("20240115120000Z").unwrap();
        assert_eq!(decoded, utc(2024, 1, 15, 12, 0, 0));
    }

    #[test]
    fn test_decode_offset_normalises_to_utc() {
        let decoded = decode_to_utc("20240620173045.0+0200").unwrap();
        assert_eq!(decoded, utc(2024, 6, 20, 15, 30, 45));
    }

    #[test]
    fn test_decode_truncates_long_fraction() {
        let decoded = decode_to_utc("20240620153045.987654Z").unwrap();
        assert_eq!(decoded, utc(2024, 6, 20, 15, 30, 45));
    }

    #[test]
    fn test_decode_rejects_malformed_values() {
        assert!(decode_generalized_time("").is_err());
        assert!(decode_generalized_time("2024062015").is_err());
        assert!(decode_generalized_time("20241320153045Z").is_err());
        assert!(decode_generalized_time("20240620153045").is_err());
        assert!(decode_generalized_time("20240620153045.Z").is_err());
        assert!(decode_generalized_time("20240620153045+02").is_err());
        assert!(decode_generalized_time("20240620153045+0260").is_err());
        assert!(decode_generalized_time("2024O620153045Z").is_err());
    }

    #[test]
    fn test_truncate_to_second() {
        let ts = utc(2020, 5, 5, 5, 5, 5) + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(truncate_to_second(ts), utc(2020, 5, 5, 5, 5, 5));
    }
}
