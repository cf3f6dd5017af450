//! The generated filename grammar.
//!
//! Guessed names have the shape
//! `<prefix>.<YYYYMMDD-HHMMSS-Ddd>[+?].<runtime>.<notes>.<orig_stem>`,
//! where `Ddd` is the three-letter weekday, `+?` marks a low-confidence
//! timestamp, `<runtime>` is `XhYmZs` with zero components omitted, and the
//! notes segment disappears entirely when there are no notes. The stamp
//! segment must be recoverable from operator-edited names so that later
//! stages can re-derive the recording time.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::domain::SpokenStamp;

/// Suffix appended to a stamp whose spoken weekday was absent or disagreed
/// with the date.
const LOW_CONFIDENCE_MARK: &str = "+?";

/// A timestamp segment recovered from a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameStamp {
    pub when: NaiveDateTime,
    /// The weekday named in the segment, which may disagree with the date.
    pub named_weekday: Weekday,
    pub confident: bool,
}

/// Format a stamp segment: `YYYYMMDD-HHMMSS-Ddd` plus the confidence mark.
pub fn format_stamp(stamp: &SpokenStamp) -> String {
    let mut s = stamp.when.format("%Y%m%d-%H%M%S-%a").to_string();
    if !stamp.confident {
        s.push_str(LOW_CONFIDENCE_MARK);
    }
    s
}

/// Parse one dot-separated segment as a stamp, if it has the right shape.
pub fn parse_stamp(segment: &str) -> Option<NameStamp> {
    let (body, confident) = match segment.strip_suffix(LOW_CONFIDENCE_MARK) {
        Some(body) => (body, false),
        None => (segment, true),
    };

    let mut parts = body.split('-');
    let date = parts.next()?;
    let time = parts.next()?;
    let day = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S").ok()?;
    let named_weekday = parse_weekday(day)?;

    Some(NameStamp {
        when: date.and_time(time),
        named_weekday,
        confident,
    })
}

/// Find the first parseable stamp segment in a (possibly operator-edited)
/// filename.
pub fn find_stamp(name: &str) -> Option<NameStamp> {
    name.split('.').find_map(parse_stamp)
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.to_ascii_lowercase().as_str() {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Render a duration as `XhYmZs`, omitting zero components (`0s` for zero).
///
/// The duration is rounded to the nearest second first.
pub fn fmt_runtime(duration_secs: f64) -> String {
    let total = duration_secs.round().max(0.0) as u64;
    let (hours, rem) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

/// Assemble a guessed filename (without the `.flac` suffix).
pub fn build_guess(
    prefix: &str,
    stamp: &SpokenStamp,
    duration_secs: f64,
    notes: &[String],
    orig_stem: &str,
) -> String {
    let mut parts = vec![
        prefix.to_string(),
        format_stamp(stamp),
        fmt_runtime(duration_secs),
    ];
    if !notes.is_empty() {
        parts.push(notes.join("-"));
    }
    parts.push(orig_stem.to_string());
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, confident: bool) -> SpokenStamp {
        SpokenStamp {
            when: NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap(),
            confident,
        }
    }

    #[test]
    fn stamp_formats_with_weekday() {
        let s = stamp(2021, 11, 6, 10, 44, 0, true);
        assert_eq!(format_stamp(&s), "20211106-104400-Sat");
    }

    #[test]
    fn low_confidence_stamp_carries_marker() {
        let s = stamp(2021, 11, 6, 10, 44, 0, false);
        assert_eq!(format_stamp(&s), "20211106-104400-Sat+?");
    }

    #[test]
    fn stamp_round_trips() {
        for confident in [true, false] {
            let s = stamp(2021, 11, 6, 10, 44, 0, confident);
            let parsed = parse_stamp(&format_stamp(&s)).unwrap();
            assert_eq!(parsed.when, s.when);
            assert_eq!(parsed.confident, confident);
            assert_eq!(parsed.named_weekday, Weekday::Sat);
        }
    }

    #[test]
    fn parse_keeps_named_weekday_even_when_wrong() {
        // 2021-11-06 was a Saturday; the segment claims Friday.
        let parsed = parse_stamp("20211106-104400-Fri").unwrap();
        assert_eq!(parsed.named_weekday, Weekday::Fri);
        assert_eq!(parsed.when.date().to_string(), "2021-11-06");
    }

    #[test]
    fn parse_rejects_malformed_segments() {
        assert!(parse_stamp("20211106-1044-Sat").is_none());
        assert!(parse_stamp("2021-11-06").is_none());
        assert!(parse_stamp("notes").is_none());
        assert!(parse_stamp("20211106-104400-Xyz").is_none());
        assert!(parse_stamp("20211399-104400-Sat").is_none());
    }

    #[test]
    fn find_stamp_scans_segments() {
        let name = "piano.20211106-104400-Sat.1h2m.Bach-Minuet.audio001";
        let found = find_stamp(name).unwrap();
        assert_eq!(found.when.to_string(), "2021-11-06 10:44:00");
        assert!(find_stamp("no.stamp.here").is_none());
    }

    #[test]
    fn runtime_omits_zero_components() {
        assert_eq!(fmt_runtime(0.0), "0s");
        assert_eq!(fmt_runtime(0.4), "0s");
        assert_eq!(fmt_runtime(59.6), "1m");
        assert_eq!(fmt_runtime(61.0), "1m1s");
        assert_eq!(fmt_runtime(3600.0), "1h");
        assert_eq!(fmt_runtime(3725.0), "1h2m5s");
        assert_eq!(fmt_runtime(7200.0), "2h");
        assert_eq!(fmt_runtime(7205.0), "2h5s");
    }

    #[test]
    fn guess_includes_notes_when_present() {
        let s = stamp(2021, 11, 6, 10, 44, 0, true);
        let name = build_guess("piano", &s, 125.0, &["bach".into(), "minuet".into()], "audio001");
        assert_eq!(name, "piano.20211106-104400-Sat.2m5s.bach-minuet.audio001");
    }

    #[test]
    fn guess_omits_empty_notes() {
        let s = stamp(2021, 11, 6, 10, 44, 0, true);
        let name = build_guess("piano", &s, 125.0, &[], "audio001");
        assert_eq!(name, "piano.20211106-104400-Sat.2m5s.audio001");
    }
}
