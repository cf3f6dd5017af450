//! Parser for spoken talkytime timestamps.
//!
//! A talkytime announcement reads out the wall clock and date, e.g.
//! `19:38, Wednesday. May 19, 2021` is spoken (and recognized) as
//! `nineteen thirty eight wednesday may nineteenth twenty twenty one`.
//! The recognizer's token stream is noisy: filler words appear and
//! disappear, `one` is misheard as `why`, `zero` as `oh`. The grammar here
//! accepts those variations and keeps any trailing words as notes.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use thiserror::Error;

/// A timestamp recovered from a recognizer token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTimestamp {
    pub when: NaiveDateTime,

    /// The weekday actually spoken, when one was; callers cross-check it
    /// against the date to judge confidence.
    pub spoken_weekday: Option<Weekday>,

    /// Words left over after the year, kept for the filename notes segment.
    pub notes: Vec<String>,
}

impl ParsedTimestamp {
    /// Whether the spoken weekday agrees with the weekday of the date.
    ///
    /// A missing spoken weekday counts against confidence: there is nothing
    /// to cross-check the recognition with.
    pub fn confident(&self) -> bool {
        self.spoken_weekday == Some(self.when.weekday())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TalkyTimeError {
    #[error("no weekday or month name found in '{0}'")]
    NoDateWords(String),

    #[error("expected a month name in '{0}'")]
    MissingMonth(String),

    #[error("no day of month found")]
    MissingDayOfMonth,

    #[error("could not find an Nth-like ordinal in '{0}'")]
    MissingOrdinal(String),

    #[error("day of month {0} is out of range")]
    DayOutOfRange(u32),

    #[error("could not find a year in '{0}'")]
    MissingYear(String),

    #[error("expected 'thousand' after {0} while parsing a year")]
    MissingThousand(u32),

    #[error("missing second doublet after {0} while parsing a year")]
    MissingDoublet(u32),

    #[error("year {0} is out of range")]
    YearOutOfRange(u32),

    #[error("spoken fields do not form a valid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Convert recognized text into a timestamp plus leftover note words.
pub fn words_to_timestamp(text: &str) -> Result<ParsedTimestamp, TalkyTimeError> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();

    // The first weekday or month name splits the time words from the date
    // words.
    let split = words
        .iter()
        .position(|w| weekday_from_word(w).is_some() || month_from_word(w).is_some())
        .ok_or_else(|| TalkyTimeError::NoDateWords(text.to_string()))?;

    let mut time_words = words[..split].to_vec();
    let mut date_words = words[split..].to_vec();

    let (hour, minute, second) = grok_time_words(&mut time_words);
    let (year, month, day, spoken_weekday) = grok_date_words(&mut date_words)?;

    let when = NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| {
            TalkyTimeError::InvalidTimestamp(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })?;

    Ok(ParsedTimestamp {
        when,
        spoken_weekday,
        notes: date_words,
    })
}

fn word_to_num(word: &str) -> Option<u32> {
    // Recognizer corrections: "why" for one, "oh" for zero.
    let word = match word {
        "why" => "one",
        "oh" => "zero",
        w => w,
    };
    let n = match word {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        w => return w.parse().ok(),
    };
    Some(n)
}

fn weekday_from_word(word: &str) -> Option<Weekday> {
    match word {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn month_from_word(word: &str) -> Option<u32> {
    let months = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    months
        .iter()
        .position(|m| *m == word)
        .map(|i| i as u32 + 1)
}

fn ordinal_value(word: &str) -> Option<u32> {
    let ordinals = [
        "zeroth",
        "first",
        "second",
        "third",
        "fourth",
        "fifth",
        "sixth",
        "seventh",
        "eighth",
        "ninth",
        "tenth",
        "eleventh",
        "twelfth",
        "thirteenth",
        "fourteenth",
        "fifteenth",
        "sixteenth",
        "seventeenth",
        "eighteenth",
        "nineteenth",
        "twentieth",
        "21st",
        "22nd",
        "23rd",
        "24th",
        "25th",
        "26th",
        "27th",
        "28th",
        "29th",
        "thirtieth",
    ];
    ordinals.iter().position(|o| *o == word).map(|i| i as u32)
}

/// Pop the given optional words off the front, in the order listed,
/// skipping those that are absent. Returns how many were popped.
fn pop_optional(words: &mut Vec<String>, optional: &str) -> usize {
    let mut popped = 0;
    for opt in optional.split_whitespace() {
        if words.first().map(String::as_str) == Some(opt) {
            words.remove(0);
            popped += 1;
        }
    }
    popped
}

/// Parse a one-or-two-word digit doublet, e.g. `forty four`.
///
/// Returns 0 without consuming anything when no number leads the list,
/// which lets datestamps omit their time entirely.
fn grok_digit_pair(words: &mut Vec<String>) -> u32 {
    let mut value = 0;
    if let Some(first) = words.first().and_then(|w| word_to_num(w)) {
        value = first;
        words.remove(0);
        if value == 0 || value >= 20 {
            if let Some(next) = words.first().and_then(|w| word_to_num(w)) {
                if next < 10 {
                    value += next;
                    words.remove(0);
                }
            }
        }
    }
    value
}

/// Parse `(hour, minute, second)` from the time half of the stream.
fn grok_time_words(words: &mut Vec<String>) -> (u32, u32, u32) {
    let mut done = false;
    let mut minute = 0;
    let mut second = 0;

    let mut hour = grok_digit_pair(words);
    if pop_optional(words, "second seconds") > 0 {
        second = hour;
        hour = 0;
        done = true;
    }

    if !done && pop_optional(words, "minute minutes") > 0 {
        minute = hour;
        hour = 0;
        pop_optional(words, "and");
    } else {
        pop_optional(words, "hundred hour hours oh clock oclock o'clock and");

        minute = grok_digit_pair(words);
        if pop_optional(words, "second seconds") > 0 {
            second = minute;
            minute = 0;
            done = true;
        } else {
            pop_optional(words, "oh clock oclock o'clock minute minutes and");
        }
    }

    if !done {
        second = grok_digit_pair(words);
        pop_optional(words, "second seconds");
    }

    (hour, minute, second)
}

/// Pop the day of month; the final word consumed is an ordinal like
/// `first` or `twentieth` (`twenty sixth` combines both forms).
fn grok_day_of_month(words: &mut Vec<String>) -> Result<u32, TalkyTimeError> {
    if words.is_empty() {
        return Err(TalkyTimeError::MissingDayOfMonth);
    }

    let mut idx = 0;
    let mut day = match word_to_num(&words[0]) {
        Some(n) => {
            idx += 1;
            n
        }
        // Probably a bare "Nth"-style ordinal.
        None => 0,
    };

    match words.get(idx).and_then(|w| ordinal_value(w)) {
        Some(ord) => {
            day += ord;
            idx += 1;
        }
        None => return Err(TalkyTimeError::MissingOrdinal(words.join(" "))),
    }

    if !(1..=31).contains(&day) {
        return Err(TalkyTimeError::DayOutOfRange(day));
    }

    words.drain(..idx);
    Ok(day)
}

/// Pop the year, accepting both the `two thousand twenty one` and the
/// doublet `twenty twenty one` grammars. Years outside 1900..=2999 are
/// rejected.
fn grok_year(words: &mut Vec<String>) -> Result<u32, TalkyTimeError> {
    let mut idx = 0usize;

    let mut year = words
        .first()
        .and_then(|w| word_to_num(w))
        .ok_or_else(|| TalkyTimeError::MissingYear(words.join(" ")))?;
    idx += 1;

    if (1..=3).contains(&year) {
        if words.get(idx).map(String::as_str) == Some("thousand") {
            idx += 1;
            year *= 1000;
        } else {
            return Err(TalkyTimeError::MissingThousand(year));
        }
        if words.get(idx).map(String::as_str) == Some("and") {
            idx += 1;
        }

        // Hundreds, tens, or ones follow the thousands.
        if let Some(num) = words.get(idx).and_then(|w| word_to_num(w)) {
            idx += 1;
            if num < 10 {
                if words.get(idx).map(String::as_str) == Some("hundred") {
                    idx += 1;
                    year += num * 100;
                    if words.get(idx).map(String::as_str) == Some("and") {
                        idx += 1;
                    }
                    if let Some(tens) = words.get(idx).and_then(|w| word_to_num(w)) {
                        idx += 1;
                        year += tens;
                        if let Some(ones) = words.get(idx).and_then(|w| word_to_num(w)) {
                            if ones < 10 {
                                idx += 1;
                                year += ones;
                            }
                        }
                    }
                } else {
                    year += num;
                }
            } else if (10..20).contains(&num) {
                year += num;
            } else if num < 30 {
                year += num;
                if let Some(ones) = words.get(idx).and_then(|w| word_to_num(w)) {
                    if ones < 10 {
                        idx += 1;
                        year += ones;
                    }
                }
            }
            // >= 30 is probably not a year digit, e.g. after "two thousand".
        }
    } else if (19..=29).contains(&year) {
        // Pair-of-doublets year, e.g. "twenty twenty one".
        if year > 19 {
            if let Some(ones) = words.get(idx).and_then(|w| word_to_num(w)) {
                if ones < 10 {
                    idx += 1;
                    year += ones;
                }
            }
        }

        year *= 100;
        let mut more_required = true;
        if words.get(idx).map(String::as_str) == Some("hundred") {
            idx += 1;
            more_required = false;
        }
        if words.get(idx).map(String::as_str) == Some("and") {
            idx += 1;
        }

        if let Some(num) = words.get(idx).and_then(|w| word_to_num(w)) {
            idx += 1;
            if num == 0 || (10..30).contains(&num) {
                year += num;
                if let Some(ones) = words.get(idx).and_then(|w| word_to_num(w)) {
                    if ones < 10 {
                        idx += 1;
                        year += ones;
                    }
                }
            } else {
                year += num;
            }
        } else if more_required {
            return Err(TalkyTimeError::MissingDoublet(year));
        }
    }

    if !(1900..=2999).contains(&year) {
        return Err(TalkyTimeError::YearOutOfRange(year));
    }

    words.drain(..idx);
    Ok(year)
}

/// Parse `(year, month, day, weekday)` from the date half of the stream.
/// The weekday may precede the month or sit between the day and the year.
fn grok_date_words(
    words: &mut Vec<String>,
) -> Result<(u32, u32, u32, Option<Weekday>), TalkyTimeError> {
    let mut weekday = None;

    if let Some(w) = words.first().and_then(|w| weekday_from_word(w)) {
        weekday = Some(w);
        words.remove(0);
    }

    let month = match words.first().and_then(|w| month_from_word(w)) {
        Some(m) => {
            words.remove(0);
            m
        }
        None => return Err(TalkyTimeError::MissingMonth(words.join(" "))),
    };

    let day = grok_day_of_month(words)?;

    if let Some(w) = words.first().and_then(|w| weekday_from_word(w)) {
        weekday = Some(w);
        words.remove(0);
    }

    let year = grok_year(words)?;

    Ok((year, month, day, weekday))
}
