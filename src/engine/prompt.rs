//! The `prompt` stage: interactive filename curation.
//!
//! Prompts are serialized by construction: this stage is the only task
//! talking to the prompt device, and it handles one file at a time.

use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime};
use tracing::info;

use crate::domain::{SpokenStamp, Stage, StageError};
use crate::name;
use crate::progress::FILENAME_PROVIDED;
use crate::ui::PromptRequest;

use super::runtime::{Shared, TokenReceiver, TokenSender};

pub(crate) async fn run(
    sh: Arc<Shared>,
    mut rx: TokenReceiver,
    tx: TokenSender,
) -> anyhow::Result<()> {
    while let Some(mut token) = rx.recv().await {
        let work = prompt_one(&sh, token.index);
        sh.process(&mut token, Stage::Prompt, work).await;
        if tx.send(token).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn prompt_one(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);

    let (guess, guessed_stamp) = {
        let st = file.state().await;
        // A name committed by an earlier run is honored without
        // re-prompting or re-validating.
        if st.provided_filename.is_some() {
            return Ok(());
        }
        (st.guessed_filename.clone(), st.guessed_timestamp)
    };
    let guess = guess.unwrap_or_else(|| file.stem().to_string());

    let mut attempt = 0;
    let mut rejection: Option<String> = None;
    let provided = loop {
        attempt += 1;
        let request = PromptRequest {
            source_name: file.source_name.clone(),
            guess: guess.clone(),
            default: guess.clone(),
            attempt,
            rejection: rejection.take(),
        };
        let reply = sh
            .prompter
            .prompt(&request)
            .await
            .map_err(|e| StageError::PromptValidation(e.to_string()))?;

        let candidate = reply.name.trim().to_string();
        if candidate.is_empty() {
            rejection = Some("empty filename".to_string());
            continue;
        }
        if reply.force {
            info!(file = %file.source_name, name = %candidate, "operator forced filename");
            break candidate;
        }
        match validate(
            &candidate,
            guessed_stamp.as_ref(),
            chrono::Local::now().naive_local(),
            sh.cfg.prompt_window,
        ) {
            Ok(_) => break candidate,
            Err(reason) => rejection = Some(reason),
        }
    };

    file.progress
        .write_marker(FILENAME_PROVIDED, &provided)
        .map_err(|e| StageError::ProgressWrite(e.to_string()))?;
    info!(file = %file.source_name, name = %provided, "filename confirmed");

    file.state().await.provided_filename = Some(provided);
    Ok(())
}

/// Validate an operator-entered name against the prompt rules: a parseable
/// timestamp whose named weekday matches its date, within the configured
/// window of the guess, and not in the future.
pub(crate) fn validate(
    candidate: &str,
    guess: Option<&SpokenStamp>,
    now: NaiveDateTime,
    window: chrono::Duration,
) -> Result<NaiveDateTime, String> {
    let stamp = name::find_stamp(candidate).ok_or_else(|| {
        "no parseable timestamp segment (YYYYMMDD-HHMMSS-Ddd)".to_string()
    })?;

    let actual = stamp.when.weekday();
    if stamp.named_weekday != actual {
        return Err(format!(
            "weekday '{}' does not match {} (a {})",
            stamp.named_weekday,
            stamp.when.date(),
            actual
        ));
    }

    if let Some(guess) = guess {
        let delta = stamp.when - guess.when;
        if delta.abs() > window {
            return Err(format!(
                "timestamp {} is {}h from the guess {}",
                stamp.when,
                delta.num_hours().abs(),
                guess.when
            ));
        }
    }

    if stamp.when > now {
        return Err(format!("timestamp {} is in the future", stamp.when));
    }

    Ok(stamp.when)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn guess() -> SpokenStamp {
        SpokenStamp {
            when: dt(2021, 11, 6, 10, 44),
            confident: true,
        }
    }

    const NAME: &str = "piano.20211106-104400-Sat.2m5s.audio001";

    #[test]
    fn valid_name_passes() {
        let ts = validate(
            NAME,
            Some(&guess()),
            dt(2021, 11, 6, 12, 0),
            chrono::Duration::hours(24),
        )
        .unwrap();
        assert_eq!(ts, dt(2021, 11, 6, 10, 44));
    }

    #[test]
    fn missing_stamp_is_rejected() {
        let err = validate("just-a-name", None, dt(2022, 1, 1, 0, 0), chrono::Duration::hours(24))
            .unwrap_err();
        assert!(err.contains("no parseable timestamp"));
    }

    #[test]
    fn wrong_weekday_is_rejected() {
        let err = validate(
            "piano.20211106-104400-Fri.audio001",
            None,
            dt(2022, 1, 1, 0, 0),
            chrono::Duration::hours(24),
        )
        .unwrap_err();
        assert!(err.contains("weekday"));
    }

    #[test]
    fn too_far_from_guess_is_rejected() {
        // 2021-11-10 was a Wednesday, four days after the guess.
        let err = validate(
            "piano.20211110-104400-Wed.audio001",
            Some(&guess()),
            dt(2021, 11, 20, 0, 0),
            chrono::Duration::hours(24),
        )
        .unwrap_err();
        assert!(err.contains("from the guess"));
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let err = validate(
            NAME,
            Some(&guess()),
            dt(2021, 11, 6, 10, 0),
            chrono::Duration::hours(24),
        )
        .unwrap_err();
        assert!(err.contains("in the future"));
    }

    #[test]
    fn window_is_inclusive_of_nearby_edits() {
        // Same day, a few hours of correction away.
        let ts = validate(
            "piano.20211106-090000-Sat.audio001",
            Some(&guess()),
            dt(2021, 11, 6, 12, 0),
            chrono::Duration::hours(24),
        )
        .unwrap();
        assert_eq!(ts, dt(2021, 11, 6, 9, 0));
    }
}
