//! Day-by-day roll-up of raw samples into hourly and daily summaries, plus
//! deletion of raw samples from fully-summarized days.
//!
//! Summarization works one day at a time, writing that day's summaries and
//! recording forward progress before moving on. A failure mid-run leaves
//! every completed day committed; the next run resumes after the last fully
//! summarized day and re-reads the failed day from scratch (summary writes
//! are idempotent by key).
//!
//! Day boundaries follow wall clock in the configured zone, so they respect
//! DST. Hour buckets are computed in UTC, where they are always exactly
//! 3600 seconds and unambiguous across transitions.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::time::Instant;

use super::EngineError;
use crate::db::{
    Cmp, Datastore, DbError, Field, Summary, SummaryState, DAY_SUMMARY_KIND, HOUR_SUMMARY_KIND,
    MAX_PUT_BATCH, SAMPLE_KIND, SINGLETON_ID, SUMMARY_STATE_KIND,
};
use crate::sample::Sample;

/// Deleting larger batches tends to blow past store deadlines, so samples go
/// in batches smaller than the write limit.
const DELETE_BATCH_SIZE: usize = 300;

/// Consecutive delete failures tolerated before giving up.
const MAX_DELETE_ERRORS: usize = 2;

/// Returns the midnight that starts `t`'s calendar day in `t`'s zone.
pub fn start_of_day(t: DateTime<Tz>) -> DateTime<Tz> {
    local_midnight(t.timezone(), t.date_naive())
}

/// Returns the midnight `days` calendar days away from `t`'s day.
pub fn add_days(t: DateTime<Tz>, days: i64) -> DateTime<Tz> {
    local_midnight(t.timezone(), t.date_naive() + Duration::days(days))
}

/// Resolves midnight on `date`. When a DST transition makes midnight
/// ambiguous the earlier instant wins; when it makes midnight nonexistent,
/// the first valid wall-clock minute after it is used instead.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earlier, _) => earlier,
        LocalResult::None => {
            for minutes in 1..=180 {
                let probe = naive + Duration::minutes(minutes);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt;
                }
            }
            // No transition gap is anywhere near this wide.
            tz.from_utc_datetime(&naive)
        }
    }
}

/// Truncates a timestamp to the start of its UTC hour.
fn hour_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = t.timestamp() - t.timestamp().rem_euclid(3600);
    DateTime::from_timestamp(truncated, 0).unwrap_or(t)
}

/// Reads the last fully-summarized day, or `None` if no day has been
/// completed yet.
fn get_last_full_day(store: &Datastore) -> Result<Option<DateTime<Utc>>, DbError> {
    match store.get::<SummaryState>(SUMMARY_STATE_KIND, SINGLETON_ID) {
        Ok(state) => Ok(Some(state.last_full_day)),
        Err(DbError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads samples and upserts daily and hourly summary entities.
///
/// `now`'s zone defines day boundaries. `full_day_delay` is how long to wait
/// after the end of a day before assuming no more of its samples will
/// arrive, at which point the day is marked complete and never re-read.
pub fn generate_summaries(
    store: &Datastore,
    now: DateTime<Tz>,
    full_day_delay: Duration,
) -> Result<(), EngineError> {
    let partial_day = start_of_day(now - full_day_delay);
    let tz = now.timezone();

    let mut day_start = match get_last_full_day(store)? {
        Some(last_full_day) => Some(add_days(last_full_day.with_timezone(&tz), 1)),
        None => None,
    };

    loop {
        let Some(done_day) = summarize_day(store, tz, day_start)? else {
            break;
        };
        tracing::debug!("finished summarizing {}", done_day.format("%Y-%m-%d"));

        if done_day < partial_day {
            tracing::debug!("marking {} as fully summarized", done_day.format("%Y-%m-%d"));
            store.put_multi(
                SUMMARY_STATE_KIND,
                &[SummaryState {
                    last_full_day: done_day.with_timezone(&Utc),
                }],
            )?;
        }

        day_start = Some(add_days(done_day, 1));
    }
    Ok(())
}

/// Reads samples starting at `query_start` and summarizes the first day they
/// land on (as interpreted in `tz`). Returns that day's start, or `None` if
/// no samples were found.
fn summarize_day(
    store: &Datastore,
    tz: Tz,
    query_start: Option<DateTime<Tz>>,
) -> Result<Option<DateTime<Tz>>, EngineError> {
    // Keyed by "source|name"; hour_sums' outer key is the bucket's unix time.
    let mut day_sums: HashMap<String, Summary> = HashMap::new();
    let mut hour_sums: HashMap<i64, HashMap<String, Summary>> = HashMap::new();

    let mut query = store.query(SAMPLE_KIND).order(Field::Timestamp);
    if let Some(start) = query_start {
        query = query.filter(Field::Timestamp, Cmp::Ge, start.timestamp());
    }

    let mut day_start: Option<DateTime<Tz>> = None;
    let mut num_samples = 0usize;
    let started = Instant::now();
    for item in query.run::<Sample>() {
        let sample = item?;
        num_samples += 1;

        let sample_day = start_of_day(sample.timestamp.with_timezone(&tz));
        let current = match day_start {
            None => {
                day_start = Some(sample_day);
                sample_day
            }
            Some(current) if sample_day != current => break,
            Some(current) => current,
        };
        update_summary(&mut day_sums, &sample, current.with_timezone(&Utc));

        let bucket = hour_start(sample.timestamp);
        update_summary(hour_sums.entry(bucket.timestamp()).or_default(), &sample, bucket);
    }

    let Some(day_start) = day_start else {
        return Ok(None);
    };

    tracing::debug!(
        "processed {} sample(s) in {} ms",
        num_samples,
        started.elapsed().as_millis()
    );
    write_summaries(store, day_sums, hour_sums)?;
    Ok(Some(day_start))
}

/// Streams one sample into a set of summaries keyed by "source|name".
/// `period_start` is the beginning of the summarized range; a mismatch with
/// an existing entry is a programming error, not a recoverable condition.
fn update_summary(sums: &mut HashMap<String, Summary>, sample: &Sample, period_start: DateTime<Utc>) {
    let key = format!("{}|{}", sample.source, sample.name);
    match sums.get_mut(&key) {
        Some(sum) => {
            if sum.period_start != period_start {
                panic!(
                    "summary for {} starts at {} instead of {}",
                    key, sum.period_start, period_start
                );
            }
            sum.num_values += 1;
            sum.min_value = sum.min_value.min(sample.value);
            sum.max_value = sum.max_value.max(sample.value);
            let n = sum.num_values as f32;
            sum.avg_value = sum.avg_value * ((n - 1.0) / n) + sample.value * (1.0 / n);
        }
        None => {
            sums.insert(
                key,
                Summary {
                    period_start,
                    source: sample.source.clone(),
                    name: sample.name.clone(),
                    num_values: 1,
                    min_value: sample.value,
                    max_value: sample.value,
                    avg_value: sample.value,
                },
            );
        }
    }
}

/// Flushes daily then hourly summaries in store-sized batches, treating each
/// batch as all-or-fail.
fn write_summaries(
    store: &Datastore,
    day_sums: HashMap<String, Summary>,
    hour_sums: HashMap<i64, HashMap<String, Summary>>,
) -> Result<(), EngineError> {
    let started = Instant::now();
    let mut written = 0usize;

    let days: Vec<&Summary> = day_sums.values().collect();
    for chunk in days.chunks(MAX_PUT_BATCH) {
        store.put_multi(DAY_SUMMARY_KIND, chunk)?;
        written += chunk.len();
    }

    let hours: Vec<&Summary> = hour_sums.values().flat_map(|m| m.values()).collect();
    for chunk in hours.chunks(MAX_PUT_BATCH) {
        store.put_multi(HOUR_SUMMARY_KIND, chunk)?;
        written += chunk.len();
    }

    tracing::debug!("wrote {} summaries in {} ms", written, started.elapsed().as_millis());
    Ok(())
}

/// Deletes raw samples from days that have been fully summarized, keeping
/// `days_to_keep` days' worth measured back from the last full day. Samples
/// from partially-summarized days are never deleted; neither are summaries.
pub fn delete_summarized_samples(
    store: &Datastore,
    tz: Tz,
    days_to_keep: i64,
) -> Result<(), EngineError> {
    let Some(last_full_day) = get_last_full_day(store)? else {
        return Ok(());
    };
    let keep_day = add_days(last_full_day.with_timezone(&tz), 1 - days_to_keep);
    tracing::debug!("deleting all samples earlier than {}", keep_day.format("%Y-%m-%d"));

    let mut errors = 0usize;
    loop {
        let keys = store
            .query(SAMPLE_KIND)
            .filter(Field::Timestamp, Cmp::Lt, keep_day.timestamp())
            .limit(DELETE_BATCH_SIZE)
            .get_all_keys()?;
        if keys.is_empty() {
            break;
        }

        tracing::debug!("deleting {} sample(s)", keys.len());
        if let Err(e) = store.delete_multi(SAMPLE_KIND, &keys) {
            errors += 1;
            if errors > MAX_DELETE_ERRORS {
                return Err(e.into());
            }
            tracing::warn!("retrying after error while deleting: {e}");
            continue;
        }

        // Forward progress; reset the failure count.
        errors = 0;

        if keys.len() < DELETE_BATCH_SIZE {
            break;
        }
    }
    Ok(())
}
