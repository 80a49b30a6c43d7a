//! Multi-series range queries merged into chart-ready JSON.
//!
//! One fetcher task per requested series streams `(timestamp, value)` points
//! over a bounded channel; a merger performs an ordered k-way merge into
//! aligned rows, and the serializer writes a Google-Charts-style table. Back
//! pressure is implicit: a slow consumer blocks the fetchers.

use chrono::{DateTime, Datelike, Duration, Timelike};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use std::io::Write;
use tokio::sync::mpsc;

use super::EngineError;
use crate::db::{
    Cmp, Datastore, DbError, Field, Summary, DAY_SUMMARY_KIND, HOUR_SUMMARY_KIND, SAMPLE_KIND,
};
use crate::sample::Sample;

/// Upper bound on rows fetched per series: a day of minutely samples.
pub const MAX_QUERY_RESULTS: usize = 60 * 24;

/// The planner aims to hand the chart at most this many points.
const MAX_CHART_POINTS: i64 = 100;

/// Which entity kind a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Raw samples.
    Individual,
    /// Hourly summaries, contributing their averages.
    HourlyAverage,
    /// Daily summaries, contributing their averages.
    DailyAverage,
}

fn kind_for(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Individual => SAMPLE_KIND,
        Granularity::HourlyAverage => HOUR_SUMMARY_KIND,
        Granularity::DailyAverage => DAY_SUMMARY_KIND,
    }
}

/// Parameters for [`do_query`]. `labels` and `source_names` are parallel
/// arrays; each source name is a `"source|name"` pair.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub labels: Vec<String>,
    pub source_names: Vec<String>,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub granularity: Granularity,
    /// How many consecutive points to average into one output point.
    pub aggregation: usize,
}

impl QueryParams {
    /// Picks a granularity and aggregation that keep the result at or under
    /// [`MAX_CHART_POINTS`] points, given the series' reporting interval and
    /// the earliest time raw samples are known to still exist.
    pub fn update_granularity_and_aggregation(
        &mut self,
        sample_interval: Duration,
        sample_start: Option<DateTime<Tz>>,
    ) {
        let span = self.end.signed_duration_since(self.start);
        let day_count = span.num_days();
        let hour_count = span.num_hours();
        let interval_secs = sample_interval.num_seconds().max(1);
        let sample_count = span.num_seconds() / interval_secs;
        let samples_per_hour = (3600 / interval_secs).max(1);
        let samples_missing = sample_start.is_some_and(|earliest| self.start < earliest);

        if hour_count / 24 * 2 > MAX_CHART_POINTS {
            self.granularity = Granularity::DailyAverage;
            self.aggregation = (day_count / MAX_CHART_POINTS).max(1) as usize;
        } else if samples_missing || sample_count / samples_per_hour * 2 > MAX_CHART_POINTS {
            self.granularity = Granularity::HourlyAverage;
            self.aggregation = (hour_count / MAX_CHART_POINTS).max(1) as usize;
        } else {
            self.granularity = Granularity::Individual;
            self.aggregation = (sample_count / MAX_CHART_POINTS).max(1) as usize;
        }
    }
}

/// One value in one series.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    timestamp: i64,
    value: f32,
}

/// One output row: the values of every series at `timestamp`, NaN where a
/// series had no point there.
#[derive(Debug, Clone, PartialEq)]
struct TimeData {
    timestamp: i64,
    values: Vec<f32>,
}

/// Averages a run of points into one. The aggregate sits at the midpoint of
/// the first and last timestamps.
fn average_points(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point {
            timestamp: 0,
            value: 0.0,
        };
    }
    let first = points[0].timestamp;
    let last = points[points.len() - 1].timestamp;
    let sum: f32 = points.iter().map(|p| p.value).sum();
    Point {
        timestamp: first + (last - first) / 2,
        value: sum / points.len() as f32,
    }
}

/// Runs one series' store query and streams its (optionally aggregated)
/// points into `tx` in timestamp order.
fn spawn_fetcher(
    store: Datastore,
    granularity: Granularity,
    source: String,
    name: String,
    start: i64,
    end: i64,
    aggregation: usize,
) -> mpsc::Receiver<Result<Point, DbError>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::task::spawn_blocking(move || {
        let result = match granularity {
            Granularity::Individual => stream_points::<Sample, _>(
                &store,
                kind_for(granularity),
                &source,
                &name,
                start,
                end,
                aggregation,
                |s| Point {
                    timestamp: s.timestamp.timestamp(),
                    value: s.value,
                },
                &tx,
            ),
            Granularity::HourlyAverage | Granularity::DailyAverage => {
                stream_points::<Summary, _>(
                    &store,
                    kind_for(granularity),
                    &source,
                    &name,
                    start,
                    end,
                    aggregation,
                    |s| Point {
                        timestamp: s.period_start.timestamp(),
                        value: s.avg_value,
                    },
                    &tx,
                )
            }
        };
        if let Err(e) = result {
            let _ = tx.blocking_send(Err(e));
        }
    });
    rx
}

#[allow(clippy::too_many_arguments)]
fn stream_points<E: DeserializeOwned, F: Fn(E) -> Point>(
    store: &Datastore,
    kind: &str,
    source: &str,
    name: &str,
    start: i64,
    end: i64,
    aggregation: usize,
    project: F,
    tx: &mpsc::Sender<Result<Point, DbError>>,
) -> Result<(), DbError> {
    let query = store
        .query(kind)
        .filter(Field::Timestamp, Cmp::Ge, start)
        .filter(Field::Timestamp, Cmp::Le, end)
        .filter(Field::Source, Cmp::Eq, source)
        .filter(Field::Name, Cmp::Eq, name)
        .order(Field::Timestamp)
        .limit(MAX_QUERY_RESULTS);

    let mut pending: Vec<Point> = Vec::new();
    for item in query.run::<E>() {
        let point = project(item?);
        if aggregation > 1 {
            pending.push(point);
            if pending.len() == aggregation {
                if tx.blocking_send(Ok(average_points(&pending))).is_err() {
                    return Ok(());
                }
                pending.clear();
            }
        } else if tx.blocking_send(Ok(point)).is_err() {
            return Ok(());
        }
    }
    if !pending.is_empty() && tx.blocking_send(Ok(average_points(&pending))).is_err() {
        return Ok(());
    }
    Ok(())
}

/// Ordered k-way merge of per-series point streams into rows. The first
/// fetcher error is forwarded and terminates the merge.
async fn merge_query_data(
    mut inputs: Vec<mpsc::Receiver<Result<Point, DbError>>>,
    out: mpsc::Sender<Result<TimeData, DbError>>,
) {
    let mut next: Vec<Option<Point>> = vec![None; inputs.len()];
    let mut open: Vec<bool> = vec![true; inputs.len()];
    loop {
        for i in 0..inputs.len() {
            if next[i].is_none() && open[i] {
                match inputs[i].recv().await {
                    Some(Ok(point)) => next[i] = Some(point),
                    Some(Err(e)) => {
                        let _ = out.send(Err(e)).await;
                        return;
                    }
                    None => open[i] = false,
                }
            }
        }

        // All inputs exhausted once nothing is pending.
        let Some(t) = next.iter().flatten().map(|p| p.timestamp).min() else {
            break;
        };

        let mut values = vec![f32::NAN; next.len()];
        for i in 0..next.len() {
            if let Some(point) = next[i] {
                if point.timestamp == t {
                    values[i] = point.value;
                    next[i] = None;
                }
            }
        }
        if out.send(Ok(TimeData { timestamp: t, values })).await.is_err() {
            return;
        }
    }
}

/// Serializes merged rows as a chart table. Timestamps render in `tz`;
/// trailing NaN cells are omitted from each row.
async fn generate_query_output<W: Write>(
    labels: &[String],
    mut rows: mpsc::Receiver<Result<TimeData, DbError>>,
    tz: Tz,
    w: &mut W,
) -> Result<(), EngineError> {
    write!(w, "{{\"cols\":[{{\"type\":\"datetime\"}}")?;
    for label in labels {
        write!(
            w,
            ",{{\"label\":{},\"type\":\"number\"}}",
            serde_json::to_string(label).map_err(DbError::Encode)?
        )?;
    }
    write!(w, "],\"rows\":[")?;

    let mut row_num = 0usize;
    while let Some(item) = rows.recv().await {
        let data = item?;
        if row_num > 0 {
            write!(w, ",")?;
        }

        let t = DateTime::from_timestamp(data.timestamp, 0)
            .unwrap_or_default()
            .with_timezone(&tz);
        // The chart library wants its own pseudo-date literal, with a
        // zero-based month.
        write!(
            w,
            "{{\"c\":[{{\"v\":\"Date({},{},{},{},{},{})\"}}",
            t.year(),
            t.month0(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second()
        )?;

        if let Some(last_col) = data.values.iter().rposition(|v| !v.is_nan()) {
            for value in &data.values[..=last_col] {
                if value.is_nan() {
                    write!(w, ",{{\"v\":null}}")?;
                } else {
                    write!(w, ",{{\"v\":{value}}}")?;
                }
            }
        }
        write!(w, "]}}")?;
        row_num += 1;
    }
    write!(w, "]}}")?;
    Ok(())
}

/// Runs a multi-series range query and writes the resulting table to `w`.
///
/// On a mid-stream store error, whatever was already written stays written
/// and the error is returned; callers that must not emit truncated JSON
/// buffer the output and discard it on error.
pub async fn do_query<W: Write>(
    store: &Datastore,
    w: &mut W,
    params: &QueryParams,
) -> Result<(), EngineError> {
    if params.labels.len() != params.source_names.len() {
        return Err(EngineError::MismatchedSeries {
            labels: params.labels.len(),
            names: params.source_names.len(),
        });
    }

    let mut fetchers = Vec::with_capacity(params.source_names.len());
    for source_name in &params.source_names {
        let parts: Vec<&str> = source_name.split('|').collect();
        let [source, name] = parts.as_slice() else {
            return Err(EngineError::BadSourceName(source_name.clone()));
        };
        fetchers.push(spawn_fetcher(
            store.clone(),
            params.granularity,
            source.to_string(),
            name.to_string(),
            params.start.timestamp(),
            params.end.timestamp(),
            params.aggregation,
        ));
    }

    let (out_tx, out_rx) = mpsc::channel(1);
    tokio::spawn(merge_query_data(fetchers, out_tx));
    generate_query_output(&params.labels, out_rx, params.start.timezone(), w).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::summarize::generate_summaries;
    use crate::engine::write::write_samples;
    use chrono::{TimeZone, Utc};
    use chrono_tz::America::Los_Angeles;
    use chrono_tz::UTC;

    const TEST_TZ: Tz = Los_Angeles;

    fn lt(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Tz> {
        TEST_TZ
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .earliest()
            .unwrap()
    }

    fn ld(year: i32, month: u32, day: u32) -> DateTime<Tz> {
        lt(year, month, day, 0, 0, 0)
    }

    fn ut(unix: i64) -> DateTime<Tz> {
        DateTime::from_timestamp(unix, 0).unwrap().with_timezone(&UTC)
    }

    fn sample(t: DateTime<Tz>, source: &str, name: &str, value: f32) -> Sample {
        Sample::new(t.with_timezone(&Utc), source, name, value)
    }

    fn point(timestamp: i64, value: f32) -> Point {
        Point { timestamp, value }
    }

    fn float_slices_equal(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    async fn check_query(store: &Datastore, params: QueryParams, expected: &[(&str, Vec<f64>)]) {
        let mut buf = Vec::new();
        do_query(store, &mut buf, &params).await.unwrap();
        let table: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        let cols = table["cols"].as_array().unwrap();
        assert_eq!(cols.len(), params.source_names.len() + 1);
        assert_eq!(cols[0]["type"], "datetime");
        for (i, label) in params.labels.iter().enumerate() {
            assert_eq!(cols[i + 1]["label"], label.as_str());
            assert_eq!(cols[i + 1]["type"], "number");
        }

        let rows = table["rows"].as_array().unwrap();
        assert_eq!(rows.len(), expected.len(), "row count mismatch");
        for (i, (ts, values)) in expected.iter().enumerate() {
            let cells = rows[i]["c"].as_array().unwrap();
            assert_eq!(cells.len(), values.len() + 1, "cell count mismatch in row {i}");
            assert_eq!(cells[0]["v"], *ts, "timestamp mismatch in row {i}");
            for (j, expected_value) in values.iter().enumerate() {
                let cell = &cells[j + 1]["v"];
                if expected_value.is_nan() {
                    assert!(cell.is_null(), "row {i} col {j}: expected null, got {cell}");
                } else {
                    assert_eq!(
                        cell.as_f64().unwrap() as f32,
                        *expected_value as f32,
                        "row {i} col {j}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_average_points() {
        assert_eq!(average_points(&[]), point(0, 0.0));
        assert_eq!(average_points(&[point(10, 5.0)]), point(10, 5.0));
        assert_eq!(
            average_points(&[
                point(10, 1.0),
                point(20, 2.0),
                point(30, 3.0),
                point(40, 4.0),
            ]),
            point(25, 2.5)
        );
    }

    #[tokio::test]
    async fn test_merge_query_data() {
        let inputs = vec![
            vec![point(1, 0.1), point(2, 0.2), point(5, 0.5)],
            vec![point(1, 1.1), point(3, 1.3), point(6, 1.6)],
            vec![point(2, 2.2), point(4, 2.4), point(7, 2.7)],
            vec![point(5, 3.5)],
            vec![point(3, 4.3), point(6, 4.6), point(8, 4.8), point(9, 4.9)],
            vec![],
        ];
        let mut receivers = Vec::new();
        for points in inputs {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                for p in points {
                    if tx.send(Ok(p)).await.is_err() {
                        return;
                    }
                }
            });
            receivers.push(rx);
        }

        let (out_tx, mut out_rx) = mpsc::channel(1);
        tokio::spawn(merge_query_data(receivers, out_tx));

        let nan = f32::NAN;
        let expected = [
            (1, vec![0.1, 1.1, nan, nan, nan, nan]),
            (2, vec![0.2, nan, 2.2, nan, nan, nan]),
            (3, vec![nan, 1.3, nan, nan, 4.3, nan]),
            (4, vec![nan, nan, 2.4, nan, nan, nan]),
            (5, vec![0.5, nan, nan, 3.5, nan, nan]),
            (6, vec![nan, 1.6, nan, nan, 4.6, nan]),
            (7, vec![nan, nan, 2.7, nan, nan, nan]),
            (8, vec![nan, nan, nan, nan, 4.8, nan]),
            (9, vec![nan, nan, nan, nan, 4.9, nan]),
        ];
        for (timestamp, values) in expected {
            let row = out_rx.recv().await.expect("channel closed early").unwrap();
            assert_eq!(row.timestamp, timestamp);
            assert!(
                float_slices_equal(&row.values, &values),
                "expected {values:?} at ts {timestamp}, got {:?}",
                row.values
            );
        }
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_do_query() {
        let store = Datastore::open_in_memory().unwrap();

        let params = QueryParams {
            labels: vec!["B".to_string()],
            source_names: vec!["a|b".to_string()],
            start: ut(2),
            end: ut(4),
            granularity: Granularity::Individual,
            aggregation: 1,
        };
        check_query(&store, params.clone(), &[]).await;

        write_samples(
            &store,
            &[
                sample(ut(1), "a", "b", 0.25),
                sample(ut(2), "a", "b", 0.5),
                sample(ut(2), "a", "c", 0.75),
                sample(ut(2), "a", "d", 0.8),
                sample(ut(2), "b", "b", 0.9),
                sample(ut(3), "a", "b", 1.0),
                sample(ut(4), "a", "c", 1.25),
                sample(ut(5), "a", "b", 1.5),
            ],
        )
        .unwrap();

        check_query(
            &store,
            QueryParams {
                labels: vec!["B".to_string(), "C".to_string()],
                source_names: vec!["a|b".to_string(), "a|c".to_string()],
                start: ut(2),
                end: ut(4),
                granularity: Granularity::Individual,
                aggregation: 1,
            },
            &[
                ("Date(1970,0,1,0,0,2)", vec![0.5, 0.75]),
                ("Date(1970,0,1,0,0,3)", vec![1.0]),
                ("Date(1970,0,1,0,0,4)", vec![f64::NAN, 1.25]),
            ],
        )
        .await;

        // The start time's zone determines the output's zone.
        check_query(
            &store,
            QueryParams {
                labels: vec!["B".to_string(), "C".to_string()],
                source_names: vec!["a|b".to_string(), "a|c".to_string()],
                start: ut(2).with_timezone(&TEST_TZ),
                end: ut(4).with_timezone(&TEST_TZ),
                granularity: Granularity::Individual,
                aggregation: 1,
            },
            &[
                ("Date(1969,11,31,16,0,2)", vec![0.5, 0.75]),
                ("Date(1969,11,31,16,0,3)", vec![1.0]),
                ("Date(1969,11,31,16,0,4)", vec![f64::NAN, 1.25]),
            ],
        )
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_do_query_summaries() {
        let store = Datastore::open_in_memory().unwrap();
        write_samples(
            &store,
            &[
                sample(lt(2015, 7, 1, 0, 0, 0), "a", "b", 1.0),
                sample(lt(2015, 7, 2, 0, 0, 0), "a", "b", 2.0),
                sample(lt(2015, 7, 3, 0, 0, 0), "a", "b", 3.0),
                sample(lt(2015, 7, 3, 0, 30, 0), "a", "b", 4.0),
                sample(lt(2015, 7, 3, 1, 0, 0), "a", "b", 5.0),
                sample(lt(2015, 7, 3, 1, 30, 0), "a", "b", 6.0),
            ],
        )
        .unwrap();
        generate_summaries(&store, lt(2015, 7, 4, 0, 0, 0), Duration::hours(1)).unwrap();

        check_query(
            &store,
            QueryParams {
                labels: vec!["A".to_string()],
                source_names: vec!["a|b".to_string()],
                start: lt(2015, 7, 3, 0, 0, 0),
                end: lt(2015, 7, 3, 2, 0, 0),
                granularity: Granularity::Individual,
                aggregation: 1,
            },
            &[
                ("Date(2015,6,3,0,0,0)", vec![3.0]),
                ("Date(2015,6,3,0,30,0)", vec![4.0]),
                ("Date(2015,6,3,1,0,0)", vec![5.0]),
                ("Date(2015,6,3,1,30,0)", vec![6.0]),
            ],
        )
        .await;

        check_query(
            &store,
            QueryParams {
                labels: vec!["A".to_string()],
                source_names: vec!["a|b".to_string()],
                start: lt(2015, 7, 3, 0, 0, 0),
                end: lt(2015, 7, 3, 4, 0, 0),
                granularity: Granularity::HourlyAverage,
                aggregation: 1,
            },
            &[
                ("Date(2015,6,3,0,0,0)", vec![3.5]),
                ("Date(2015,6,3,1,0,0)", vec![5.5]),
            ],
        )
        .await;

        check_query(
            &store,
            QueryParams {
                labels: vec!["A".to_string()],
                source_names: vec!["a|b".to_string()],
                start: ld(2015, 7, 1),
                end: ld(2015, 7, 4),
                granularity: Granularity::DailyAverage,
                aggregation: 1,
            },
            &[
                ("Date(2015,6,1,0,0,0)", vec![1.0]),
                ("Date(2015,6,2,0,0,0)", vec![2.0]),
                ("Date(2015,6,3,0,0,0)", vec![4.5]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn test_do_query_aggregation() {
        let store = Datastore::open_in_memory().unwrap();
        write_samples(
            &store,
            &[
                sample(lt(2015, 7, 1, 0, 0, 0), "a", "b", 1.0),
                sample(lt(2015, 7, 1, 0, 1, 0), "a", "b", 2.0),
                sample(lt(2015, 7, 1, 0, 2, 0), "a", "b", 3.0),
                sample(lt(2015, 7, 1, 0, 3, 0), "a", "b", 4.0),
                sample(lt(2015, 7, 1, 0, 4, 0), "a", "b", 5.0),
                sample(lt(2015, 7, 1, 0, 5, 0), "a", "b", 6.0),
            ],
        )
        .unwrap();

        let base = QueryParams {
            labels: vec!["A".to_string()],
            source_names: vec!["a|b".to_string()],
            start: ld(2015, 7, 1),
            end: ld(2015, 7, 2),
            granularity: Granularity::Individual,
            aggregation: 1,
        };

        check_query(
            &store,
            QueryParams { aggregation: 2, ..base.clone() },
            &[
                ("Date(2015,6,1,0,0,30)", vec![1.5]),
                ("Date(2015,6,1,0,2,30)", vec![3.5]),
                ("Date(2015,6,1,0,4,30)", vec![5.5]),
            ],
        )
        .await;
        check_query(
            &store,
            QueryParams { aggregation: 3, ..base.clone() },
            &[
                ("Date(2015,6,1,0,1,0)", vec![2.0]),
                ("Date(2015,6,1,0,4,0)", vec![5.0]),
            ],
        )
        .await;
        check_query(
            &store,
            QueryParams { aggregation: 4, ..base.clone() },
            &[
                ("Date(2015,6,1,0,1,30)", vec![2.5]),
                ("Date(2015,6,1,0,4,30)", vec![5.5]),
            ],
        )
        .await;
        check_query(
            &store,
            QueryParams { aggregation: 6, ..base },
            &[("Date(2015,6,1,0,2,30)", vec![3.5])],
        )
        .await;
    }

    #[test]
    fn test_update_granularity_and_aggregation() {
        let minutes = Duration::minutes;

        struct Case {
            start: DateTime<Tz>,
            end: DateTime<Tz>,
            expected_granularity: Granularity,
            expected_aggregation: usize,
        }
        let case = |start, end, expected_granularity, expected_aggregation| Case {
            start,
            end,
            expected_granularity,
            expected_aggregation,
        };

        for c in [
            case(ld(2015, 1, 1), ld(2015, 1, 1), Granularity::Individual, 1),
            case(ld(2015, 1, 1), ld(2015, 1, 2), Granularity::Individual, 2),
            case(ld(2015, 1, 1), ld(2015, 1, 4), Granularity::HourlyAverage, 1),
            case(ld(2015, 1, 1), ld(2015, 1, 8), Granularity::HourlyAverage, 1),
            case(ld(2015, 1, 1), ld(2015, 1, 12), Granularity::HourlyAverage, 2),
            case(ld(2015, 1, 1), ld(2015, 1, 31), Granularity::HourlyAverage, 7),
            case(ld(2015, 1, 1), ld(2015, 3, 1), Granularity::DailyAverage, 1),
            case(ld(2015, 1, 1), ld(2015, 8, 1), Granularity::DailyAverage, 2),
            case(ld(2015, 1, 1), ld(2016, 1, 1), Granularity::DailyAverage, 3),
        ] {
            let mut params = QueryParams {
                labels: vec![],
                source_names: vec![],
                start: c.start,
                end: c.end,
                granularity: Granularity::Individual,
                aggregation: 0,
            };
            params.update_granularity_and_aggregation(minutes(5), Some(ld(2015, 1, 1)));
            assert_eq!(
                (params.granularity, params.aggregation),
                (c.expected_granularity, c.expected_aggregation),
                "bad plan for {} - {}",
                c.start,
                c.end
            );
        }

        // A start before the oldest retained raw sample forces hourly
        // averages even over a short span.
        let mut params = QueryParams {
            labels: vec![],
            source_names: vec![],
            start: ld(2015, 1, 1),
            end: ld(2015, 1, 2),
            granularity: Granularity::Individual,
            aggregation: 0,
        };
        params.update_granularity_and_aggregation(minutes(5), Some(ld(2015, 1, 5)));
        assert_eq!(params.granularity, Granularity::HourlyAverage);
        assert_eq!(params.aggregation, 1);
    }
}
