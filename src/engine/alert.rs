//! Alert conditions: evaluation against the latest samples, state
//! transitions, and notification composition.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::EngineError;
use crate::db::{
    AlertState, Cmp, ConditionState, Datastore, DbError, Field, ALERT_STATE_KIND, SAMPLE_KIND,
    SINGLETON_ID,
};
use crate::sample::Sample;

/// Comparison applied between a condition's threshold and its series' latest
/// sample. `Ot` ("older than") instead compares the sample's age in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Ot,
}

impl fmt::Display for CondOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CondOp::Eq => "eq",
            CondOp::Ne => "ne",
            CondOp::Lt => "lt",
            CondOp::Gt => "gt",
            CondOp::Le => "le",
            CondOp::Ge => "ge",
            CondOp::Ot => "ot",
        };
        f.write_str(s)
    }
}

/// A rule responsible for triggering an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub source: String,
    pub name: String,
    pub op: CondOp,
    /// Threshold; seconds for [`CondOp::Ot`].
    pub value: f32,
}

impl Condition {
    /// Returns a string uniquely identifying this condition.
    pub fn id(&self) -> String {
        format!("{}|{}|{}|{:.1}", self.source, self.name, self.op, self.value)
    }

    fn series_key(&self) -> String {
        format!("{}|{}", self.source, self.name)
    }

    /// Whether the condition holds against `sample`. A missing sample only
    /// activates `ot`.
    fn is_active(&self, sample: Option<&Sample>, now: DateTime<Utc>) -> bool {
        match self.op {
            CondOp::Eq => sample.is_some_and(|s| s.value == self.value),
            CondOp::Ne => sample.is_some_and(|s| s.value != self.value),
            CondOp::Lt => sample.is_some_and(|s| s.value < self.value),
            CondOp::Gt => sample.is_some_and(|s| s.value > self.value),
            CondOp::Le => sample.is_some_and(|s| s.value <= self.value),
            CondOp::Ge => sample.is_some_and(|s| s.value >= self.value),
            CondOp::Ot => match sample {
                None => true,
                Some(s) => {
                    now.signed_duration_since(s.timestamp)
                        > Duration::seconds(self.value as i64)
                }
            },
        }
    }

    /// Human-readable rendering of the condition and its sample's current
    /// value.
    fn msg(&self, sample: Option<&Sample>, now: DateTime<Utc>) -> String {
        if self.op == CondOp::Ot {
            let age = match sample {
                None => "missing".to_string(),
                Some(s) => format!("{}s", now.signed_duration_since(s.timestamp).num_seconds()),
            };
            return format!(
                "{}.{} ot {}s: {}",
                self.source, self.name, self.value as i64, age
            );
        }
        let value = match sample {
            None => "missing".to_string(),
            Some(s) => format!("{:.1}", s.value),
        };
        format!(
            "{}.{} {} {:.1}: {}",
            self.source, self.name, self.op, self.value, value
        )
    }
}

/// A composed notification. Delivery is an adapter concern; see [`Notifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub sender: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers alert notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, msg: &AlertMessage) -> Result<(), EngineError>;
}

/// Notifier that only records the alert in the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, msg: &AlertMessage) -> Result<(), EngineError> {
        tracing::warn!(to = msg.to.join(",").as_str(), "{}: {}", msg.subject, msg.body);
        Ok(())
    }
}

/// Evaluates `conds` against the latest samples, updates the stored alert
/// state, and notifies when any condition starts or ends.
pub async fn evaluate_conds(
    store: &Datastore,
    conds: &[Condition],
    now: DateTime<Utc>,
    sender: &str,
    recipients: &[String],
    notifier: &dyn Notifier,
) -> Result<(), EngineError> {
    tracing::debug!("getting samples for {} condition(s)", conds.len());
    let samples = get_samples_for_conditions(store, conds).await?;

    tracing::debug!("evaluating condition(s) against {} sample(s)", samples.len());
    let states = get_condition_states(conds, &samples, now);

    tracing::debug!("updating alert state");
    let (started, continuing, ended) = update_alert_state(store, states, now)?;

    if let Some(msg) = create_alert_message(sender, recipients, &started, &continuing, &ended) {
        tracing::debug!("sending alert: {}", msg.body);
        notifier.notify(&msg)?;
    }
    Ok(())
}

/// Fetches the most recent sample of every series referenced by `conds`, in
/// parallel. The returned map is keyed by "source|name"; series with no
/// samples are absent.
async fn get_samples_for_conditions(
    store: &Datastore,
    conds: &[Condition],
) -> Result<HashMap<String, Sample>, EngineError> {
    let mut series: Vec<(String, String)> = conds
        .iter()
        .map(|c| (c.source.clone(), c.name.clone()))
        .collect();
    series.sort();
    series.dedup();

    let mut tasks = Vec::with_capacity(series.len());
    for (source, name) in series {
        let store = store.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let latest: Vec<Sample> = store
                .query(SAMPLE_KIND)
                .filter(Field::Source, Cmp::Eq, source.as_str())
                .filter(Field::Name, Cmp::Eq, name.as_str())
                .order_desc(Field::Timestamp)
                .limit(1)
                .get_all()?;
            Ok::<Option<Sample>, DbError>(latest.into_iter().next())
        }));
    }

    let mut samples = HashMap::new();
    for task in tasks {
        if let Some(sample) = task.await?? {
            samples.insert(format!("{}|{}", sample.source, sample.name), sample);
        }
    }
    Ok(samples)
}

/// Computes the current state of every condition. `samples` is keyed by
/// "source|name".
fn get_condition_states(
    conds: &[Condition],
    samples: &HashMap<String, Sample>,
    now: DateTime<Utc>,
) -> Vec<ConditionState> {
    conds
        .iter()
        .map(|cond| {
            let sample = samples.get(&cond.series_key());
            let active_since = cond.is_active(sample, now).then_some(now);
            ConditionState {
                id: cond.id(),
                active_since,
                msg: cond.msg(sample, now),
            }
        })
        .collect()
}

/// Diffs the new condition states against the stored alert state, saves the
/// updated state, and returns the (started, continuing, ended) sets.
#[allow(clippy::type_complexity)]
fn update_alert_state(
    store: &Datastore,
    new_states: Vec<ConditionState>,
    now: DateTime<Utc>,
) -> Result<(Vec<ConditionState>, Vec<ConditionState>, Vec<ConditionState>), EngineError> {
    let previous = match store.get::<AlertState>(ALERT_STATE_KIND, SINGLETON_ID) {
        Ok(state) => state,
        Err(DbError::NotFound) => AlertState::default(),
        Err(e) => return Err(e.into()),
    };
    let old: HashMap<String, ConditionState> = previous
        .active
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();

    let mut started = Vec::new();
    let mut continuing = Vec::new();
    let mut ended = Vec::new();
    for mut state in new_states {
        if state.active_since.is_some() {
            if let Some(old_state) = old.get(&state.id) {
                state.active_since = old_state.active_since;
                continuing.push(state);
            } else {
                state.active_since = Some(now);
                started.push(state);
            }
        } else if let Some(old_state) = old.get(&state.id) {
            state.active_since = old_state.active_since;
            ended.push(state);
        }
    }

    let active: Vec<ConditionState> = started.iter().chain(continuing.iter()).cloned().collect();
    store.put_multi(
        ALERT_STATE_KIND,
        &[AlertState {
            active,
            last_eval_time: now,
        }],
    )?;
    Ok((started, continuing, ended))
}

/// Composes the notification body, or `None` when nothing started or ended.
/// Continue-only evaluations stay quiet.
fn create_alert_message(
    sender: &str,
    recipients: &[String],
    started: &[ConditionState],
    continuing: &[ConditionState],
    ended: &[ConditionState],
) -> Option<AlertMessage> {
    if started.is_empty() && ended.is_empty() {
        return None;
    }

    let section = |heading: &str, states: &[ConditionState]| {
        let msgs: Vec<&str> = states.iter().map(|s| s.msg.as_str()).collect();
        format!("{}\n{}", heading, msgs.join("\n"))
    };

    let mut sections = Vec::new();
    if !started.is_empty() {
        sections.push(section("New alerts:", started));
    }
    if !ended.is_empty() {
        sections.push(section("Ended alerts:", ended));
    }
    if !continuing.is_empty() {
        sections.push(section("Continuing alerts:", continuing));
    }

    Some(AlertMessage {
        sender: sender.to_string(),
        to: recipients.to_vec(),
        subject: "Alerts updated".to_string(),
        body: sections.join("\n\n"),
    })
}
