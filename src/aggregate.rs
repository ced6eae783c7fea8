//! # Aggregator
//! Derived view over one merged batch of [`CallRecord`]s.
//!
//! Pure function of its input. With no valid record every derived field is
//! `None` ("no data"); a zero here would read as zero-minute calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ingest::types::CallRecord;

/// Mean call duration for one agent. `agent_name: None` is the unknown-agent bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAverage {
    pub agent_name: Option<String>,
    pub average_duration: f64,
    pub calls: usize,
}

/// Record count for one feedback label. `label: None` is the no-feedback bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackBucket {
    pub label: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub average_duration: Option<f64>,
    /// Sorted by agent name, unknown-agent bucket first.
    pub agent_performance: Option<Vec<AgentAverage>>,
    /// Sorted by label, no-feedback bucket first.
    pub feedback_distribution: Option<Vec<FeedbackBucket>>,
    pub total_records: usize,
    pub valid_records: usize,
}

impl AggregateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.valid_records == 0
    }

    pub fn agent_average(&self, agent: Option<&str>) -> Option<f64> {
        self.agent_performance
            .as_ref()?
            .iter()
            .find(|a| a.agent_name.as_deref() == agent)
            .map(|a| a.average_duration)
    }

    pub fn feedback_count(&self, label: Option<&str>) -> Option<usize> {
        self.feedback_distribution
            .as_ref()?
            .iter()
            .find(|b| b.label.as_deref() == label)
            .map(|b| b.count)
    }
}

#[derive(Default)]
struct Acc {
    sum: f64,
    n: usize,
}

impl Acc {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.n += 1;
    }

    fn mean(&self) -> Option<f64> {
        if self.n == 0 {
            None
        } else {
            Some(self.sum / self.n as f64)
        }
    }
}

pub fn aggregate(records: &[CallRecord]) -> AggregateSnapshot {
    let (valid, _invalid): (Vec<&CallRecord>, Vec<&CallRecord>) =
        records.iter().partition(|r| r.has_valid_duration());

    if valid.is_empty() {
        return AggregateSnapshot {
            average_duration: None,
            agent_performance: None,
            feedback_distribution: None,
            total_records: records.len(),
            valid_records: 0,
        };
    }

    let mut overall = Acc::default();
    let mut per_agent: BTreeMap<Option<&str>, Acc> = BTreeMap::new();
    for r in &valid {
        overall.push(r.call_duration);
        per_agent
            .entry(r.agent_name.as_deref())
            .or_default()
            .push(r.call_duration);
    }

    // Every input record lands in exactly one bucket, valid duration or not.
    let mut per_label: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    for r in records {
        *per_label.entry(r.customer_feedback.as_deref()).or_insert(0) += 1;
    }

    let agent_performance = per_agent
        .into_iter()
        .filter_map(|(agent, acc)| {
            acc.mean().map(|avg| AgentAverage {
                agent_name: agent.map(str::to_string),
                average_duration: avg,
                calls: acc.n,
            })
        })
        .collect();

    let feedback_distribution = per_label
        .into_iter()
        .map(|(label, count)| FeedbackBucket {
            label: label.map(str::to_string),
            count,
        })
        .collect();

    AggregateSnapshot {
        average_duration: overall.mean(),
        agent_performance: Some(agent_performance),
        feedback_distribution: Some(feedback_distribution),
        total_records: records.len(),
        valid_records: valid.len(),
    }
}

/// Groups of feedback labels that differ only by case or surrounding
/// whitespace. They stay separate buckets; this only reports them.
pub fn feedback_label_variants(snapshot: &AggregateSnapshot) -> Vec<Vec<String>> {
    let Some(buckets) = snapshot.feedback_distribution.as_ref() else {
        return Vec::new();
    };
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for label in buckets.iter().filter_map(|b| b.label.as_ref()) {
        groups
            .entry(label.trim().to_lowercase())
            .or_default()
            .push(label.clone());
    }
    groups.into_values().filter(|g| g.len() > 1).collect()
}
