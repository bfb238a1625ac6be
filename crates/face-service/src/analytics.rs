//! Aggregate KPIs over the recognition event archive.

use chrono::{DateTime, Timelike, Utc};
use common::face::{RecognitionEvent, UNKNOWN_LABEL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of names kept in the frequency ranking
pub const TOP_FREQUENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub identity_count: usize,
    pub total_events: usize,
    pub unknown_events: usize,

    /// Share of unknown events, rounded percent
    pub unknown_rate: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_age: Option<u32>,

    pub male_percent: u32,
    pub female_percent: u32,

    /// Event counts per UTC hour of day, index 0 is midnight
    pub hourly: Vec<usize>,

    pub age_groups: Vec<NamedCount>,

    /// Sorted by descending count
    pub expressions: Vec<NamedCount>,

    /// Most frequent names, unknowns grouped under one label
    pub top_identities: Vec<NamedCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

impl NamedCount {
    fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

fn utc_hour(timestamp_ms: u64) -> usize {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.hour() as usize)
        .unwrap_or(0)
}

/// Counts sorted by descending count, ties by name so output is stable
fn ranked(counts: HashMap<String, usize>) -> Vec<NamedCount> {
    let mut ranked: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked
}

pub fn summarize<'a, I>(events: I, identity_count: usize) -> AnalyticsSummary
where
    I: IntoIterator<Item = &'a RecognitionEvent>,
{
    let mut total = 0;
    let mut unknown = 0;
    let mut male = 0;
    let mut female = 0;
    let mut age_sum: u64 = 0;
    let mut with_age = 0;
    let mut hourly = vec![0usize; 24];
    let mut age_groups = [0usize; 4];
    let mut expressions: HashMap<String, usize> = HashMap::new();
    let mut frequency: HashMap<String, usize> = HashMap::new();

    for event in events {
        total += 1;
        if event.is_unknown {
            unknown += 1;
        }

        match event.gender.as_deref() {
            Some("male") => male += 1,
            Some("female") => female += 1,
            _ => {}
        }

        if let Some(age) = event.age {
            age_sum += u64::from(age);
            with_age += 1;
            let group = match age {
                0..=17 => 0,
                18..=29 => 1,
                30..=49 => 2,
                _ => 3,
            };
            age_groups[group] += 1;
        }

        hourly[utc_hour(event.timestamp)] += 1;

        if let Some(expression) = &event.expression {
            *expressions.entry(expression.clone()).or_default() += 1;
        }

        let name = if event.is_unknown {
            UNKNOWN_LABEL
        } else {
            event.identity_name.as_str()
        };
        *frequency.entry(name.to_string()).or_default() += 1;
    }

    let average_age = (with_age > 0).then(|| (age_sum as f64 / with_age as f64).round() as u32);

    let mut top_identities = ranked(frequency);
    top_identities.truncate(TOP_FREQUENCY);

    AnalyticsSummary {
        identity_count,
        total_events: total,
        unknown_events: unknown,
        unknown_rate: percent(unknown, total),
        average_age,
        male_percent: percent(male, total),
        female_percent: percent(female, total),
        hourly,
        age_groups: vec![
            NamedCount::new("<18", age_groups[0]),
            NamedCount::new("18-30", age_groups[1]),
            NamedCount::new("30-50", age_groups[2]),
            NamedCount::new("50+", age_groups[3]),
        ],
        expressions: ranked(expressions),
        top_identities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(name: &str, hour: u64, age: Option<u32>, gender: Option<&str>) -> RecognitionEvent {
        RecognitionEvent {
            id: Uuid::new_v4(),
            timestamp: hour * 3_600_000 + 60_000,
            identity_name: name.to_string(),
            identity_id: None,
            confidence: 70,
            is_unknown: name == UNKNOWN_LABEL,
            age,
            gender: gender.map(str::to_string),
            expression: None,
        }
    }

    #[test]
    fn test_empty_archive() {
        let summary = summarize(&Vec::<RecognitionEvent>::new(), 3);
        assert_eq!(summary.identity_count, 3);
        assert_eq!(summary.total_events, 0);
        assert_eq!(summary.unknown_rate, 0);
        assert_eq!(summary.average_age, None);
        assert_eq!(summary.hourly.len(), 24);
        assert!(summary.top_identities.is_empty());
    }

    #[test]
    fn test_kpis() {
        let mut happy = event("Alice", 9, Some(25), Some("female"));
        happy.expression = Some("happy".to_string());
        let mut neutral = event("Bob", 9, Some(52), Some("male"));
        neutral.expression = Some("neutral".to_string());
        let mut happy_again = event("Unknown", 14, Some(16), None);
        happy_again.expression = Some("happy".to_string());

        let events = vec![happy, neutral, happy_again];
        let summary = summarize(&events, 2);

        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.unknown_events, 1);
        assert_eq!(summary.unknown_rate, 33);
        assert_eq!(summary.average_age, Some(31));
        assert_eq!(summary.male_percent, 33);
        assert_eq!(summary.female_percent, 33);
        assert_eq!(summary.hourly[9], 2);
        assert_eq!(summary.hourly[14], 1);

        let groups: Vec<usize> = summary.age_groups.iter().map(|g| g.count).collect();
        assert_eq!(groups, vec![1, 1, 0, 1]);

        assert_eq!(summary.expressions[0], NamedCount::new("happy", 2));
        assert_eq!(summary.expressions[1], NamedCount::new("neutral", 1));
    }

    #[test]
    fn test_age_group_boundaries() {
        let events: Vec<_> = [17, 18, 29, 30, 49, 50]
            .into_iter()
            .map(|age| event("Alice", 0, Some(age), None))
            .collect();
        let groups: Vec<usize> = summarize(&events, 1)
            .age_groups
            .iter()
            .map(|g| g.count)
            .collect();
        assert_eq!(groups, vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_top_frequency_groups_unknowns() {
        let mut events = Vec::new();
        for (name, n) in [
            ("Unknown", 6),
            ("Alice", 5),
            ("Bob", 4),
            ("Carol", 3),
            ("Dave", 2),
            ("Eve", 1),
        ] {
            for _ in 0..n {
                events.push(event(name, 0, None, None));
            }
        }

        let top = summarize(&events, 5).top_identities;
        assert_eq!(top.len(), TOP_FREQUENCY);
        assert_eq!(top[0], NamedCount::new(UNKNOWN_LABEL, 6));
        assert_eq!(top[4], NamedCount::new("Dave", 2));
    }
}
