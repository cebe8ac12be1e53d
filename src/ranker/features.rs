//! Feature engineering for the learned ranker.
//!
//! The feature vector is the shared contract between dataset building,
//! training, and inference: same columns, same order, same semantics.
//! All three go through `feature_row` so they cannot drift apart.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::storage::ResolvedPair;

/// Fixed feature column order.
pub const FEATURE_COLUMNS: [&str; 5] = [
    "topic_match",
    "component_match",
    "bugs_fixed_total",
    "bugs_fixed_topic",
    "recent_days",
];

/// Recency value for a developer with no recorded activity.
pub const RECENCY_SENTINEL_DAYS: f64 = 9999.0;

/// Fix-history aggregate for one developer.
#[derive(Debug, Clone, Default)]
pub struct DevProfile {
    pub dev_id: String,
    pub bugs_fixed_total: u64,
    pub per_topic: BTreeMap<i64, u64>,
    pub components: BTreeSet<String>,
}

impl DevProfile {
    pub fn bugs_fixed_topic(&self, topic_id: i64) -> u64 {
        self.per_topic.get(&topic_id).copied().unwrap_or(0)
    }
}

/// One scored candidate row: a developer and its feature values, in
/// `FEATURE_COLUMNS` order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FeatureRow {
    pub dev_id: String,
    pub values: [f64; 5],
}

/// Aggregate resolved (bug, developer) history into per-developer
/// profiles, keyed by dev id.
pub fn build_profiles(pairs: &[ResolvedPair]) -> BTreeMap<String, DevProfile> {
    let mut profiles: BTreeMap<String, DevProfile> = BTreeMap::new();
    for pair in pairs {
        let p = profiles
            .entry(pair.dev_id.clone())
            .or_insert_with(|| DevProfile {
                dev_id: pair.dev_id.clone(),
                ..Default::default()
            });
        p.bugs_fixed_total += 1;
        *p.per_topic.entry(pair.topic_id).or_insert(0) += 1;
        if !pair.component.is_empty() {
            p.components.insert(pair.component.clone());
        }
    }
    profiles
}

/// Compute the feature vector for one (bug, developer) pairing.
pub fn feature_row(
    profile: &DevProfile,
    bug_topic: i64,
    bug_component: &str,
    last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> FeatureRow {
    let fixed_topic = profile.bugs_fixed_topic(bug_topic);
    // Share of the developer's fixes that fall in this topic
    let topic_match = if profile.bugs_fixed_total > 0 {
        fixed_topic as f64 / profile.bugs_fixed_total as f64
    } else {
        0.0
    };
    let component_match = if !bug_component.is_empty() && profile.components.contains(bug_component)
    {
        1.0
    } else {
        0.0
    };
    let recent_days = match last_active {
        Some(t) => {
            let days = (now - t).num_seconds() as f64 / 86_400.0;
            days.max(0.0)
        }
        None => RECENCY_SENTINEL_DAYS,
    };
    FeatureRow {
        dev_id: profile.dev_id.clone(),
        values: [
            topic_match,
            component_match,
            profile.bugs_fixed_total as f64,
            fixed_topic as f64,
            recent_days,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pair(bug: &str, dev: &str, topic: i64, component: &str) -> ResolvedPair {
        ResolvedPair {
            bug_id: bug.into(),
            dev_id: dev.into(),
            topic_id: topic,
            component: component.into(),
        }
    }

    #[test]
    fn test_profiles_aggregate_per_developer() {
        let pairs = vec![
            pair("b1", "a@x.com", 3, "Graphics"),
            pair("b2", "a@x.com", 3, "Layout"),
            pair("b3", "a@x.com", 5, "Graphics"),
            pair("b4", "b@x.com", 3, "Graphics"),
        ];
        let profiles = build_profiles(&pairs);
        assert_eq!(profiles.len(), 2);

        let a = &profiles["a@x.com"];
        assert_eq!(a.bugs_fixed_total, 3);
        assert_eq!(a.bugs_fixed_topic(3), 2);
        assert_eq!(a.bugs_fixed_topic(5), 1);
        assert_eq!(a.bugs_fixed_topic(99), 0);
        assert!(a.components.contains("Layout"));
    }

    #[test]
    fn test_feature_row_matches_and_counts() {
        let profiles = build_profiles(&[
            pair("b1", "a@x.com", 3, "Graphics"),
            pair("b2", "a@x.com", 3, "Graphics"),
        ]);
        let now = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
        let active = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let row = feature_row(&profiles["a@x.com"], 3, "Graphics", Some(active), now);
        assert_eq!(row.values[0], 1.0); // topic_match
        assert_eq!(row.values[1], 1.0); // component_match
        assert_eq!(row.values[2], 2.0); // bugs_fixed_total
        assert_eq!(row.values[3], 2.0); // bugs_fixed_topic
        assert!((row.values[4] - 10.0).abs() < 1e-6); // recent_days
    }

    #[test]
    fn test_feature_row_mismatches_are_zero() {
        let profiles = build_profiles(&[pair("b1", "a@x.com", 3, "Graphics")]);
        let now = Utc::now();
        let row = feature_row(&profiles["a@x.com"], 7, "Networking", None, now);
        assert_eq!(row.values[0], 0.0);
        assert_eq!(row.values[1], 0.0);
        assert_eq!(row.values[3], 0.0);
        assert_eq!(row.values[4], RECENCY_SENTINEL_DAYS);
    }

    #[test]
    fn test_future_activity_clamps_to_zero_days() {
        let profiles = build_profiles(&[pair("b1", "a@x.com", 3, "Graphics")]);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let row = feature_row(&profiles["a@x.com"], 3, "Graphics", Some(future), now);
        assert_eq!(row.values[4], 0.0);
    }

    #[test]
    fn test_column_names_match_vector_width() {
        assert_eq!(FEATURE_COLUMNS.len(), 5);
    }
}
