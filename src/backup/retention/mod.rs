pub mod coordinator;
pub mod prune;

use chrono::{DateTime, Datelike, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::cmp::Reverse;
use std::time::Duration;
use validator::Validate;

fn default_keep_last() -> usize {
    1
}

/// Grandfather-father-son retention.
///
/// Backups younger than `default_retention` are always kept, and so are the
/// newest `keep_last`. An older backup survives only while some tier's
/// window covers its age and no newer kept backup shares its year, month or
/// day for that tier.
#[skip_serializing_none]
#[derive(Clone, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    #[serde(with = "humantime_serde")]
    pub default_retention: Duration,
    #[serde(default, with = "humantime_serde")]
    pub daily_retention: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub monthly_retention: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub yearly_retention: Option<Duration>,
    #[serde(default = "default_keep_last")]
    #[validate(range(min = 1))]
    pub keep_last: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tier {
    Yearly,
    Monthly,
    Daily,
}

impl Tier {
    fn bucket(self, date_time: &DateTime<Utc>) -> (i32, u32, u32) {
        match self {
            Tier::Yearly => (date_time.year(), 0, 0),
            Tier::Monthly => (date_time.year(), date_time.month(), 0),
            Tier::Daily => (date_time.year(), date_time.month(), date_time.day()),
        }
    }
}

impl RetentionPolicy {
    fn tiers(&self) -> [(Tier, Option<Duration>); 3] {
        [
            (Tier::Yearly, self.yearly_retention),
            (Tier::Monthly, self.monthly_retention),
            (Tier::Daily, self.daily_retention),
        ]
    }

    /// Items to delete, newest first.
    pub fn select_for_deletion<R, I>(&self, items: I, now: DateTime<Utc>) -> Vec<ItemWithDateTime<R>>
    where
        I: IntoIterator<Item = ItemWithDateTime<R>>,
    {
        let tiers = self.tiers();
        let mut last_kept: [Option<(i32, u32, u32)>; 3] = [None; 3];

        items
            .into_iter()
            .sorted_unstable_by_key(|item| Reverse(item.date_time))
            .enumerate()
            .filter_map(|(index, item)| {
                // clock skew can put a backup in the future, treat it as brand new
                let age = now
                    .signed_duration_since(item.date_time)
                    .to_std()
                    .unwrap_or_default();
                if index < self.keep_last || age < self.default_retention {
                    for ((tier, _), last) in tiers.iter().zip(last_kept.iter_mut()) {
                        *last = Some(tier.bucket(&item.date_time));
                    }
                    return None;
                }

                let mut keep = false;
                for ((tier, retention), last) in tiers.iter().zip(last_kept.iter_mut()) {
                    let Some(retention) = retention else { continue };
                    let bucket = tier.bucket(&item.date_time);
                    if age < *retention && *last != Some(bucket) {
                        tracing::trace!("{:?} tier keeps {}", tier, item.date_time);
                        *last = Some(bucket);
                        keep = true;
                    }
                }
                (!keep).then_some(item)
            })
            .collect()
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R> {
    pub item: R,
    pub date_time: DateTime<Utc>,
}

impl<R> From<(R, DateTime<Utc>)> for ItemWithDateTime<R> {
    fn from(value: (R, DateTime<Utc>)) -> Self {
        Self {
            item: value.0,
            date_time: value.1,
        }
    }
}
