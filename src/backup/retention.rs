use chrono::{DateTime, Utc};
use dyn_iter::{DynIter, IntoDynIterator};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use validator::Validate;

/// Keeps the backups of the `count` most recent runs.
///
/// Every file written by one run carries the same timestamp, so counting
/// distinct timestamps counts backup sets rather than files.
#[derive(Clone, Copy, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[validate(range(min = 1))]
    pub count: usize,
}

impl RetentionConfig {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    /// Returns the items that fall outside the retention window, newest first.
    pub fn get_delete<'a, R, I>(&self, iter: I) -> DynIter<'a, ItemWithDateTime<R>>
    where
        R: 'a,
        I: IntoIterator<Item = ItemWithDateTime<R>>,
    {
        let sorted = iter
            .into_iter()
            .sorted_unstable_by_key(|i| Reverse(i.date_time))
            .collect_vec();
        let keep: HashSet<DateTime<Utc>> = sorted
            .iter()
            .map(|i| i.date_time)
            .dedup()
            .take(self.count)
            .collect();

        sorted
            .into_iter()
            .filter(move |i| !keep.contains(&i.date_time))
            .into_dyn_iter()
    }
}

#[derive(Clone, Hash, Eq, PartialEq)]
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

impl<R: Debug> Debug for ItemWithDateTime<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}@{}", self.item, self.date_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_keeps_most_recent_distinct_dates() {
        let items = vec![
            ItemWithDateTime::from(("d1", at(1))),
            ItemWithDateTime::from(("d4", at(4))),
            ItemWithDateTime::from(("d2", at(2))),
            ItemWithDateTime::from(("d3", at(3))),
        ];

        let deleted = RetentionConfig::new(2)
            .get_delete(items)
            .map(|i| i.item)
            .collect_vec();
        assert_eq!(deleted, vec!["d2", "d1"]);
    }

    #[test]
    fn test_files_of_one_run_share_a_slot() {
        // two files with the same run timestamp count as one backup set
        let items = vec![
            ItemWithDateTime::from(("a3", at(3))),
            ItemWithDateTime::from(("b3", at(3))),
            ItemWithDateTime::from(("a2", at(2))),
            ItemWithDateTime::from(("a1", at(1))),
        ];

        let deleted = RetentionConfig::new(2)
            .get_delete(items)
            .map(|i| i.item)
            .collect_vec();
        assert_eq!(deleted, vec!["a1"]);
    }

    #[test]
    fn test_nothing_deleted_when_under_count() {
        let items = vec![ItemWithDateTime::from(("d1", at(1)))];
        assert_eq!(RetentionConfig::new(3).get_delete(items).count(), 0);

        let empty: Vec<ItemWithDateTime<&str>> = vec![];
        assert_eq!(RetentionConfig::new(1).get_delete(empty).count(), 0);
    }

    #[test]
    fn test_retention_config_validation() {
        assert!(RetentionConfig::new(1).validate().is_ok());
        assert!(RetentionConfig::new(0).validate().is_err());
    }
}
