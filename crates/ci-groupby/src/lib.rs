#![forbid(unsafe_code)]

use std::{borrow::Cow, collections::HashMap};

use ci_quantile::{five_number_summary, median};
use ci_types::{
    CategoricalField, CountAggregate, FiveNumberSummary, Kpi, Numeric, NumericField,
    RateAggregate, Record,
};

/// Groups `records` by `key_of`, folding each record into its group's
/// accumulator. Groups come back in first-seen key order; records whose key
/// is `None` are skipped.
fn accumulate<'a, I, F, K, A, U>(records: I, mut key_of: F, mut update: U) -> Vec<(Cow<'a, str>, A)>
where
    I: IntoIterator<Item = &'a Record>,
    F: FnMut(&'a Record) -> Option<K>,
    K: Into<Cow<'a, str>>,
    A: Default,
    U: FnMut(&mut A, &'a Record),
{
    let mut groups = Vec::<(Cow<'a, str>, A)>::new();
    let mut slot = HashMap::<Cow<'a, str>, usize>::new();

    for record in records {
        let Some(key) = key_of(record) else {
            continue;
        };
        let key = key.into();
        let pos = match slot.get(&key) {
            Some(&pos) => pos,
            None => {
                let pos = groups.len();
                slot.insert(key.clone(), pos);
                groups.push((key, A::default()));
                pos
            }
        };
        update(&mut groups[pos].1, record);
    }

    groups
}

/// One `CountAggregate` per distinct key, in first-seen order.
pub fn count_by<'a, I, F, K>(records: I, key_of: F) -> Vec<CountAggregate>
where
    I: IntoIterator<Item = &'a Record>,
    F: FnMut(&'a Record) -> Option<K>,
    K: Into<Cow<'a, str>>,
{
    accumulate(records, key_of, |count: &mut usize, _| *count += 1)
        .into_iter()
        .map(|(key, count)| CountAggregate {
            key: key.into_owned(),
            count,
        })
        .collect()
}

/// Share of each group matching `matches`, in first-seen order.
///
/// Groups only exist for observed keys, so every emitted aggregate has
/// `total >= 1`.
pub fn rate_by<'a, I, F, K, P>(records: I, key_of: F, mut matches: P) -> Vec<RateAggregate>
where
    I: IntoIterator<Item = &'a Record>,
    F: FnMut(&'a Record) -> Option<K>,
    K: Into<Cow<'a, str>>,
    P: FnMut(&Record) -> bool,
{
    accumulate(
        records,
        key_of,
        |(matched, total): &mut (usize, usize), record| {
            *total += 1;
            if matches(record) {
                *matched += 1;
            }
        },
    )
    .into_iter()
    .filter_map(|(key, (matched, total))| RateAggregate::new(key, matched, total))
    .collect()
}

/// Per-group five-number summary of `value_of`. `NaN` cells are left out of
/// the sample; a group with no valid value is dropped.
pub fn five_number_by<'a, I, F, K, V>(records: I, key_of: F, mut value_of: V) -> Vec<FiveNumberSummary>
where
    I: IntoIterator<Item = &'a Record>,
    F: FnMut(&'a Record) -> Option<K>,
    K: Into<Cow<'a, str>>,
    V: FnMut(&Record) -> Numeric,
{
    accumulate(records, key_of, |sample: &mut Vec<f64>, record| {
        if let Some(v) = value_of(record).to_f64() {
            sample.push(v);
        }
    })
    .into_iter()
    .filter_map(|(key, sample)| {
        let summary = five_number_summary(sample)?;
        Some(FiveNumberSummary {
            key: key.into_owned(),
            min: summary.min,
            q1: summary.q1,
            median: summary.median,
            q3: summary.q3,
            max: summary.max,
        })
    })
    .collect()
}

/// Convenience: `count_by` keyed on a categorical column.
pub fn count_by_field<'a, I>(records: I, field: CategoricalField) -> Vec<CountAggregate>
where
    I: IntoIterator<Item = &'a Record>,
{
    count_by(records, |record: &'a Record| Some(record.category(field)))
}

/// Convenience: `rate_by` keyed on a categorical column.
pub fn rate_by_field<'a, I, P>(records: I, field: CategoricalField, matches: P) -> Vec<RateAggregate>
where
    I: IntoIterator<Item = &'a Record>,
    P: FnMut(&Record) -> bool,
{
    rate_by(records, |record: &'a Record| Some(record.category(field)), matches)
}

/// Convenience: `five_number_by` with both key and value named by column.
pub fn five_number_by_field<'a, I>(
    records: I,
    key: CategoricalField,
    value: NumericField,
) -> Vec<FiveNumberSummary>
where
    I: IntoIterator<Item = &'a Record>,
{
    five_number_by(
        records,
        |record: &'a Record| Some(record.category(key)),
        |record| record.numeric(value),
    )
}

/// Income above 50K.
#[must_use]
pub fn is_high_income(record: &Record) -> bool {
    record.income.is_high()
}

/// Pre-filter for `Iterator::filter` that drops records whose `field` holds
/// the unknown sentinel.
pub fn exclude_unknown(field: CategoricalField) -> impl Fn(&&Record) -> bool {
    move |record: &&Record| !record.is_unknown(field)
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Aggregates carry the group key used as the tie-breaker.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for CountAggregate {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Keyed for RateAggregate {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Keyed for FiveNumberSummary {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Sorts by `metric` in `order`; equal metrics fall back to ascending
/// lexical key order so output is reproducible.
pub fn sort_by_metric<T, M>(items: &mut [T], mut metric: M, order: SortOrder)
where
    T: Keyed,
    M: FnMut(&T) -> f64,
{
    items.sort_by(|a, b| {
        let primary = metric(a).total_cmp(&metric(b));
        let primary = match order {
            SortOrder::Ascending => primary,
            SortOrder::Descending => primary.reverse(),
        };
        primary.then_with(|| a.key().cmp(b.key()))
    });
}

pub fn sort_rates(items: &mut [RateAggregate], order: SortOrder) {
    sort_by_metric(items, |item| item.rate, order);
}

pub fn sort_counts(items: &mut [CountAggregate], order: SortOrder) {
    sort_by_metric(items, |item| item.count as f64, order);
}

/// Numeric level of each education label: the smallest valid
/// `education_num` seen with it.
pub fn education_levels<'a, I>(records: I) -> HashMap<String, i64>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut levels = HashMap::<String, i64>::new();
    for record in records {
        let Some(level) = record.education_num.value() else {
            continue;
        };
        levels
            .entry(record.education.clone())
            .and_modify(|current| *current = (*current).min(level))
            .or_insert(level);
    }
    levels
}

/// Ascending by level. Keys without a known level sort last.
pub fn sort_by_level<T: Keyed>(items: &mut [T], levels: &HashMap<String, i64>) {
    sort_by_metric(
        items,
        |item| {
            levels
                .get(item.key())
                .map_or(f64::INFINITY, |level| *level as f64)
        },
        SortOrder::Ascending,
    );
}

// ---------------------------------------------------------------------------
// KPIs
// ---------------------------------------------------------------------------

/// Dataset-wide scalars, computed in one pass over the full record set.
#[must_use]
pub fn summarize_kpis(records: &[Record]) -> Kpi {
    if records.is_empty() {
        return Kpi::empty();
    }

    let mut high = 0_usize;
    let mut ages = Vec::with_capacity(records.len());
    for record in records {
        if is_high_income(record) {
            high += 1;
        }
        if let Some(age) = record.age.to_f64() {
            ages.push(age);
        }
    }

    Kpi {
        total_records: records.len(),
        high_income_rate: high as f64 / records.len() as f64,
        median_age: median(ages),
    }
}

/// Looks up an aggregate by key, as a hover handler does.
pub fn find_by_key<'a, T: Keyed>(items: &'a [T], key: &str) -> Option<&'a T> {
    items.iter().find(|item| item.key() == key)
}
