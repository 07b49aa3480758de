#![forbid(unsafe_code)]

//! Property tests for the census aggregation pipeline.
//!
//! Records are drawn from small category pools (including the unknown
//! sentinel and non-numeric cells) so groups collide often.

use std::io::Write;

use proptest::prelude::*;
use proptest::sample::select;

use ci_dashboard::{
    ChartId, ChartMarks, Dashboard, DashboardConfig, box_marks, build_bundle, rate_bars,
};
use ci_groupby::{
    SortOrder, count_by_field, exclude_unknown, five_number_by_field, is_high_income,
    rate_by_field, sort_rates, summarize_kpis,
};
use ci_quantile::quantile;
use ci_runtime::{LoadPhase, LoadPolicy};
use ci_scale::{BandScale, LinearScale, RateDomain};
use ci_types::{CategoricalField, Income, Numeric, NumericField, Record, UNKNOWN};

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

const EDUCATION: [&str; 5] = ["HS-grad", "Some-college", "Bachelors", "Masters", UNKNOWN];
const OCCUPATION: [&str; 5] = ["Sales", "Exec-managerial", "Craft-repair", "Tech-support", UNKNOWN];
const SEX: [&str; 3] = ["Male", "Female", UNKNOWN];
const MARITAL: [&str; 4] = ["Never-married", "Married-civ-spouse", "Divorced", UNKNOWN];

fn arb_numeric(range: std::ops::RangeInclusive<i64>) -> impl Strategy<Value = Numeric> {
    prop_oneof![
        4 => range.prop_map(Numeric::Value),
        1 => Just(Numeric::NaN),
    ]
}

fn arb_income() -> impl Strategy<Value = Income> {
    prop_oneof![
        3 => Just(Income::Le50K),
        2 => Just(Income::Gt50K),
        1 => Just(Income::Unknown),
    ]
}

fn arb_record() -> impl Strategy<Value = Record> {
    (
        arb_numeric(17..=90),
        arb_numeric(1..=99),
        arb_income(),
        select(EDUCATION.to_vec()),
        select(OCCUPATION.to_vec()),
        select(SEX.to_vec()),
        select(MARITAL.to_vec()),
    )
        .prop_map(
            |(age, hours_per_week, income, education, occupation, sex, marital_status)| {
                let education_num = match education {
                    "HS-grad" => Numeric::Value(9),
                    "Some-college" => Numeric::Value(10),
                    "Bachelors" => Numeric::Value(13),
                    "Masters" => Numeric::Value(14),
                    _ => Numeric::NaN,
                };
                Record {
                    age,
                    hours_per_week,
                    education_num,
                    capital_gain: Numeric::Value(0),
                    capital_loss: Numeric::Value(0),
                    income,
                    education: education.to_owned(),
                    occupation: occupation.to_owned(),
                    sex: sex.to_owned(),
                    marital_status: marital_status.to_owned(),
                }
            },
        )
}

fn arb_records(max_len: usize) -> impl Strategy<Value = Vec<Record>> {
    proptest::collection::vec(arb_record(), 0..=max_len)
}

fn arb_band_keys() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-z]{1,6}", 0..12).prop_map(|keys| keys.into_iter().collect())
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_counts_partition_the_records(records in arb_records(60)) {
        for field in CategoricalField::ALL {
            let counts = count_by_field(&records, field);
            let total: usize = counts.iter().map(|c| c.count).sum();
            prop_assert_eq!(total, records.len());
            prop_assert!(counts.iter().all(|c| c.count >= 1));
        }
    }

    #[test]
    fn prop_rate_totals_cover_every_kept_record(records in arb_records(60)) {
        let rates = rate_by_field(
            records.iter().filter(exclude_unknown(CategoricalField::Occupation)),
            CategoricalField::Occupation,
            is_high_income,
        );
        let kept = records
            .iter()
            .filter(|r| !r.is_unknown(CategoricalField::Occupation))
            .count();
        prop_assert_eq!(rates.iter().map(|r| r.total).sum::<usize>(), kept);
        prop_assert!(rates.iter().all(|r| r.key != UNKNOWN));

        for rate in &rates {
            prop_assert!(rate.total >= 1);
            prop_assert!(rate.matched <= rate.total);
            prop_assert!((0.0..=1.0).contains(&rate.rate));
        }
    }

    #[test]
    fn prop_five_number_summaries_are_ordered(records in arb_records(60)) {
        for value in [NumericField::Age, NumericField::HoursPerWeek] {
            for summary in five_number_by_field(&records, CategoricalField::Sex, value) {
                prop_assert!(summary.is_ordered(), "{:?}", summary);
            }
        }
    }

    #[test]
    fn prop_summaries_ignore_non_numeric_cells(records in arb_records(60)) {
        let summaries = five_number_by_field(&records, CategoricalField::Sex, NumericField::Age);
        for summary in &summaries {
            let ages: Vec<f64> = records
                .iter()
                .filter(|r| r.sex == summary.key)
                .filter_map(|r| r.age.to_f64())
                .collect();
            prop_assert!(!ages.is_empty());
            prop_assert_eq!(Some(summary.median), quantile(ages, 0.5));
        }
    }

    #[test]
    fn prop_sorted_rates_ignore_input_order(records in arb_records(60)) {
        let mut forward = rate_by_field(&records, CategoricalField::MaritalStatus, is_high_income);
        let mut backward =
            rate_by_field(records.iter().rev(), CategoricalField::MaritalStatus, is_high_income);
        sort_rates(&mut forward, SortOrder::Descending);
        sort_rates(&mut backward, SortOrder::Descending);
        prop_assert_eq!(&forward, &backward);

        for pair in forward.windows(2) {
            prop_assert!(
                pair[0].rate > pair[1].rate
                    || (pair[0].rate == pair[1].rate && pair[0].key < pair[1].key)
            );
        }
    }

    #[test]
    fn prop_kpis_are_bounded(records in arb_records(60)) {
        let kpi = summarize_kpis(&records);
        prop_assert_eq!(kpi.total_records, records.len());
        prop_assert!((0.0..=1.0).contains(&kpi.high_income_rate));
        let any_age = records.iter().any(|r| !r.age.is_nan());
        prop_assert_eq!(kpi.median_age.is_some(), any_age);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_bundle_is_deterministic(records in arb_records(80)) {
        let config = DashboardConfig::default();
        let first = build_bundle(&records, &config);
        let second = build_bundle(&records.clone(), &config);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_every_chart_has_geometry(records in arb_records(80)) {
        let mut dashboard = Dashboard::new(DashboardConfig::default());
        let csv = to_csv(&records);
        prop_assert_eq!(dashboard.load_str(&csv).ok(), Some(LoadPhase::Ready));

        let bundle = dashboard.bundle().cloned();
        prop_assert!(bundle.is_some());
        for chart in ChartId::ALL {
            prop_assert!(dashboard.marks(chart).is_ok(), "{}", chart);
        }
    }

    #[test]
    fn prop_bars_stand_on_the_baseline(records in arb_records(80)) {
        let config = DashboardConfig { rate_domain: RateDomain::Unit, ..DashboardConfig::default() };
        let bundle = build_bundle(&records, &config);
        let bars = rate_bars(&bundle.sex_rates, &config).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(bars.len(), bundle.sex_rates.len());
        for bar in &bars {
            prop_assert!(bar.height >= 0.0);
            prop_assert!(bar.y >= 0.0);
            prop_assert!((bar.y + bar.height - config.height).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_box_marks_keep_quartile_order(records in arb_records(80)) {
        let config = DashboardConfig::default();
        let bundle = build_bundle(&records, &config);
        let boxes = box_marks(&bundle.hours_by_income, &config)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        for mark in &boxes {
            // y grows downward, so larger values sit higher up.
            prop_assert!(mark.min >= mark.q1);
            prop_assert!(mark.q1 >= mark.median);
            prop_assert!(mark.median >= mark.q3);
            prop_assert!(mark.q3 >= mark.max);
            prop_assert!(mark.max >= 0.0 && mark.min <= config.height);
        }
    }
}

// ---------------------------------------------------------------------------
// Scales
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_bands_tile_the_extent(
        keys in arb_band_keys(),
        extent in 1.0_f64..2000.0,
        padding in 0.0_f64..0.95,
    ) {
        let scale = BandScale::new(keys.iter().map(String::as_str), extent, padding)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let mut previous_end = 0.0_f64;
        for key in &keys {
            let Some(band) = scale.band(key) else {
                return Err(TestCaseError::fail(format!("no band for {key}")));
            };
            prop_assert!(band.start >= previous_end - 1e-9);
            prop_assert!(band.end() <= extent + 1e-9);
            prop_assert!((band.width - scale.bandwidth()).abs() < 1e-12);
            previous_end = band.end();
        }
    }

    #[test]
    fn prop_linear_scale_stays_in_range(
        d0 in -1e6_f64..1e6,
        span in 0.0_f64..1e6,
        r0 in -1e3_f64..1e3,
        r1 in -1e3_f64..1e3,
        value in -2e6_f64..2e6,
    ) {
        let scale = LinearScale::new((d0, d0 + span), (r0, r1))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let mapped = scale.map(value);
        prop_assert!(mapped >= r0.min(r1) - 1e-9 && mapped <= r0.max(r1) + 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn numeric_cell(value: Numeric) -> String {
    value.value().map_or_else(|| "n/a".to_owned(), |v| v.to_string())
}

fn category_cell(value: &str) -> &str {
    if value == UNKNOWN { "?" } else { value }
}

fn to_csv(records: &[Record]) -> String {
    let mut out = String::from(
        "age,education,education.num,marital.status,occupation,sex,capital.gain,capital.loss,hours.per.week,income\n",
    );
    for r in records {
        let income = match r.income {
            Income::Unknown => "",
            known => known.label(),
        };
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            numeric_cell(r.age),
            category_cell(&r.education),
            numeric_cell(r.education_num),
            category_cell(&r.marital_status),
            category_cell(&r.occupation),
            category_cell(&r.sex),
            numeric_cell(r.capital_gain),
            numeric_cell(r.capital_loss),
            numeric_cell(r.hours_per_week),
            income,
        ));
    }
    out
}

#[test]
fn csv_round_trip_through_dashboard_matches_in_memory_bundle() {
    let records = vec![
        Record {
            age: Numeric::Value(30),
            hours_per_week: Numeric::Value(40),
            education_num: Numeric::Value(13),
            capital_gain: Numeric::Value(0),
            capital_loss: Numeric::Value(0),
            income: Income::Gt50K,
            education: "Bachelors".to_owned(),
            occupation: "Sales".to_owned(),
            sex: "Female".to_owned(),
            marital_status: "Divorced".to_owned(),
        },
        Record {
            age: Numeric::NaN,
            occupation: UNKNOWN.to_owned(),
            income: Income::Le50K,
            ..Record::default()
        },
    ];

    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(to_csv(&records).as_bytes()).expect("write");

    let config = DashboardConfig::default();
    let mut dashboard = Dashboard::new(config.clone());
    assert_eq!(dashboard.load_path(file.path()).expect("load"), LoadPhase::Ready);

    let snapshot = dashboard.current().expect("snapshot");
    assert_eq!(snapshot.value.records, records);
    assert_eq!(snapshot.value.bundle, build_bundle(&records, &config));
}

#[test]
fn lenient_config_file_skips_ragged_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("dashboard.yaml");
    std::fs::write(&config_path, "load_policy:\n  mode: lenient\n").expect("config");
    let config = DashboardConfig::from_yaml_path(&config_path).expect("parse");
    assert_eq!(config.load_policy, LoadPolicy::lenient());

    let mut csv = to_csv(&[]);
    csv.push_str("39,Bachelors,13\n");
    csv.push_str("50,Masters,14,Divorced,Sales,Female,0,0,45,>50K\n");

    let mut dashboard = Dashboard::new(config);
    assert_eq!(dashboard.load_str(&csv).expect("load"), LoadPhase::Ready);
    let snapshot = dashboard.current().expect("snapshot");
    assert_eq!(snapshot.value.skipped_rows, 1);
    assert_eq!(snapshot.value.bundle.kpi.total_records, 1);

    let mut strict = Dashboard::new(DashboardConfig::default());
    assert_eq!(strict.load_str(&csv).expect("settled"), LoadPhase::Failed);
}

#[test]
fn marks_follow_bundle_order() {
    let records: Vec<Record> = ["Male", "Female", "Male"]
        .into_iter()
        .zip([Income::Gt50K, Income::Gt50K, Income::Le50K])
        .map(|(sex, income)| Record {
            sex: sex.to_owned(),
            income,
            ..Record::default()
        })
        .collect();
    let mut dashboard = Dashboard::new(DashboardConfig::default());
    dashboard.load_str(&to_csv(&records)).expect("load");

    let ChartMarks::Bars(bars) = dashboard.marks(ChartId::SexRate).expect("marks") else {
        panic!("sex chart renders bars");
    };
    let keys: Vec<&str> = bars.iter().map(|b| b.key.as_str()).collect();
    assert_eq!(keys, ["Female", "Male"]);
    assert!(bars[0].x < bars[1].x);
}
