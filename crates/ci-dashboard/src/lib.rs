#![forbid(unsafe_code)]

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Once;

use ci_assist::{Reply, RuleTable};
use ci_groupby::{
    SortOrder, count_by_field, education_levels, exclude_unknown, find_by_key,
    five_number_by_field, is_high_income, rate_by_field, sort_by_level,
    sort_counts, sort_rates, summarize_kpis,
};
use ci_io::{LoadError, LoadedRecords, read_census_csv_path, read_census_csv_str, write_csv_string};
use ci_runtime::{DatasetLifecycle, LoadPhase, LoadPolicy, QualityLedger, RuntimeError, Snapshot};
use ci_scale::{BandScale, LinearScale, QuantityDomain, RateDomain, ScaleError, count_domain};
use ci_types::{
    CategoricalField, CountAggregate, FiveNumberSummary, Income, Kpi, NumericField, RateAggregate,
    Record,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid dashboard config: {detail}")]
    Invalid { detail: String },
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Scale(#[from] ScaleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unknown chart {name:?}")]
    UnknownChart { name: String },
    #[error("no dataset is loaded")]
    NotReady,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Plot area width in renderer units.
    pub width: f64,
    pub height: f64,
    pub band_padding: f64,
    pub rate_domain: RateDomain,
    /// Written as `observed` or as a `fixed: {min, max}` map.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub quantity_domain: QuantityDomain,
    pub exclude_unknown_occupation: bool,
    pub load_policy: LoadPolicy,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            width: 640.0,
            height: 360.0,
            band_padding: 0.2,
            rate_domain: RateDomain::ObservedMax,
            quantity_domain: QuantityDomain::Observed,
            exclude_unknown_occupation: true,
            load_policy: LoadPolicy::strict(),
        }
    }
}

impl DashboardConfig {
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.width.is_finite() && self.width > 0.0)
            || !(self.height.is_finite() && self.height > 0.0)
        {
            return Err(ConfigError::Invalid {
                detail: format!("plot size must be positive, got {}x{}", self.width, self.height),
            });
        }
        if !(0.0..1.0).contains(&self.band_padding) {
            return Err(ConfigError::Invalid {
                detail: format!("band_padding must be in [0, 1), got {}", self.band_padding),
            });
        }
        if let QuantityDomain::Fixed { min, max } = self.quantity_domain
            && !(min.is_finite() && max.is_finite() && min <= max)
        {
            return Err(ConfigError::Invalid {
                detail: format!("fixed quantity domain must satisfy min <= max, got [{min}, {max}]"),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Charts and the aggregate bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartId {
    IncomeSplit,
    EducationRate,
    OccupationRate,
    MaritalRate,
    SexRate,
    AgeByIncome,
    HoursByIncome,
}

impl ChartId {
    pub const ALL: [Self; 7] = [
        Self::IncomeSplit,
        Self::EducationRate,
        Self::OccupationRate,
        Self::MaritalRate,
        Self::SexRate,
        Self::AgeByIncome,
        Self::HoursByIncome,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::IncomeSplit => "income_split",
            Self::EducationRate => "education_rate",
            Self::OccupationRate => "occupation_rate",
            Self::MaritalRate => "marital_rate",
            Self::SexRate => "sex_rate",
            Self::AgeByIncome => "age_by_income",
            Self::HoursByIncome => "hours_by_income",
        }
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChartId {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|chart| chart.name() == wanted)
            .ok_or_else(|| DashboardError::UnknownChart { name: s.to_owned() })
    }
}

/// Everything the renderer needs for one loaded dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardBundle {
    pub kpi: Kpi,
    pub income_split: Vec<CountAggregate>,
    pub education_rates: Vec<RateAggregate>,
    pub occupation_rates: Vec<RateAggregate>,
    pub marital_rates: Vec<RateAggregate>,
    pub sex_rates: Vec<RateAggregate>,
    pub age_by_income: Vec<FiveNumberSummary>,
    pub hours_by_income: Vec<FiveNumberSummary>,
}

/// Aggregates of a single chart, borrowed from a bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChartData<'a> {
    Counts(&'a [CountAggregate]),
    Rates(&'a [RateAggregate]),
    Distributions(&'a [FiveNumberSummary]),
}

impl DashboardBundle {
    #[must_use]
    pub fn chart(&self, chart: ChartId) -> ChartData<'_> {
        match chart {
            ChartId::IncomeSplit => ChartData::Counts(&self.income_split),
            ChartId::EducationRate => ChartData::Rates(&self.education_rates),
            ChartId::OccupationRate => ChartData::Rates(&self.occupation_rates),
            ChartId::MaritalRate => ChartData::Rates(&self.marital_rates),
            ChartId::SexRate => ChartData::Rates(&self.sex_rates),
            ChartId::AgeByIncome => ChartData::Distributions(&self.age_by_income),
            ChartId::HoursByIncome => ChartData::Distributions(&self.hours_by_income),
        }
    }

    pub fn chart_csv(&self, chart: ChartId) -> Result<String, DashboardError> {
        let out = match self.chart(chart) {
            ChartData::Counts(rows) => write_csv_string(rows)?,
            ChartData::Rates(rows) => write_csv_string(rows)?,
            ChartData::Distributions(rows) => write_csv_string(rows)?,
        };
        Ok(out)
    }
}

fn income_split(records: &[Record]) -> Vec<CountAggregate> {
    let mut counts = count_by_field(records, CategoricalField::Income);
    sort_counts(&mut counts, SortOrder::Descending);
    counts
}

fn education_rates(records: &[Record]) -> Vec<RateAggregate> {
    let levels = education_levels(records);
    let mut rates = rate_by_field(records, CategoricalField::Education, is_high_income);
    sort_by_level(&mut rates, &levels);
    rates
}

fn occupation_rates(records: &[Record], exclude_unknown_occupation: bool) -> Vec<RateAggregate> {
    let mut rates = if exclude_unknown_occupation {
        rate_by_field(
            records
                .iter()
                .filter(exclude_unknown(CategoricalField::Occupation)),
            CategoricalField::Occupation,
            is_high_income,
        )
    } else {
        rate_by_field(records, CategoricalField::Occupation, is_high_income)
    };
    sort_rates(&mut rates, SortOrder::Descending);
    rates
}

fn ranked_rates(records: &[Record], field: CategoricalField) -> Vec<RateAggregate> {
    let mut rates = rate_by_field(records, field, is_high_income);
    sort_rates(&mut rates, SortOrder::Descending);
    rates
}

/// Distribution of `value` per known income class, ordered by class label.
fn by_income(records: &[Record], value: NumericField) -> Vec<FiveNumberSummary> {
    let mut summaries = five_number_by_field(
        records.iter().filter(|r| r.income != Income::Unknown),
        CategoricalField::Income,
        value,
    );
    summaries.sort_by(|a, b| a.key.cmp(&b.key));
    summaries
}

/// Computes every chart's aggregates from one immutable record set.
///
/// Charts are independent, so they are computed concurrently; the result
/// is identical to a sequential run.
#[must_use]
pub fn build_bundle(records: &[Record], config: &DashboardConfig) -> DashboardBundle {
    let ((kpi, income_split), ((education_rates, occupation_rates), (rest, distributions))) =
        rayon::join(
            || rayon::join(|| summarize_kpis(records), || income_split(records)),
            || {
                rayon::join(
                    || {
                        rayon::join(
                            || education_rates(records),
                            || occupation_rates(records, config.exclude_unknown_occupation),
                        )
                    },
                    || {
                        rayon::join(
                            || {
                                (
                                    ranked_rates(records, CategoricalField::MaritalStatus),
                                    ranked_rates(records, CategoricalField::Sex),
                                )
                            },
                            || {
                                (
                                    by_income(records, NumericField::Age),
                                    by_income(records, NumericField::HoursPerWeek),
                                )
                            },
                        )
                    },
                )
            },
        );
    let (marital_rates, sex_rates) = rest;
    let (age_by_income, hours_by_income) = distributions;

    debug!(
        records = records.len(),
        education = education_rates.len(),
        occupations = occupation_rates.len(),
        "dashboard bundle built"
    );

    DashboardBundle {
        kpi,
        income_split,
        education_rates,
        occupation_rates,
        marital_rates,
        sex_rates,
        age_by_income,
        hours_by_income,
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A vertical bar in plot coordinates; `y` grows downward from the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarMark {
    pub key: String,
    pub x: f64,
    pub width: f64,
    pub y: f64,
    pub height: f64,
    pub value: f64,
}

/// A box-and-whisker glyph; the five fields are y coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxMark {
    pub key: String,
    pub x: f64,
    pub width: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "marks", rename_all = "snake_case")]
pub enum ChartMarks {
    Bars(Vec<BarMark>),
    Boxes(Vec<BoxMark>),
}

fn bars<'a>(
    items: impl Iterator<Item = (&'a str, f64)> + Clone,
    domain: (f64, f64),
    config: &DashboardConfig,
) -> Result<Vec<BarMark>, ScaleError> {
    let x = BandScale::new(items.clone().map(|(key, _)| key), config.width, config.band_padding)?;
    let y = LinearScale::new(domain, (config.height, 0.0))?;
    let baseline = y.map(domain.0);

    Ok(items
        .filter_map(|(key, value)| {
            let band = x.band(key)?;
            let top = y.map(value);
            Some(BarMark {
                key: key.to_owned(),
                x: band.start,
                width: band.width,
                y: top,
                height: baseline - top,
                value,
            })
        })
        .collect())
}

pub fn rate_bars(rates: &[RateAggregate], config: &DashboardConfig) -> Result<Vec<BarMark>, ScaleError> {
    bars(
        rates.iter().map(|r| (r.key.as_str(), r.rate)),
        config.rate_domain.resolve(rates),
        config,
    )
}

pub fn count_bars(counts: &[CountAggregate], config: &DashboardConfig) -> Result<Vec<BarMark>, ScaleError> {
    bars(
        counts.iter().map(|c| (c.key.as_str(), c.count as f64)),
        count_domain(counts),
        config,
    )
}

pub fn box_marks(
    summaries: &[FiveNumberSummary],
    config: &DashboardConfig,
) -> Result<Vec<BoxMark>, ScaleError> {
    let x = BandScale::new(
        summaries.iter().map(|s| s.key.as_str()),
        config.width,
        config.band_padding,
    )?;
    let y = LinearScale::new(config.quantity_domain.resolve(summaries), (config.height, 0.0))?;

    Ok(summaries
        .iter()
        .filter_map(|s| {
            let band = x.band(&s.key)?;
            Some(BoxMark {
                key: s.key.clone(),
                x: band.start,
                width: band.width,
                min: y.map(s.min),
                q1: y.map(s.q1),
                median: y.map(s.median),
                q3: y.map(s.q3),
                max: y.map(s.max),
            })
        })
        .collect())
}

pub fn chart_marks(
    bundle: &DashboardBundle,
    chart: ChartId,
    config: &DashboardConfig,
) -> Result<ChartMarks, ScaleError> {
    Ok(match bundle.chart(chart) {
        ChartData::Counts(counts) => ChartMarks::Bars(count_bars(counts, config)?),
        ChartData::Rates(rates) => ChartMarks::Bars(rate_bars(rates, config)?),
        ChartData::Distributions(summaries) => ChartMarks::Boxes(box_marks(summaries, config)?),
    })
}

// ---------------------------------------------------------------------------
// Interaction
// ---------------------------------------------------------------------------

/// Hover state owned by the renderer and handed to lookups explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionState {
    pub hovered: Option<(ChartId, String)>,
}

impl InteractionState {
    pub fn hover(&mut self, chart: ChartId, key: impl Into<String>) {
        self.hovered = Some((chart, key.into()));
    }

    pub fn clear(&mut self) {
        self.hovered = None;
    }
}

/// Tooltip text for the hovered mark, read from already computed aggregates.
#[must_use]
pub fn tooltip(bundle: &DashboardBundle, state: &InteractionState) -> Option<String> {
    let (chart, key) = state.hovered.as_ref()?;
    match bundle.chart(*chart) {
        ChartData::Counts(counts) => {
            let c = find_by_key(counts, key)?;
            Some(format!("{}: {} people", c.key, c.count))
        }
        ChartData::Rates(rates) => {
            let r = find_by_key(rates, key)?;
            Some(format!(
                "{}: {:.1}% earn >50K ({} of {})",
                r.key,
                r.rate * 100.0,
                r.matched,
                r.total
            ))
        }
        ChartData::Distributions(summaries) => {
            let s = find_by_key(summaries, key)?;
            Some(format!(
                "{}: min {} | Q1 {} | median {} | Q3 {} | max {}",
                s.key, s.min, s.q1, s.median, s.q3, s.max
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A loaded record set with everything derived from it.
#[derive(Debug)]
pub struct LoadedDataset {
    pub records: Vec<Record>,
    pub ledger: QualityLedger,
    pub skipped_rows: usize,
    pub bundle: DashboardBundle,
}

impl LoadedDataset {
    #[must_use]
    pub fn from_records(loaded: LoadedRecords, config: &DashboardConfig) -> Self {
        let bundle = build_bundle(&loaded.records, config);
        Self {
            records: loaded.records,
            ledger: loaded.ledger,
            skipped_rows: loaded.skipped_rows,
            bundle,
        }
    }
}

/// Owns the dataset lifecycle. The bundle is built once per successful
/// load, before the new snapshot replaces the old one.
#[derive(Debug)]
pub struct Dashboard {
    config: DashboardConfig,
    lifecycle: DatasetLifecycle<LoadedDataset>,
    assistant: RuleTable,
}

impl Dashboard {
    #[must_use]
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            config,
            lifecycle: DatasetLifecycle::new(),
            assistant: RuleTable::census_default(),
        }
    }

    #[must_use]
    pub fn with_assistant(mut self, assistant: RuleTable) -> Self {
        self.assistant = assistant;
        self
    }

    #[must_use]
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    #[must_use]
    pub fn phase(&self) -> LoadPhase {
        self.lifecycle.phase()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Snapshot<LoadedDataset>> {
        self.lifecycle.current()
    }

    #[must_use]
    pub fn bundle(&self) -> Option<&DashboardBundle> {
        self.current().map(|snapshot| &snapshot.value.bundle)
    }

    /// The message to show for the most recent failed load.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.lifecycle
            .last_failure()
            .map(|failure| failure.message.as_str())
    }

    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<LoadPhase, DashboardError> {
        let path = path.as_ref();
        let config = &self.config;
        let phase = self.lifecycle.load_with(|| {
            read_census_csv_path(path, &config.load_policy)
                .map(|loaded| LoadedDataset::from_records(loaded, config))
        })?;
        self.log_outcome(phase);
        Ok(phase)
    }

    pub fn load_str(&mut self, input: &str) -> Result<LoadPhase, DashboardError> {
        let config = &self.config;
        let phase = self.lifecycle.load_with(|| {
            read_census_csv_str(input, &config.load_policy)
                .map(|loaded| LoadedDataset::from_records(loaded, config))
        })?;
        self.log_outcome(phase);
        Ok(phase)
    }

    fn log_outcome(&self, phase: LoadPhase) {
        if let Some(snapshot) = self.current() {
            info!(
                ?phase,
                generation = snapshot.generation,
                records = snapshot.value.records.len(),
                "dashboard dataset settled"
            );
        } else {
            info!(?phase, "dashboard has no dataset");
        }
    }

    pub fn marks(&self, chart: ChartId) -> Result<ChartMarks, DashboardError> {
        let bundle = self.bundle().ok_or(DashboardError::NotReady)?;
        Ok(chart_marks(bundle, chart, &self.config)?)
    }

    #[must_use]
    pub fn tooltip(&self, state: &InteractionState) -> Option<String> {
        tooltip(self.bundle()?, state)
    }

    #[must_use]
    pub fn ask(&self, question: &str) -> Reply<'_> {
        self.assistant.respond(question)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

static INIT: Once = Once::new();

/// Installs the global tracing subscriber once.
///
/// Reads `CENSUS_LOG` for filter directives, e.g.
/// `CENSUS_LOG=ci_io=debug,ci_dashboard=info`; defaults to `info` for the
/// workspace crates.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("CENSUS_LOG").unwrap_or_else(|_| {
            EnvFilter::new("ci_io=info,ci_runtime=info,ci_dashboard=info")
        });

        tracing_subscriber::registry()
            .with(
                tracing_fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    });
}
