#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel for categorical fields that were empty or marked `?` at the source.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Income {
    #[serde(rename = "<=50K")]
    Le50K,
    #[serde(rename = ">50K")]
    Gt50K,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Income {
    /// Parses the census income label. The test split of the source data
    /// carries a trailing `.` (`>50K.`), which is accepted.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        match trimmed {
            "<=50K" => Self::Le50K,
            ">50K" => Self::Gt50K,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Le50K => "<=50K",
            Self::Gt50K => ">50K",
            Self::Unknown => UNKNOWN,
        }
    }

    #[must_use]
    pub fn is_high(self) -> bool {
        matches!(self, Self::Gt50K)
    }
}

impl fmt::Display for Income {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A numeric cell. Text that does not parse as a number becomes `NaN`
/// instead of a silent zero, so numeric aggregates can exclude it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Numeric {
    Value(i64),
    #[serde(rename = "nan")]
    NaN,
}

impl Numeric {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::Value(value);
        }
        // Integral floats such as "40.0" still count as whole numbers.
        match trimmed.parse::<f64>() {
            Ok(value)
                if value.is_finite()
                    && value.fract() == 0.0
                    && value.abs() < i64::MAX as f64 =>
            {
                Self::Value(value as i64)
            }
            _ => Self::NaN,
        }
    }

    #[must_use]
    pub fn value(self) -> Option<i64> {
        match self {
            Self::Value(v) => Some(v),
            Self::NaN => None,
        }
    }

    #[must_use]
    pub fn to_f64(self) -> Option<f64> {
        self.value().map(|v| v as f64)
    }

    #[must_use]
    pub fn is_nan(self) -> bool {
        matches!(self, Self::NaN)
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Self::Value(value)
    }
}

/// Trims a categorical cell and maps empty or `?` cells to [`UNKNOWN`].
#[must_use]
pub fn normalize_category(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "?" {
        UNKNOWN.to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown categorical field {name:?}")]
    UnknownCategoricalField { name: String },
    #[error("unknown numeric field {name:?}")]
    UnknownNumericField { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    Income,
    Education,
    Occupation,
    Sex,
    MaritalStatus,
}

impl CategoricalField {
    pub const ALL: [Self; 5] = [
        Self::Income,
        Self::Education,
        Self::Occupation,
        Self::Sex,
        Self::MaritalStatus,
    ];

    /// Header name in the census CSV.
    #[must_use]
    pub fn column_name(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Education => "education",
            Self::Occupation => "occupation",
            Self::Sex => "sex",
            Self::MaritalStatus => "marital.status",
        }
    }
}

impl FromStr for CategoricalField {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|field| {
                field.column_name() == wanted || field.column_name().replace('.', "_") == wanted
            })
            .ok_or_else(|| TypeError::UnknownCategoricalField {
                name: wanted.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    Age,
    HoursPerWeek,
    EducationNum,
    CapitalGain,
    CapitalLoss,
}

impl NumericField {
    pub const ALL: [Self; 5] = [
        Self::Age,
        Self::HoursPerWeek,
        Self::EducationNum,
        Self::CapitalGain,
        Self::CapitalLoss,
    ];

    #[must_use]
    pub fn column_name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::HoursPerWeek => "hours.per.week",
            Self::EducationNum => "education.num",
            Self::CapitalGain => "capital.gain",
            Self::CapitalLoss => "capital.loss",
        }
    }
}

impl FromStr for NumericField {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|field| {
                field.column_name() == wanted || field.column_name().replace('.', "_") == wanted
            })
            .ok_or_else(|| TypeError::UnknownNumericField {
                name: wanted.to_owned(),
            })
    }
}

/// One census respondent. Built once by the loader and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub age: Numeric,
    pub hours_per_week: Numeric,
    pub education_num: Numeric,
    pub capital_gain: Numeric,
    pub capital_loss: Numeric,
    pub income: Income,
    pub education: String,
    pub occupation: String,
    pub sex: String,
    pub marital_status: String,
}

impl Record {
    #[must_use]
    pub fn category(&self, field: CategoricalField) -> &str {
        match field {
            CategoricalField::Income => self.income.label(),
            CategoricalField::Education => &self.education,
            CategoricalField::Occupation => &self.occupation,
            CategoricalField::Sex => &self.sex,
            CategoricalField::MaritalStatus => &self.marital_status,
        }
    }

    #[must_use]
    pub fn numeric(&self, field: NumericField) -> Numeric {
        match field {
            NumericField::Age => self.age,
            NumericField::HoursPerWeek => self.hours_per_week,
            NumericField::EducationNum => self.education_num,
            NumericField::CapitalGain => self.capital_gain,
            NumericField::CapitalLoss => self.capital_loss,
        }
    }

    #[must_use]
    pub fn is_unknown(&self, field: CategoricalField) -> bool {
        self.category(field) == UNKNOWN
    }
}

impl Default for Record {
    fn default() -> Self {
        Self {
            age: Numeric::NaN,
            hours_per_week: Numeric::NaN,
            education_num: Numeric::NaN,
            capital_gain: Numeric::NaN,
            capital_loss: Numeric::NaN,
            income: Income::Unknown,
            education: UNKNOWN.to_owned(),
            occupation: UNKNOWN.to_owned(),
            sex: UNKNOWN.to_owned(),
            marital_status: UNKNOWN.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAggregate {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateAggregate {
    pub key: String,
    pub rate: f64,
    pub total: usize,
    pub matched: usize,
}

impl RateAggregate {
    /// Returns `None` for an empty group; rates are only defined for `total >= 1`.
    #[must_use]
    pub fn new(key: impl Into<String>, matched: usize, total: usize) -> Option<Self> {
        if total == 0 {
            return None;
        }
        Some(Self {
            key: key.into(),
            rate: matched as f64 / total as f64,
            total,
            matched,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiveNumberSummary {
    pub key: String,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl FiveNumberSummary {
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.min <= self.q1 && self.q1 <= self.median && self.median <= self.q3 && self.q3 <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub total_records: usize,
    pub high_income_rate: f64,
    pub median_age: Option<f64>,
}

impl Kpi {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            total_records: 0,
            high_income_rate: 0.0,
            median_age: None,
        }
    }
}
