#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use ci_runtime::{DecisionAction, IssueKind, LoadPolicy, QualityLedger};
use ci_types::{
    CategoricalField, Income, Numeric, NumericField, Record, UNKNOWN, normalize_category,
};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("csv header is missing required column {name:?}")]
    MissingColumn { name: &'static str },
    #[error("malformed row at line {line:?}: {detail}")]
    MalformedRow { line: Option<u64>, detail: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Columns the loader needs. Anything else in the header is ignored.
pub const REQUIRED_COLUMNS: [&str; 10] = [
    "age",
    "hours.per.week",
    "education.num",
    "capital.gain",
    "capital.loss",
    "income",
    "education",
    "occupation",
    "sex",
    "marital.status",
];

/// The immutable record set of one load together with what the loader
/// noticed while building it.
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<Record>,
    pub ledger: QualityLedger,
    pub skipped_rows: usize,
}

pub fn read_census_csv_str(input: &str, policy: &LoadPolicy) -> Result<LoadedRecords, LoadError> {
    read_census_csv(input.as_bytes(), policy)
}

pub fn read_census_csv_path(
    path: impl AsRef<Path>,
    policy: &LoadPolicy,
) -> Result<LoadedRecords, LoadError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "opening census csv");
    read_census_csv(File::open(path)?, policy)
}

pub fn read_census_csv<R: Read>(input: R, policy: &LoadPolicy) -> Result<LoadedRecords, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input);

    let headers = reader.headers().cloned()?;
    if headers.is_empty() {
        return Err(LoadError::MissingHeaders);
    }
    let layout = ColumnLayout::resolve(&headers)?;
    let header_count = headers.len();

    let mut out = LoadedRecords::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) if row.len() == header_count => row,
            Ok(row) => {
                let line = row.position().map(csv::Position::line);
                let detail = format!("expected {header_count} fields, found {}", row.len());
                reject_or_skip(policy, line, detail, &mut out)?;
                continue;
            }
            Err(err) => {
                let line = err.position().map(csv::Position::line);
                reject_or_skip(policy, line, err.to_string(), &mut out)?;
                continue;
            }
        };
        let line = row.position().map(csv::Position::line);
        let record = layout.build(&row, line, policy, &mut out.ledger);
        out.records.push(record);
    }

    info!(
        rows = out.records.len(),
        skipped = out.skipped_rows,
        issues = out.ledger.total(),
        "census csv loaded"
    );
    Ok(out)
}

fn reject_or_skip(
    policy: &LoadPolicy,
    line: Option<u64>,
    detail: String,
    out: &mut LoadedRecords,
) -> Result<(), LoadError> {
    match policy.decide_malformed_row(line, detail.clone(), &mut out.ledger) {
        DecisionAction::Reject => Err(LoadError::MalformedRow { line, detail }),
        DecisionAction::Skip | DecisionAction::Exclude => {
            out.skipped_rows += 1;
            Ok(())
        }
    }
}

/// Header positions of the required columns.
struct ColumnLayout {
    numeric: [(NumericField, usize); 5],
    categorical: [(CategoricalField, usize); 5],
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord) -> Result<Self, LoadError> {
        let position = |name: &'static str| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or(LoadError::MissingColumn { name })
        };
        for name in REQUIRED_COLUMNS {
            position(name)?;
        }

        let mut numeric = NumericField::ALL.map(|field| (field, 0));
        for (field, pos) in &mut numeric {
            *pos = position(field.column_name())?;
        }
        let mut categorical = CategoricalField::ALL.map(|field| (field, 0));
        for (field, pos) in &mut categorical {
            *pos = position(field.column_name())?;
        }
        Ok(Self {
            numeric,
            categorical,
        })
    }

    fn build(
        &self,
        row: &StringRecord,
        line: Option<u64>,
        policy: &LoadPolicy,
        ledger: &mut QualityLedger,
    ) -> Record {
        let mut record = Record::default();

        for (field, pos) in self.numeric {
            let raw = row.get(pos).unwrap_or_default();
            let value = Numeric::parse(raw);
            if value.is_nan() {
                policy.note_excluded_cell(
                    IssueKind::NonNumericValue,
                    field.column_name(),
                    raw,
                    line,
                    ledger,
                );
            }
            match field {
                NumericField::Age => record.age = value,
                NumericField::HoursPerWeek => record.hours_per_week = value,
                NumericField::EducationNum => record.education_num = value,
                NumericField::CapitalGain => record.capital_gain = value,
                NumericField::CapitalLoss => record.capital_loss = value,
            }
        }

        for (field, pos) in self.categorical {
            let raw = row.get(pos).unwrap_or_default();
            if field == CategoricalField::Income {
                record.income = Income::parse(raw);
                if record.income == Income::Unknown {
                    policy.note_excluded_cell(IssueKind::UnknownIncome, "income", raw, line, ledger);
                }
                continue;
            }

            let value = normalize_category(raw);
            if value == UNKNOWN {
                policy.note_excluded_cell(
                    IssueKind::UnknownCategory,
                    field.column_name(),
                    raw,
                    line,
                    ledger,
                );
            }
            match field {
                CategoricalField::Education => record.education = value,
                CategoricalField::Occupation => record.occupation = value,
                CategoricalField::Sex => record.sex = value,
                CategoricalField::MaritalStatus => record.marital_status = value,
                CategoricalField::Income => {}
            }
        }

        record
    }
}

/// Serializes aggregate rows (or any flat serde struct) as CSV with a header.
pub fn write_csv_string<T: Serialize>(rows: &[T]) -> Result<String, LoadError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}
