#![forbid(unsafe_code)]

use std::path::PathBuf;

use ci_dashboard::{ChartData, ChartId, Dashboard, DashboardConfig, init_tracing};
use ci_runtime::{IssueKind, LoadPhase, LoadPolicy};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut input: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut format = OutputFormat::Json;
    let mut chart: Option<ChartId> = None;
    let mut marks = false;
    let mut question: Option<String> = None;
    let mut lenient = false;
    let mut show_issues = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => {
                let value = args.next().ok_or("--input requires a csv path")?;
                input = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = args.next().ok_or("--config requires a yaml path")?;
                config_path = Some(PathBuf::from(value));
            }
            "--format" => {
                let value = args.next().ok_or("--format requires json or csv")?;
                format = match value.as_str() {
                    "json" => OutputFormat::Json,
                    "csv" => OutputFormat::Csv,
                    _ => return Err(format!("unsupported format: {value}").into()),
                };
            }
            "--chart" => {
                let value = args.next().ok_or("--chart requires a chart id")?;
                chart = Some(value.parse()?);
            }
            "--marks" => {
                marks = true;
            }
            "--ask" => {
                let value = args.next().ok_or("--ask requires a question")?;
                question = Some(value);
            }
            "--lenient" => {
                lenient = true;
            }
            "--issues" => {
                show_issues = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    init_tracing();

    let mut config = match &config_path {
        Some(path) => DashboardConfig::from_yaml_path(path)?,
        None => DashboardConfig::default(),
    };
    if lenient {
        config.load_policy = LoadPolicy::lenient();
    }
    let mut dashboard = Dashboard::new(config);

    if let Some(question) = &question {
        let reply = dashboard.ask(question);
        println!("{}", reply.text);
        if input.is_none() {
            return Ok(());
        }
    }

    let input = input.ok_or("--input is required (see --help)")?;
    if dashboard.load_path(&input)? != LoadPhase::Ready {
        let message = dashboard.failure_message().unwrap_or("unknown failure");
        return Err(format!("failed to load {}: {message}", input.display()).into());
    }
    let snapshot = dashboard.current().ok_or("dataset missing after load")?;

    if show_issues {
        let ledger = &snapshot.value.ledger;
        eprintln!(
            "records={} skipped_rows={} non_numeric={} unknown_category={} unknown_income={} malformed_rows={}",
            snapshot.value.records.len(),
            snapshot.value.skipped_rows,
            ledger.count(IssueKind::NonNumericValue),
            ledger.count(IssueKind::UnknownCategory),
            ledger.count(IssueKind::UnknownIncome),
            ledger.count(IssueKind::MalformedRow),
        );
    }

    let bundle = &snapshot.value.bundle;
    match (format, chart) {
        (OutputFormat::Json, None) => {
            println!("{}", serde_json::to_string_pretty(bundle)?);
        }
        (OutputFormat::Json, Some(chart)) if marks => {
            println!("{}", serde_json::to_string_pretty(&dashboard.marks(chart)?)?);
        }
        (OutputFormat::Json, Some(chart)) => match bundle.chart(chart) {
            ChartData::Counts(rows) => println!("{}", serde_json::to_string_pretty(rows)?),
            ChartData::Rates(rows) => println!("{}", serde_json::to_string_pretty(rows)?),
            ChartData::Distributions(rows) => {
                println!("{}", serde_json::to_string_pretty(rows)?);
            }
        },
        (OutputFormat::Csv, Some(chart)) => {
            print!("{}", bundle.chart_csv(chart)?);
        }
        (OutputFormat::Csv, None) => {
            return Err("--format csv needs --chart <id>".into());
        }
    }

    Ok(())
}

fn print_help() {
    let charts: Vec<&str> = ChartId::ALL.iter().map(|chart| chart.name()).collect();
    println!(
        "census-dashboard\n\
         Usage:\n\
         \tcensus-dashboard --input adult.csv [--config dashboard.yaml] [--format json|csv] [--chart <id>]\n\
         Options:\n\
         \t--input <path>     Census csv to load\n\
         \t--config <path>    YAML dashboard config (plot size, domains, load policy)\n\
         \t--format <fmt>     json (default) or csv; csv needs --chart\n\
         \t--chart <id>       Print one chart: {}\n\
         \t--marks            With --chart, print plot geometry instead of aggregates\n\
         \t--ask <question>   Answer a question about the dashboard\n\
         \t--lenient          Skip malformed rows instead of failing the load\n\
         \t--issues           Print data-quality counts to stderr\n\
         \t-h, --help         Show this help\n\
         Environment:\n\
         \tCENSUS_LOG         tracing filter, e.g. ci_io=debug",
        charts.join(", ")
    );
}
