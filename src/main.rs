//! pvforecast - command line interface to the PV_Forecast API.

use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, ValueEnum};
use log::info;
use polars::prelude::*;

use pvforecast::api::entities::EntityLists;
use pvforecast::api::forecast::{Forecasts, PvForecast};
use pvforecast::api::{EntitySelector, EntityType};
use pvforecast::credentials::default_sources;
use pvforecast::{resolve_credentials, CredentialSource, Proxies, PvForecastApi};

const CLI_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EntityTypeArg {
    Gsp,
    Pes,
    National,
}

impl From<EntityTypeArg> for EntityType {
    fn from(arg: EntityTypeArg) -> Self {
        match arg {
            EntityTypeArg::Gsp => EntityType::Gsp,
            EntityTypeArg::Pes => EntityType::Pes,
            EntityTypeArg::National => EntityType::National,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "pvforecast",
    version,
    about = "Command line interface to the PV_Forecast API",
    after_help = "Credentials not given as flags are read from PVFORECAST_USER_ID / PVFORECAST_API_KEY, \
                  then from a .pvforecast_credentials file in the working or home directory."
)]
struct Cli {
    /// PV_Forecast user ID
    #[arg(long = "user_id", value_name = "USER_ID")]
    user_id: Option<String>,

    /// PV_Forecast API key
    #[arg(long = "api_key", value_name = "API_KEY")]
    api_key: Option<String>,

    /// UTC start, "yyyy-mm-dd HH:MM:SS" (inclusive). Default is to fetch the latest forecast
    #[arg(short = 's', long, value_name = "DATETIME")]
    start: Option<String>,

    /// UTC end, "yyyy-mm-dd HH:MM:SS" (inclusive). Default is to fetch the latest forecast
    #[arg(short = 'e', long, value_name = "DATETIME")]
    end: Option<String>,

    #[arg(long = "entity_type", value_enum, default_value_t = EntityTypeArg::Gsp)]
    entity_type: EntityTypeArg,

    /// Entity ID, 0 is national
    #[arg(long = "entity_id", default_value_t = 0)]
    entity_id: i64,

    /// Comma-separated extra fields, e.g. installedcapacity_mwp,ucl_mw
    #[arg(long = "extra_fields", value_delimiter = ',')]
    extra_fields: Vec<String>,

    /// Only fetch forecasts issued at these times of day, e.g. 07:00,10:00
    #[arg(long = "forecast_base_times", value_delimiter = ',', value_name = "HH:MM")]
    forecast_base_times: Vec<String>,

    /// Print nothing to stdout or stderr
    #[arg(short = 'q', long)]
    quiet: bool,

    /// CSV file to write results to
    #[arg(short = 'o', long, value_name = "PATH")]
    outfile: Option<PathBuf>,

    /// HTTP proxy address
    #[arg(long = "http-proxy", alias = "http", value_name = "ADDRESS")]
    http: Option<String>,

    /// HTTPS proxy address
    #[arg(long = "https-proxy", alias = "https", value_name = "ADDRESS")]
    https: Option<String>,

    /// Retries after a non-2xx response
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

/// `-http` and `-https` are accepted as single-dash long flags.
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    const SINGLE_DASH: [&str; 4] = ["-http", "-https", "-http-proxy", "-https-proxy"];
    args.into_iter()
        .map(|arg| {
            let name = arg.split('=').next().unwrap_or_default();
            if SINGLE_DASH.contains(&name) {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

fn parse_cli_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s.trim(), CLI_DATETIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| {
            format!(
                "Failed to parse datetime '{}', make sure you use 'yyyy-mm-dd HH:MM:SS' format",
                s
            )
        })
}

fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 1, 1, 0, 30, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Asks before clobbering an existing file. Returns false when the user aborts.
fn confirm_overwrite(path: &Path) -> anyhow::Result<bool> {
    eprint!(
        "The output file '{}' already exists and will be overwritten, are you sure you want to continue? \
         Press enter to continue or ctrl+c to abort.",
        path.display()
    );
    io::stderr().flush()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    Ok(read > 0)
}

fn write_csv(forecasts: &Forecasts, path: &Path) -> anyhow::Result<()> {
    let mut df = forecasts.as_polars_df()?;
    let mut file =
        File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_float_precision(Some(3))
        .finish(&mut df)
        .with_context(|| format!("Failed to write CSV to '{}'", path.display()))?;
    Ok(())
}

fn run(cli: Cli, credential_sources: &[CredentialSource]) -> anyhow::Result<()> {
    let start = cli.start.as_deref().map(parse_cli_datetime).transpose()?;
    let end = cli.end.as_deref().map(parse_cli_datetime).transpose()?;

    if let Some(outfile) = &cli.outfile {
        if outfile.exists() && !cli.quiet && !confirm_overwrite(outfile)? {
            eprintln!();
            eprintln!("Aborting...");
            return Ok(());
        }
    }

    let api = PvForecastApi::new(resolve_credentials(credential_sources)?)
        .with_proxies(Proxies {
            http: cli.http.clone(),
            https: cli.https.clone(),
        })
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_retries(cli.retries);

    let selector = EntitySelector::new(cli.entity_type.into(), cli.entity_id);
    if !selector.is_national() {
        let ids = EntityLists::new(&api).entity_ids(selector.entity_type())?;
        selector.validate(&ids)?;
    }

    let pvforecast = PvForecast::new(&api);
    let forecasts = if start.is_none() && end.is_none() {
        if !cli.forecast_base_times.is_empty() {
            bail!("--forecast_base_times needs --start and/or --end");
        }
        pvforecast.latest(&selector, &cli.extra_fields)?
    } else {
        let start = start.unwrap_or_else(default_start);
        let end = end.unwrap_or_else(Utc::now);
        pvforecast.get_forecasts(
            start,
            end,
            cli.forecast_base_times.as_slice(),
            &selector,
            &cli.extra_fields,
        )?
    };
    info!("fetched {} records", forecasts.len());

    if let Some(outfile) = &cli.outfile {
        write_csv(&forecasts, outfile)?;
    }
    if !cli.quiet {
        println!("{}", forecasts.as_polars_df()?);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse_from(normalize_args(std::env::args()));
    let quiet = cli.quiet;
    let sources = default_sources(cli.user_id.clone(), cli.api_key.clone());

    match run(cli, &sources) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !quiet {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}
