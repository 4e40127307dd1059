use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Timelike, Utc};
use log::{debug, info};
use polars::prelude::*;
use polars::{frame::DataFrame, series::Series};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PvForecastError, Result};
use crate::ApiClient;

use super::request::ApiRequest;
use super::value::series_from_values;
use super::{parse_api_datetime, DateRange, EntitySelector, FieldValue, ForecastType};

/// Largest interval, in days, requested from `forecast_bases_list` in one call.
pub const DEFAULT_MAX_SPAN_DAYS: i64 = 7;

const LEADING_COLUMNS: [&str; 3] = ["forecast_base_gmt", "datetime_gmt", "generation_mw"];

pub struct PvForecast<'a> {
    client: &'a dyn ApiClient,
    max_span: Duration,
}

/// Raw `{"data": [...], "meta": [...]}` payload.
#[derive(Deserialize, Debug)]
pub(crate) struct TabularResponse {
    data: Option<Vec<Vec<Value>>>,
    meta: Option<Vec<String>>,
}

impl TabularResponse {
    /// Lowercased column names and rows. Both keys must be present, even if empty.
    pub(crate) fn into_columns_and_rows(self) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        match (self.meta, self.data) {
            (Some(meta), Some(data)) => Ok((meta.iter().map(|m| m.to_lowercase()).collect(), data)),
            (None, _) => Err(PvForecastError::response_format("payload has no 'meta' field")),
            (_, None) => Err(PvForecastError::response_format("payload has no 'data' field")),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ForecastBasesResponse {
    List(Vec<String>),
    Wrapped { data: Vec<BaseEntry> },
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum BaseEntry {
    Plain(String),
    Row(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub entity_id: i64,
    pub forecast_base: DateTime<Utc>,
    pub datetime: DateTime<Utc>,
    pub generation_mw: f64,
    /// In response column order.
    pub extra_fields: Vec<(String, FieldValue)>,
}

impl ForecastRecord {
    pub fn extra(&self, name: &str) -> Option<&FieldValue> {
        self.extra_fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Records of one or more forecast queries sharing a column layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forecasts {
    /// `gsp_id` or `pes_id`
    pub entity_column: String,
    pub extra_columns: Vec<String>,
    pub records: Vec<ForecastRecord>,
}

impl Forecasts {
    pub fn from_json(body: &str) -> Result<Self> {
        let response: TabularResponse =
            serde_json::from_str(body).map_err(|source| PvForecastError::Json { source })?;
        Self::from_response(response)
    }

    pub(crate) fn from_response(response: TabularResponse) -> Result<Self> {
        let (meta, data) = response.into_columns_and_rows()?;
        if meta.is_empty() && data.is_empty() {
            return Ok(Forecasts::default());
        }
        if meta.len() < 4 {
            return Err(PvForecastError::response_format(format!(
                "expected at least 4 columns, got {:?}",
                meta
            )));
        }
        if meta[0] != "gsp_id" && meta[0] != "pes_id" {
            return Err(PvForecastError::response_format(format!(
                "first column should be gsp_id or pes_id, got '{}'",
                meta[0]
            )));
        }
        if meta[1..4] != LEADING_COLUMNS {
            return Err(PvForecastError::response_format(format!(
                "expected columns {:?}, got {:?}",
                LEADING_COLUMNS,
                &meta[1..4]
            )));
        }

        let extra_columns = meta[4..].to_vec();
        let records = data
            .iter()
            .enumerate()
            .map(|(i, row)| parse_row(i, row, &extra_columns))
            .collect::<Result<Vec<_>>>()?;

        Ok(Forecasts {
            entity_column: meta[0].clone(),
            extra_columns,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct forecast bases, in the order they appear.
    pub fn forecast_bases(&self) -> Vec<DateTime<Utc>> {
        let mut bases: Vec<DateTime<Utc>> = vec![];
        for r in &self.records {
            if !bases.contains(&r.forecast_base) {
                bases.push(r.forecast_base);
            }
        }
        bases
    }

    fn extend(&mut self, other: Forecasts) {
        if self.entity_column.is_empty() {
            self.entity_column = other.entity_column;
            self.extra_columns = other.extra_columns;
        }
        self.records.extend(other.records);
    }

    pub fn as_polars_df(&self) -> Result<DataFrame> {
        let mut entity_ids: Vec<i64> = vec![];
        let mut forecast_bases: Vec<NaiveDateTime> = vec![];
        let mut datetimes: Vec<NaiveDateTime> = vec![];
        let mut generation: Vec<f64> = vec![];

        for r in &self.records {
            entity_ids.push(r.entity_id);
            forecast_bases.push(r.forecast_base.naive_utc());
            datetimes.push(r.datetime.naive_utc());
            generation.push(r.generation_mw);
        }

        let entity_column = if self.entity_column.is_empty() {
            "gsp_id"
        } else {
            self.entity_column.as_str()
        };
        let mut columns = vec![
            Series::new(entity_column.into(), entity_ids),
            Series::new("forecast_base_gmt".into(), forecast_bases),
            Series::new("datetime_gmt".into(), datetimes),
            Series::new("generation_mw".into(), generation),
        ];

        for name in &self.extra_columns {
            let cells: Vec<FieldValue> = self
                .records
                .iter()
                .map(|r| r.extra(name).cloned().unwrap_or(FieldValue::Null))
                .collect();
            columns.push(series_from_values(name, &cells));
        }

        Ok(DataFrame::new(columns)?)
    }
}

fn parse_row(i: usize, row: &[Value], extra_columns: &[String]) -> Result<ForecastRecord> {
    let width = 4 + extra_columns.len();
    if row.len() != width {
        return Err(PvForecastError::response_format(format!(
            "row {} has {} values, expected {}",
            i,
            row.len(),
            width
        )));
    }

    let entity_id = FieldValue::from(&row[0]).as_i64().ok_or_else(|| {
        let reason = format!("row {}: entity id {} is not an integer", i, row[0]);
        PvForecastError::response_format(reason)
    })?;
    let forecast_base = timestamp(i, "forecast_base_gmt", &row[1])?;
    let datetime = timestamp(i, "datetime_gmt", &row[2])?;
    let generation_mw = row[3].as_f64().ok_or_else(|| {
        PvForecastError::response_format(format!(
            "row {}: generation_mw {} is not numeric",
            i, row[3]
        ))
    })?;
    if forecast_base > datetime {
        return Err(PvForecastError::response_format(format!(
            "row {}: forecast base {} is after datetime {}",
            i, forecast_base, datetime
        )));
    }

    let extra_fields = extra_columns
        .iter()
        .cloned()
        .zip(row[4..].iter().map(FieldValue::from))
        .collect();

    Ok(ForecastRecord {
        entity_id,
        forecast_base,
        datetime,
        generation_mw,
        extra_fields,
    })
}

fn timestamp(i: usize, column: &str, v: &Value) -> Result<DateTime<Utc>> {
    v.as_str().and_then(parse_api_datetime).ok_or_else(|| {
        PvForecastError::response_format(format!("row {}: {} {} is not a timestamp", i, column, v))
    })
}

/// Parses `"HH:MM"` strings into times of day.
pub fn parse_base_times<S: AsRef<str>>(times: &[S]) -> Result<Vec<NaiveTime>> {
    times
        .iter()
        .map(|t| {
            NaiveTime::parse_from_str(t.as_ref().trim(), "%H:%M").map_err(|_| {
                PvForecastError::InvalidInput(format!(
                    "forecast base time '{}' is not in HH:MM format",
                    t.as_ref()
                ))
            })
        })
        .collect()
}

/// Keeps the bases inside `range` whose time of day is listed in `times`
/// (all of them when `times` is empty), sorted and de-duplicated.
pub fn filter_forecast_bases(
    bases: &[DateTime<Utc>],
    range: &DateRange,
    times: &[NaiveTime],
) -> Vec<DateTime<Utc>> {
    let mut kept: Vec<DateTime<Utc>> = bases
        .iter()
        .copied()
        .filter(|b| range.contains(*b))
        .filter(|b| {
            times.is_empty()
                || times
                    .iter()
                    .any(|t| t.hour() == b.hour() && t.minute() == b.minute())
        })
        .collect();
    kept.sort();
    kept.dedup();
    kept
}

fn parse_forecast_bases(body: &str) -> Result<Vec<DateTime<Utc>>> {
    let response: ForecastBasesResponse =
        serde_json::from_str(body).map_err(|source| PvForecastError::Json { source })?;
    let raw: Vec<String> = match response {
        ForecastBasesResponse::List(list) => list,
        ForecastBasesResponse::Wrapped { data } => data
            .into_iter()
            .filter_map(|entry| match entry {
                BaseEntry::Plain(s) => Some(s),
                BaseEntry::Row(row) => row.into_iter().next(),
            })
            .collect(),
    };
    raw.iter()
        .map(|s| {
            parse_api_datetime(s).ok_or_else(|| {
                let reason = format!("forecast base '{}' is not a timestamp", s);
                PvForecastError::response_format(reason)
            })
        })
        .collect()
}

impl<'a> PvForecast<'a> {
    pub fn new(client: &'a dyn ApiClient) -> Self {
        Self {
            client,
            max_span: Duration::days(DEFAULT_MAX_SPAN_DAYS),
        }
    }

    pub fn with_max_span(mut self, max_span: Duration) -> Self {
        self.max_span = max_span;
        self
    }

    fn fetch(&self, request: &ApiRequest) -> Result<String> {
        self.client.http_get(&request.path, &request.query)
    }

    fn fetch_forecasts(&self, request: &ApiRequest) -> Result<Forecasts> {
        let body = self.fetch(request)?;
        Forecasts::from_json(&body).inspect_err(|e| {
            debug!("failed parsing reply of {}?{:?}: {}", request.path, request.query, e);
        })
    }

    /// Returns the most recent forecast for the entity.
    pub fn latest(&self, selector: &EntitySelector, extra_fields: &[String]) -> Result<Forecasts> {
        self.fetch_forecasts(&ApiRequest::latest(selector, extra_fields))
    }

    /// Returns the forecast issued at `forecast_base`, or the latest one when `None`.
    pub fn get_forecast(
        &self,
        forecast_base: Option<DateTime<Utc>>,
        selector: &EntitySelector,
        extra_fields: &[String],
    ) -> Result<Forecasts> {
        let request = match forecast_base {
            Some(base) => ApiRequest::single_base(base, selector, extra_fields),
            None => ApiRequest::latest(selector, extra_fields),
        };
        self.fetch_forecasts(&request)
    }

    /// Lists the forecast bases issued within `range`, one request per
    /// `max_span` window.
    pub fn get_forecast_bases(
        &self,
        range: &DateRange,
        forecast_type: ForecastType,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut bases = vec![];
        for window in range.split(self.max_span) {
            let body = self.fetch(&ApiRequest::forecast_bases(&window, forecast_type))?;
            bases.extend(parse_forecast_bases(&body)?);
        }
        bases.sort();
        bases.dedup();
        Ok(bases)
    }

    /// Fetches every forecast issued between `start` and `end` (inclusive),
    /// optionally only those issued at the given `"HH:MM"` times of day.
    pub fn get_forecasts<S: AsRef<str>>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        forecast_base_times: &[S],
        selector: &EntitySelector,
        extra_fields: &[String],
    ) -> Result<Forecasts> {
        let range = DateRange::new(start, end)?;
        let times = parse_base_times(forecast_base_times)?;

        let available = self.get_forecast_bases(&range, ForecastType::for_selector(selector))?;
        let bases = filter_forecast_bases(&available, &range, &times);
        info!(
            "fetching {} of {} forecast bases between {} and {}",
            bases.len(),
            available.len(),
            start,
            end
        );

        let mut forecasts = Forecasts::default();
        for base in bases {
            let chunk = self.get_forecast(Some(base), selector, extra_fields)?;
            if !chunk.is_empty() {
                forecasts.extend(chunk);
            }
        }
        Ok(forecasts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BODY: &str = r#"{
        "data": [
            [0, "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z", 12.5, 1200.0, null],
            [0, "2021-02-23T07:00:00Z", "2021-02-23T08:00:00Z", 40, 1201.5, 3]
        ],
        "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw", "installedcapacity_mwp", "site_count"]
    }"#;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 2, 23, h, m, 0).unwrap()
    }

    #[test]
    fn maps_rows_in_order() {
        let forecasts = Forecasts::from_json(BODY).unwrap();
        assert_eq!(forecasts.len(), 2);
        assert_eq!(forecasts.entity_column, "gsp_id");
        assert_eq!(forecasts.extra_columns, vec!["installedcapacity_mwp", "site_count"]);

        let first = &forecasts.records[0];
        assert_eq!(first.entity_id, 0);
        assert_eq!(first.forecast_base, at(7, 0));
        assert_eq!(first.datetime, at(7, 30));
        assert_eq!(first.generation_mw, 12.5);
        assert_eq!(first.extra("site_count"), Some(&FieldValue::Null));
        assert_eq!(forecasts.records[1].generation_mw, 40.0);
        assert_eq!(forecasts.records[1].datetime, at(8, 0));
    }

    #[test]
    fn meta_is_case_insensitive() {
        let body = r#"{"data": [[3, "2021-02-23T07:00:00Z", "2021-02-23T07:00:00Z", 1.0]],
                       "meta": ["PES_ID", "FORECAST_BASE_GMT", "DATETIME_GMT", "GENERATION_MW"]}"#;
        let forecasts = Forecasts::from_json(body).unwrap();
        assert_eq!(forecasts.entity_column, "pes_id");
        assert_eq!(forecasts.records[0].entity_id, 3);
    }

    #[test]
    fn empty_payload_is_empty_result() {
        assert!(Forecasts::from_json(r#"{"data": [], "meta": []}"#).unwrap().is_empty());
    }

    #[test]
    fn payload_without_data_or_meta_is_rejected() {
        let cases = [
            "{}",
            r#"{"error": "Bad request"}"#,
            r#"{"meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
            r#"{"data": []}"#,
        ];
        for body in cases {
            let err = Forecasts::from_json(body).unwrap_err();
            assert!(
                matches!(err, PvForecastError::ResponseFormat { .. }),
                "{} => {:?}",
                body,
                err
            );
        }
        let headers_only = Forecasts::from_json(
            r#"{"data": [], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
        )
        .unwrap();
        assert!(headers_only.is_empty());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let cases = [
            r#"{"data": [[0, "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z"]], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt"]}"#,
            r#"{"data": [[0, "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z", "lots"]], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
            r#"{"data": [[0, "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z", null]], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
            r#"{"data": [[0, "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z", 1.0, 2]], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
            r#"{"data": [[0, "2021-02-23T07:00:00Z", "2021-02-23T06:30:00Z", 1.0]], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
            r#"{"data": [[0, "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z", 1.0]], "meta": ["site", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
            r#"{"data": [["x", "2021-02-23T07:00:00Z", "2021-02-23T07:30:00Z", 1.0]], "meta": ["gsp_id", "forecast_base_gmt", "datetime_gmt", "generation_mw"]}"#,
        ];
        for body in cases {
            let err = Forecasts::from_json(body).unwrap_err();
            assert!(
                matches!(err, PvForecastError::ResponseFormat { .. }),
                "{} => {:?}",
                body,
                err
            );
        }
        assert!(matches!(
            Forecasts::from_json("<html>oops</html>"),
            Err(PvForecastError::Json { .. })
        ));
    }

    #[test]
    fn dataframe_keeps_every_column() {
        let forecasts = Forecasts::from_json(BODY).unwrap();
        let df = forecasts.as_polars_df().unwrap();

        assert_eq!(df.shape(), (2, 6));
        let names: Vec<&str> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "gsp_id",
                "forecast_base_gmt",
                "datetime_gmt",
                "generation_mw",
                "installedcapacity_mwp",
                "site_count"
            ]
        );
        assert_eq!(df.column("gsp_id").unwrap().dtype(), &DataType::Int64);
        assert!(matches!(
            df.column("datetime_gmt").unwrap().dtype(),
            DataType::Datetime(_, _)
        ));
        assert_eq!(df.column("generation_mw").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("installedcapacity_mwp").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("site_count").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("site_count").unwrap().null_count(), 1);

        let generation: Vec<Option<f64>> =
            df.column("generation_mw").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(generation, vec![Some(12.5), Some(40.0)]);
    }

    #[test]
    fn base_times_must_be_hh_mm() {
        assert_eq!(
            parse_base_times(&["07:00", "10:30"]).unwrap(),
            vec![
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(10, 30, 0).unwrap()
            ]
        );
        assert!(matches!(
            parse_base_times(&["7am"]),
            Err(PvForecastError::InvalidInput(_))
        ));
    }

    #[test]
    fn filtered_bases_are_sorted_and_inside_range() {
        let range = DateRange::new(at(1, 0), at(7, 0)).unwrap();
        let bases = vec![at(7, 0), at(4, 0), at(0, 0), at(1, 0), at(4, 0), at(10, 0)];

        let all = filter_forecast_bases(&bases, &range, &[]);
        assert_eq!(all, vec![at(1, 0), at(4, 0), at(7, 0)]);
        assert!(all.windows(2).all(|w| w[0] <= w[1]));

        let seven = parse_base_times(&["07:00"]).unwrap();
        assert_eq!(filter_forecast_bases(&bases, &range, &seven), vec![at(7, 0)]);
    }

    #[test]
    fn forecast_bases_list_shapes() {
        let plain = r#"["2021-02-23T04:00:00Z", "2021-02-23T07:00:00Z"]"#;
        let wrapped = r#"{"data": [["2021-02-23T04:00:00Z"], ["2021-02-23T07:00:00Z"]], "meta": ["forecast_base_gmt"]}"#;
        for body in [plain, wrapped] {
            assert_eq!(parse_forecast_bases(body).unwrap(), vec![at(4, 0), at(7, 0)]);
        }
    }
}
