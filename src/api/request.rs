//! Path and query-string construction for every PV_Forecast endpoint.
//!
//! Everything here is a pure function of its inputs. Credentials and the base
//! URL are added by the [`ApiClient`](crate::ApiClient) implementation.

use chrono::{DateTime, Utc};

use super::{DateRange, EntitySelector, EntityType, ForecastType, FormatToApiFmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Latest forecast for an entity.
    pub fn latest(selector: &EntitySelector, extra_fields: &[String]) -> Self {
        let mut query = vec![];
        push_extra_fields(&mut query, extra_fields);
        ApiRequest {
            path: selector.path(),
            query,
        }
    }

    /// Forecast issued at `forecast_base` for an entity.
    pub fn single_base(
        forecast_base: DateTime<Utc>,
        selector: &EntitySelector,
        extra_fields: &[String],
    ) -> Self {
        let mut query = vec![(
            "forecast_base_GMT".to_string(),
            forecast_base.to_api_format(),
        )];
        push_extra_fields(&mut query, extra_fields);
        ApiRequest {
            path: selector.path(),
            query,
        }
    }

    /// Forecast bases issued within `range`.
    pub fn forecast_bases(range: &DateRange, forecast_type: ForecastType) -> Self {
        ApiRequest {
            path: format!("forecast_bases_list/{}", forecast_type.list_id()),
            query: range.to_query_string(),
        }
    }

    pub fn entity_list(entity_type: EntityType) -> Self {
        let path = match entity_type {
            EntityType::Pes => "pes_list",
            EntityType::National | EntityType::Gsp => "gsp_list",
        };
        ApiRequest {
            path: path.to_string(),
            query: vec![],
        }
    }
}

fn push_extra_fields(query: &mut Vec<(String, String)>, extra_fields: &[String]) {
    let joined = extra_fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    if !joined.is_empty() {
        query.push(("extra_fields".to_string(), joined));
    }
}
