use polars::frame::DataFrame;
use polars::series::Series;

use crate::error::{PvForecastError, Result};
use crate::ApiClient;

use super::forecast::TabularResponse;
use super::request::ApiRequest;
use super::value::series_from_values;
use super::{EntityType, FieldValue};

pub struct EntityLists<'a> {
    client: &'a dyn ApiClient,
}

/// A GSP or PES listing as returned by the API.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityList {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl EntityList {
    pub fn from_json(body: &str) -> Result<Self> {
        let response: TabularResponse =
            serde_json::from_str(body).map_err(|source| PvForecastError::Json { source })?;
        let (columns, data) = response.into_columns_and_rows()?;

        let rows = data
            .iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != columns.len() {
                    return Err(PvForecastError::response_format(format!(
                        "list row {} has {} values, expected {}",
                        i,
                        row.len(),
                        columns.len()
                    )));
                }
                Ok(row.iter().map(FieldValue::from).collect())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EntityList { columns, rows })
    }

    /// Distinct non-null values of an integer ID column, in listing order.
    pub fn ids(&self, column: &str) -> Result<Vec<i64>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                PvForecastError::response_format(format!("list has no '{}' column", column))
            })?;

        let mut ids = vec![];
        for row in &self.rows {
            if let Some(id) = row[idx].as_i64() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    pub fn as_polars_df(&self) -> Result<DataFrame> {
        let columns: Vec<Series> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let cells: Vec<FieldValue> = self.rows.iter().map(|r| r[idx].clone()).collect();
                series_from_values(name, &cells)
            })
            .collect();
        Ok(DataFrame::new(columns)?)
    }
}

impl<'a> EntityLists<'a> {
    pub fn new(client: &'a dyn ApiClient) -> Self {
        Self { client }
    }

    pub fn gsp_list(&self) -> Result<EntityList> {
        self.list(EntityType::Gsp)
    }

    pub fn pes_list(&self) -> Result<EntityList> {
        self.list(EntityType::Pes)
    }

    fn list(&self, entity_type: EntityType) -> Result<EntityList> {
        let request = ApiRequest::entity_list(entity_type);
        let body = self.client.http_get(&request.path, &request.query)?;
        EntityList::from_json(&body)
    }

    /// IDs known to the API for `entity_type`; national maps to the GSP list.
    pub fn entity_ids(&self, entity_type: EntityType) -> Result<Vec<i64>> {
        self.list(entity_type)?.ids(entity_type.id_column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GSP_LIST: &str = r#"{
        "data": [[0, "NATIONAL", null], [1, "ABHA1", "_A"], [1, "ABHA1", "_B"], [null, "UNKNOWN", null], [120, "KEAR_1", "_P"]],
        "meta": ["GSP_ID", "gsp_name", "region_id"]
    }"#;

    #[test]
    fn parses_listing() {
        let list = EntityList::from_json(GSP_LIST).unwrap();
        assert_eq!(list.columns, vec!["gsp_id", "gsp_name", "region_id"]);
        assert_eq!(list.rows.len(), 5);
        assert_eq!(list.ids("gsp_id").unwrap(), vec![0, 1, 120]);
        assert!(list.ids("pes_id").is_err());
    }

    #[test]
    fn listing_as_dataframe() {
        let df = EntityList::from_json(GSP_LIST).unwrap().as_polars_df().unwrap();
        assert_eq!(df.shape(), (5, 3));
        assert_eq!(df.column("gsp_id").unwrap().null_count(), 1);
    }

    #[test]
    fn listing_needs_data_and_meta() {
        for body in ["{}", r#"{"meta": ["gsp_id", "gsp_name"]}"#] {
            assert!(matches!(
                EntityList::from_json(body),
                Err(PvForecastError::ResponseFormat { .. })
            ));
        }
    }

    #[test]
    fn ragged_listing_is_rejected() {
        let body = r#"{"data": [[1, "ABHA1"]], "meta": ["gsp_id", "gsp_name", "region_id"]}"#;
        assert!(matches!(
            EntityList::from_json(body),
            Err(PvForecastError::ResponseFormat { .. })
        ));
    }
}
