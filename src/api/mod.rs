use core::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{PvForecastError, Result};

pub mod entities;
pub mod forecast;
pub mod request;
mod value;

pub use value::FieldValue;

pub trait FormatToApiFmt {
    fn to_api_format(&self) -> String;
}

impl FormatToApiFmt for DateTime<Utc> {
    fn to_api_format(&self) -> String {
        self.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

/// Parses the timestamp shapes the API emits. Naive values are taken as UTC.
pub(crate) fn parse_api_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// An inclusive UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(PvForecastError::InvalidRange { start, end });
        }
        Ok(DateRange { start, end })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Splits the range into consecutive windows no longer than `max_span`.
    /// Adjacent windows share their boundary instant.
    pub fn split(&self, max_span: Duration) -> Vec<DateRange> {
        let span = if max_span <= Duration::zero() {
            Duration::minutes(1)
        } else {
            max_span
        };

        let mut windows = vec![];
        let mut start = self.start;
        loop {
            let end = match start.checked_add_signed(span) {
                Some(end) if end < self.end => end,
                _ => self.end,
            };
            windows.push(DateRange { start, end });
            if end >= self.end {
                break;
            }
            start = end;
        }
        windows
    }

    fn to_query_string(&self) -> Vec<(String, String)> {
        vec![
            ("start".to_string(), self.start.to_api_format()),
            ("end".to_string(), self.end.to_api_format()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityType {
    /// GB-wide aggregate, always entity ID 0
    National,
    /// DNO License Area / GSP Group Region
    Pes,
    /// Grid Supply Point
    #[default]
    Gsp,
}

impl EntityType {
    /// Name of the ID column in responses for this entity type.
    pub fn id_column(&self) -> &'static str {
        match self {
            EntityType::Pes => "pes_id",
            EntityType::National | EntityType::Gsp => "gsp_id",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let et = match self {
            EntityType::National => "national",
            EntityType::Pes => "pes",
            EntityType::Gsp => "gsp",
        };
        write!(f, "{}", et)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntitySelector {
    entity_type: EntityType,
    entity_id: i64,
}

impl EntitySelector {
    pub fn new(entity_type: EntityType, entity_id: i64) -> Self {
        let entity_id = match entity_type {
            EntityType::National => 0,
            _ => entity_id,
        };
        EntitySelector {
            entity_type,
            entity_id,
        }
    }

    pub fn national() -> Self {
        Self::new(EntityType::National, 0)
    }

    pub fn pes(entity_id: i64) -> Self {
        Self::new(EntityType::Pes, entity_id)
    }

    pub fn gsp(entity_id: i64) -> Self {
        Self::new(EntityType::Gsp, entity_id)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> i64 {
        self.entity_id
    }

    pub fn is_national(&self) -> bool {
        self.entity_id == 0
    }

    /// ID 0 is the national aggregate under every entity type, so it is
    /// always requested as `gsp/0`.
    pub(crate) fn path(&self) -> String {
        match self.entity_type {
            EntityType::Pes if !self.is_national() => format!("pes/{}", self.entity_id),
            _ => format!("gsp/{}", self.entity_id),
        }
    }

    /// Checks the ID against a list fetched with
    /// [`entities::EntityLists::entity_ids`].
    pub fn validate(&self, known_ids: &[i64]) -> Result<()> {
        if self.is_national() || known_ids.contains(&self.entity_id) {
            return Ok(());
        }
        Err(PvForecastError::InvalidInput(format!(
            "The {} {} was not found",
            self.entity_type.id_column(),
            self.entity_id
        )))
    }
}

/// Which forecast-base list to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastType {
    National,
    Regional,
}

impl ForecastType {
    pub fn for_selector(selector: &EntitySelector) -> Self {
        if selector.is_national() {
            ForecastType::National
        } else {
            ForecastType::Regional
        }
    }

    fn list_id(&self) -> u8 {
        match self {
            ForecastType::National => 0,
            ForecastType::Regional => 1,
        }
    }
}
