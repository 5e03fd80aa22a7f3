use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

pub const FIELD_DELIMITER: char = ',';
/// Separator used by producers inside the date part, e.g. `12_3_2023 14:56:40`
pub const TIMESTAMP_SEPARATOR: char = '_';
pub const CANONICAL_DATE_SEPARATOR: char = '/';

// Tried in order, `%.f` also matches when there are no fractional seconds
const TIMESTAMP_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// A single telemetry sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub quantity_remaining: f64,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, quantity_remaining: f64) -> Self {
        Self {
            timestamp,
            quantity_remaining,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    Timestamp,
    Quantity,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("malformed record: expected at least {expected} fields, found {found}")]
    MalformedRecord { expected: usize, found: usize },

    #[error("invalid {field} value: {value:?}")]
    InvalidValue { field: Field, value: String },
}

/// Positions of the timestamp and quantity fields inside a data record.
///
/// Historical producers disagree on the layout: older ones send
/// `timestamp,quantity`, newer ones send `identifier,timestamp,quantity,checksum`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub timestamp_index: usize,
    pub quantity_index: usize,
}

impl FieldLayout {
    pub const PLAIN: Self = Self {
        timestamp_index: 0,
        quantity_index: 1,
    };

    pub const PREFIXED: Self = Self {
        timestamp_index: 1,
        quantity_index: 2,
    };

    pub fn new(timestamp_index: usize, quantity_index: usize) -> Self {
        Self {
            timestamp_index,
            quantity_index,
        }
    }

    /// Minimum number of fields a record needs for this layout, never less than two
    pub fn required_fields(&self) -> usize {
        (self.timestamp_index.max(self.quantity_index) + 1).max(2)
    }
}

impl Default for FieldLayout {
    fn default() -> Self {
        RecordLayout::default().into()
    }
}

/// Named presets for [`FieldLayout`], as selected from the command line
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum RecordLayout {
    Plain,
    #[default]
    Prefixed,
}

impl From<RecordLayout> for FieldLayout {
    fn from(layout: RecordLayout) -> Self {
        match layout {
            RecordLayout::Plain => FieldLayout::PLAIN,
            RecordLayout::Prefixed => FieldLayout::PREFIXED,
        }
    }
}

/// Parses one data record into a [`Reading`]
pub fn parse_line(line: &str, layout: &FieldLayout) -> Result<Reading, ParseError> {
    let fields = line.split(FIELD_DELIMITER).collect::<Vec<&str>>();

    let expected = layout.required_fields();
    if fields.len() < expected {
        return Err(ParseError::MalformedRecord {
            expected,
            found: fields.len(),
        });
    }

    let timestamp = parse_timestamp(fields[layout.timestamp_index].trim())?;
    let quantity_remaining = parse_quantity(fields[layout.quantity_index].trim())?;

    Ok(Reading::new(timestamp, quantity_remaining))
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ParseError> {
    let normalized = raw.replace(TIMESTAMP_SEPARATOR, &CANONICAL_DATE_SEPARATOR.to_string());

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(&normalized)
                .ok()
                .map(|datetime| datetime.naive_utc())
        })
        .ok_or_else(|| ParseError::InvalidValue {
            field: Field::Timestamp,
            value: raw.to_string(),
        })
}

pub fn parse_quantity(raw: &str) -> Result<f64, ParseError> {
    match raw.parse::<f64>() {
        Ok(quantity) if quantity.is_finite() && quantity >= 0.0 => Ok(quantity),
        _ => Err(ParseError::InvalidValue {
            field: Field::Quantity,
            value: raw.to_string(),
        }),
    }
}
