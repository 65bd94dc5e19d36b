use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum PayloadValue {
    Number(f64),
    Text(String),
}

impl PayloadValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(number) => json!(number),
            Self::Text(text) => Value::String(text.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LatestPayload {
    pub raw: Vec<u8>,
    pub text: String,
    pub numeric: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl LatestPayload {
    pub fn decode(raw: &[u8], received_at: DateTime<Utc>) -> Self {
        let text = String::from_utf8_lossy(raw).into_owned();
        let numeric = parse_numeric(&text);
        Self {
            raw: raw.to_vec(),
            text,
            numeric,
            received_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub text: String,
    pub value: PayloadValue,
    pub received_at: DateTime<Utc>,
}

impl Reading {
    pub fn display_text(&self) -> &str {
        self.text.trim_end_matches(['\r', '\n'])
    }

    pub fn received_at_rfc3339(&self) -> String {
        self.received_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Default)]
pub struct LatestValueStore {
    slot: Option<LatestPayload>,
    writes: u64,
}

impl LatestValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_payload(&mut self, raw: &[u8], received_at: DateTime<Utc>) -> &LatestPayload {
        self.writes += 1;
        self.slot.insert(LatestPayload::decode(raw, received_at))
    }

    pub fn query_latest(&self) -> Option<Reading> {
        let payload = self.slot.as_ref()?;
        let value = match payload.numeric {
            Some(number) => PayloadValue::Number(number),
            None => PayloadValue::Text(payload.text.clone()),
        };

        Some(Reading {
            text: payload.text.clone(),
            value,
            received_at: payload.received_at,
        })
    }

    pub fn clear_latest(&mut self) -> bool {
        self.slot.take().is_some()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

// Surrounding whitespace (the usual trailing newline) is ignored. Only finite values
// count as numeric, since NaN and infinities have no JSON representation.
fn parse_numeric(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
