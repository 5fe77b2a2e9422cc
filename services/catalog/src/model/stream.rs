use serde::{Deserialize, Serialize};
use serde_json::Value;

// Provider metadata keys that carry a channel number, checked in order.
const NUMBER_PROPERTIES: [&str; 3] = ["tvg-chno", "channel-number", "num"];
const STATION_ID_PROPERTY: &str = "tvc-guide-stationid";

/// An ingested source stream. Streams pre-exist channel provisioning; the
/// playlist ingest that creates them is outside this service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stream {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub tvg_id: Option<String>,
    pub logo_url: Option<String>,
    pub group_id: Option<i64>,
    /// Free-form provider metadata from the playlist entry.
    pub custom_properties: Option<Value>,
}

/// Creation input for a stream (everything but the assigned id).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NewStream {
    pub name: String,
    pub url: String,
    pub tvg_id: Option<String>,
    pub logo_url: Option<String>,
    pub group_id: Option<i64>,
    pub custom_properties: Option<Value>,
}

impl Stream {
    /// Channel number carried by provider metadata, if any. Providers encode
    /// these as either JSON numbers or strings.
    pub fn provider_number(&self) -> Option<f64> {
        let props = self.custom_properties.as_ref()?.as_object()?;
        NUMBER_PROPERTIES
            .iter()
            .find_map(|key| props.get(*key).and_then(numeric_value))
    }

    /// Guide station id carried by provider metadata, if any.
    pub fn provider_station_id(&self) -> Option<String> {
        let props = self.custom_properties.as_ref()?.as_object()?;
        match props.get(STATION_ID_PROPERTY)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream_with(props: Value) -> Stream {
        Stream {
            id: 1,
            name: "News One".into(),
            url: "http://example/one".into(),
            tvg_id: Some("news.one".into()),
            logo_url: None,
            group_id: None,
            custom_properties: Some(props),
        }
    }

    #[test]
    fn provider_number_checks_keys_in_order() {
        let stream = stream_with(json!({"num": 30, "tvg-chno": 12.5}));
        assert_eq!(stream.provider_number(), Some(12.5));
        let stream = stream_with(json!({"channel-number": "7"}));
        assert_eq!(stream.provider_number(), Some(7.0));
        let stream = stream_with(json!({"num": "8.5"}));
        assert_eq!(stream.provider_number(), Some(8.5));
    }

    #[test]
    fn provider_number_absent_without_metadata() {
        let stream = stream_with(json!({"group-title": "News"}));
        assert_eq!(stream.provider_number(), None);
        let mut stream = stream_with(json!({}));
        stream.custom_properties = None;
        assert_eq!(stream.provider_number(), None);
    }

    #[test]
    fn station_id_accepts_strings_and_numbers() {
        let stream = stream_with(json!({"tvc-guide-stationid": "st-99"}));
        assert_eq!(stream.provider_station_id(), Some("st-99".into()));
        let stream = stream_with(json!({"tvc-guide-stationid": 99}));
        assert_eq!(stream.provider_station_id(), Some("99".into()));
    }
}
