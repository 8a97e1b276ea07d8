use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;

use super::{BackendError, ReverseGeocode};
use crate::domain::Coordinate;
use crate::error::Result;

pub const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Address fields that name a locality, most specific first.
const LOCALITY_FIELDS: &[&str] = &[
    "city",
    "town",
    "village",
    "hamlet",
    "municipality",
    "county",
    "state_district",
];

/// Reverse geocoding against a Nominatim-compatible `/reverse` endpoint.
pub struct NominatimClient {
    client: Client,
    endpoint: String,
    language: String,
}

impl NominatimClient {
    pub fn new(endpoint: &str, user_agent: &str, language: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            language: language.to_string(),
        })
    }
}

impl ReverseGeocode for NominatimClient {
    fn reverse(&self, coordinate: Coordinate) -> std::result::Result<Option<String>, BackendError> {
        let url = format!("{}/reverse", self.endpoint);
        let lat = coordinate.latitude.to_string();
        let lon = coordinate.longitude.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2"),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("addressdetails", "1"),
                ("accept-language", self.language.as_str()),
            ])
            .send()
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body = response
            .text()
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))?;
        Ok(place_from_response(&json))
    }
}

/// Throttling and server errors are worth retrying; any other failure status is final.
pub fn status_error(status: StatusCode) -> BackendError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BackendError::Transient(format!("HTTP {status}"))
    } else {
        BackendError::Rejected(format!("HTTP {status}"))
    }
}

/// Extract "City, Country" from a `/reverse` response body.
///
/// Returns `None` for error payloads and for addresses naming neither a
/// locality nor a country.
pub fn place_from_response(json: &Value) -> Option<String> {
    if json.get("error").is_some() {
        return None;
    }
    let address = json.get("address")?;
    let field = |name: &str| {
        address
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let locality = LOCALITY_FIELDS
        .iter()
        .find_map(|name| field(name))
        .or_else(|| field("state"));
    let country = field("country");

    match (locality, country) {
        (Some(l), Some(c)) => Some(format!("{l}, {c}")),
        (Some(l), None) => Some(l.to_string()),
        (None, Some(c)) => Some(c.to_string()),
        (None, None) => None,
    }
}
