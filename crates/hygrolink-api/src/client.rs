// REST client for the sensor server.
//
// Wraps `reqwest::Client` with endpoint construction, status checking and
// typed decoding. Stream endpoints are built here too so the REST and
// stream surfaces always agree on paths.

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{DeviceStatus, DevicesResponse};
use crate::transport::TransportConfig;

/// One-shot HTTP client for `/v1/devices` endpoints.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference-counted.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the server root, e.g. `http://192.168.0.235:8080`.
    /// A path prefix (`http://host/sensors`) is preserved.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Parse `base_url` and wrap an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self::with_client(http, Url::parse(base_url)?))
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/v1/devices`
    pub fn devices_url(&self) -> Result<Url, Error> {
        endpoint(&self.base_url, &["v1", "devices"])
    }

    /// `{base}/v1/devices/{device_id}/latest`
    pub fn latest_url(&self, device_id: &str) -> Result<Url, Error> {
        endpoint(&self.base_url, &["v1", "devices", device_id, "latest"])
    }

    /// `{base}/v1/devices/{device_id}/stream`
    pub fn stream_url(&self, device_id: &str) -> Result<Url, Error> {
        stream_url(&self.base_url, device_id)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the current status of every known device.
    ///
    /// `GET /v1/devices`
    pub async fn list_devices(&self) -> Result<Vec<DeviceStatus>, Error> {
        let url = self.devices_url()?;
        debug!("listing devices");
        let body: DevicesResponse = self.get(url).await?;
        Ok(body.devices)
    }

    /// Fetch the most recent reading of one device.
    ///
    /// `GET /v1/devices/{device_id}/latest`
    pub async fn latest(&self, device_id: &str) -> Result<DeviceStatus, Error> {
        let url = self.latest_url(device_id)?;
        debug!(device_id, "fetching latest reading");
        self.get(url).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request, require `200 OK`, and decode the JSON body.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

/// `{base}/v1/devices/{device_id}/stream`
pub(crate) fn stream_url(base_url: &Url, device_id: &str) -> Result<Url, Error> {
    endpoint(base_url, &["v1", "devices", device_id, "stream"])
}

/// Append path segments to `base`, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Error> {
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidEndpoint(format!(
            "empty path segment in {segments:?}"
        )));
    }

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::InvalidEndpoint(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::from_reqwest(base, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn builds_device_endpoints() {
        let api = client("http://localhost:8080");
        assert_eq!(api.devices_url().unwrap().as_str(), "http://localhost:8080/v1/devices");
        assert_eq!(
            api.latest_url("d1").unwrap().as_str(),
            "http://localhost:8080/v1/devices/d1/latest"
        );
        assert_eq!(
            api.stream_url("d1").unwrap().as_str(),
            "http://localhost:8080/v1/devices/d1/stream"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let api = client("http://gateway.local/sensors/");
        assert_eq!(
            api.devices_url().unwrap().as_str(),
            "http://gateway.local/sensors/v1/devices"
        );
    }

    #[test]
    fn encodes_device_ids_as_single_segment() {
        let api = client("http://localhost:8080");
        assert_eq!(
            api.latest_url("lab/room 2").unwrap().as_str(),
            "http://localhost:8080/v1/devices/lab%2Froom%202/latest"
        );
    }

    #[test]
    fn empty_device_id_is_an_invalid_endpoint() {
        let api = client("http://localhost:8080");
        assert!(matches!(api.latest_url(""), Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn cannot_be_a_base_url_is_rejected() {
        let base = Url::parse("mailto:ops@example.com").unwrap();
        assert!(matches!(
            stream_url(&base, "d1"),
            Err(Error::InvalidEndpoint(_))
        ));
    }
}
