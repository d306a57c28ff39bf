use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// How an Alpaca call failed: on the wire, at the HTTP layer, or inside the
/// device driver (`ErrorNumber != 0`).
#[derive(Error, Debug)]
pub enum AlpacaError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Alpaca error {number}: {message}")]
    Application { number: i32, message: String },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

pub type AlpacaResult<T> = std::result::Result<T, AlpacaError>;

/// Every Alpaca response body carries this envelope.  `Value` is absent on
/// PUT responses.
#[derive(Debug, Deserialize)]
pub struct AlpacaResponse<T> {
    #[serde(rename = "Value")]
    pub value: Option<T>,
    #[serde(rename = "ClientTransactionID", default)]
    pub client_transaction_id: u32,
    #[serde(rename = "ServerTransactionID", default)]
    pub server_transaction_id: u32,
    #[serde(rename = "ErrorNumber", default)]
    pub error_number: i32,
    #[serde(rename = "ErrorMessage", default)]
    pub error_message: String,
}

/// One entry of an `axisrates` response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AxisRate {
    #[serde(rename = "Minimum")]
    pub minimum: f64,
    #[serde(rename = "Maximum")]
    pub maximum: f64,
}

/// REST client for one Alpaca server.  Shared by every protocol engine in
/// the process; the transaction counter is atomic so engines never have to
/// serialize their HTTP calls behind a lock.
#[derive(Debug)]
pub struct AlpacaClient {
    http: Client,
    base_url: String,
    client_id: u32,
    transaction_id: AtomicU32,
}

impl AlpacaClient {
    pub fn new(host: &str, port: u16, client_id: u32) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("http://{}:{}", host, port),
            client_id,
            transaction_id: AtomicU32::new(0),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Each call gets a fresh, monotonically increasing id.  Increment
    /// happens before use so an id is never reused within this ClientID.
    fn next_transaction_id(&self) -> u32 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn url(&self, device: &str, device_id: u32, api: &str) -> String {
        format!("{}/api/v1/{}/{}/{}", self.base_url, device, device_id, api)
    }

    fn check<T>(response: AlpacaResponse<T>) -> AlpacaResult<Option<T>> {
        if response.error_number != 0 {
            return Err(AlpacaError::Application {
                number: response.error_number,
                message: response.error_message,
            });
        }
        debug!(
            client_transaction_id = response.client_transaction_id,
            server_transaction_id = response.server_transaction_id,
            "Alpaca response ok"
        );
        Ok(response.value)
    }

    pub async fn get_value<T: DeserializeOwned>(
        &self,
        device: &str,
        device_id: u32,
        api: &str,
        extra: &[(&str, String)],
    ) -> AlpacaResult<Option<T>> {
        let url = self.url(device, device_id, api);
        let mut query: Vec<(&str, String)> = Vec::with_capacity(extra.len() + 2);
        query.extend_from_slice(extra);
        query.push(("ClientID", self.client_id.to_string()));
        query.push(("ClientTransactionID", self.next_transaction_id().to_string()));

        let response = self.http.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Alpaca GET failed");
            return Err(AlpacaError::HttpStatus(status));
        }
        Self::check(response.json::<AlpacaResponse<T>>().await?)
    }

    pub async fn get_string(&self, device: &str, device_id: u32, api: &str) -> AlpacaResult<String> {
        Ok(self
            .get_value::<String>(device, device_id, api, &[])
            .await?
            .unwrap_or_default())
    }

    pub async fn get_string_list(
        &self,
        device: &str,
        device_id: u32,
        api: &str,
    ) -> AlpacaResult<Vec<String>> {
        Ok(self
            .get_value::<Vec<String>>(device, device_id, api, &[])
            .await?
            .unwrap_or_default())
    }

    pub async fn get_bool(&self, device: &str, device_id: u32, api: &str) -> AlpacaResult<bool> {
        Ok(self
            .get_value::<bool>(device, device_id, api, &[])
            .await?
            .unwrap_or_default())
    }

    pub async fn get_i32(&self, device: &str, device_id: u32, api: &str) -> AlpacaResult<i32> {
        Ok(self
            .get_value::<i32>(device, device_id, api, &[])
            .await?
            .unwrap_or_default())
    }

    pub async fn get_f64(&self, device: &str, device_id: u32, api: &str) -> AlpacaResult<f64> {
        Ok(self
            .get_value::<f64>(device, device_id, api, &[])
            .await?
            .unwrap_or_default())
    }

    /// Some drivers return an empty `axisrates` list; treat that as a
    /// zero-rate axis rather than an error so sessions can still start.
    pub async fn get_axis_rates(
        &self,
        device: &str,
        device_id: u32,
        axis: i32,
    ) -> AlpacaResult<AxisRate> {
        let rates = self
            .get_value::<Vec<AxisRate>>(device, device_id, "axisrates", &[("Axis", axis.to_string())])
            .await?
            .unwrap_or_default();
        match rates.first() {
            Some(rate) => Ok(*rate),
            None => {
                warn!("telescope driver returned an empty list for axisrates");
                Ok(AxisRate::default())
            }
        }
    }

    pub async fn put(
        &self,
        device: &str,
        device_id: u32,
        api: &str,
        params: &[(&str, String)],
    ) -> AlpacaResult<()> {
        let url = self.url(device, device_id, api);
        let mut form: Vec<(&str, String)> = Vec::with_capacity(params.len() + 2);
        form.extend_from_slice(params);
        form.push(("ClientID", self.client_id.to_string()));
        form.push(("ClientTransactionID", self.next_transaction_id().to_string()));

        debug!(%url, ?params, "Alpaca PUT");
        let response = self.http.put(&url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Alpaca PUT failed");
            return Err(AlpacaError::HttpStatus(status));
        }
        Self::check(response.json::<AlpacaResponse<()>>().await?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::MockAlpaca;
    use serde_json::json;

    #[tokio::test]
    async fn transaction_ids_are_monotonic() {
        let mock = MockAlpaca::start().await;
        mock.set_value("rightascension", json!(6.0)).await;

        let client = AlpacaClient::new("127.0.0.1", mock.port(), 77);
        for _ in 0..3 {
            client
                .get_f64("telescope", 0, "rightascension")
                .await
                .unwrap();
        }

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 3);
        for (i, request) in requests.iter().enumerate() {
            assert!(request.contains("ClientID=77"), "{}", request);
            assert!(
                request.contains(&format!("ClientTransactionID={}", i + 1)),
                "{}",
                request
            );
        }
    }

    #[tokio::test]
    async fn application_error_is_surfaced() {
        let mock = MockAlpaca::start().await;
        mock.set_error("declination", 1025, "Invalid value").await;

        let client = AlpacaClient::new("127.0.0.1", mock.port(), 1);
        let err = client
            .get_f64("telescope", 0, "declination")
            .await
            .unwrap_err();
        match err {
            AlpacaError::Application { number, message } => {
                assert_eq!(number, 1025);
                assert_eq!(message, "Invalid value");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_axis_rates_fall_back_to_zero() {
        let mock = MockAlpaca::start().await;
        mock.set_value("axisrates", json!([])).await;

        let client = AlpacaClient::new("127.0.0.1", mock.port(), 1);
        let rate = client.get_axis_rates("telescope", 0, 0).await.unwrap();
        assert_eq!(rate.minimum, 0.0);
        assert_eq!(rate.maximum, 0.0);
    }

    #[tokio::test]
    async fn put_sends_form_encoded_params() {
        let mock = MockAlpaca::start().await;

        let client = AlpacaClient::new("127.0.0.1", mock.port(), 5);
        client
            .put(
                "telescope",
                0,
                "slewtocoordinatesasync",
                &[
                    ("RightAscension", 6.0_f64.to_string()),
                    ("Declination", 45.0_f64.to_string()),
                ],
            )
            .await
            .unwrap();

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("PUT slewtocoordinatesasync"), "{}", requests[0]);
        assert!(requests[0].contains("RightAscension=6"), "{}", requests[0]);
        assert!(requests[0].contains("Declination=45"), "{}", requests[0]);
    }
}
