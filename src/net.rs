use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::DeviceError;
use crate::types::{DeviceIdentity, SensorStatus, Settings, SettingsPayload, UpdateResponse};

/// Endpoints exposed by the sensor accessory.
#[async_trait]
pub trait DeviceApi: Send + Sync + 'static {
    async fn get_settings(&self) -> Result<Settings, DeviceError>;

    async fn update_settings(&self, payload: &SettingsPayload) -> Result<UpdateResponse, DeviceError>;

    async fn sensor_status(&self) -> Result<SensorStatus, DeviceError>;

    /// Clears the device's tick statistics. The response body is ignored.
    async fn reset_stats(&self) -> Result<(), DeviceError>;

    async fn version(&self) -> Result<DeviceIdentity, DeviceError>;

    async fn logs(&self) -> Result<serde_json::Value, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct HttpDevice {
    client: Client,
    base_url: String,
}

impl HttpDevice {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        HttpDevice { client, base_url }
    }

    pub fn from_config(config: &Config) -> Result<Self, DeviceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self::new(builder.build()?, config.device_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn check_status(response: Response) -> Result<Response, DeviceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DeviceError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, DeviceError> {
    let text = check_status(response)?.text().await?;
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn get_settings(&self) -> Result<Settings, DeviceError> {
        let response = self.client.get(self.url("/get_settings")).send().await?;
        read_json(response).await
    }

    async fn update_settings(&self, payload: &SettingsPayload) -> Result<UpdateResponse, DeviceError> {
        let response = self
            .client
            .post(self.url("/update_settings"))
            .json(payload)
            .send()
            .await?;
        let update: UpdateResponse = read_json(response).await?;
        log::info!("Settings write acknowledged (success = {}).", update.success);
        Ok(update)
    }

    async fn sensor_status(&self) -> Result<SensorStatus, DeviceError> {
        let response = self.client.get(self.url("/sensor_status")).send().await?;
        read_json(response).await
    }

    async fn reset_stats(&self) -> Result<(), DeviceError> {
        let response = self.client.post(self.url("/reset_stats")).send().await?;
        check_status(response)?;
        log::info!("Device tick statistics reset.");
        Ok(())
    }

    async fn version(&self) -> Result<DeviceIdentity, DeviceError> {
        let response = self.client.get(self.url("/version")).send().await?;
        read_json(response).await
    }

    async fn logs(&self) -> Result<serde_json::Value, DeviceError> {
        let response = self.client.get(self.url("/logs")).send().await?;
        let text = check_status(response)?.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
