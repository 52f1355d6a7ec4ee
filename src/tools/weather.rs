//! Weather lookup tool
//!
//! Current conditions from `OpenWeatherMap`, in metric units.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::registry::{Tool, ToolDefinition};
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Current weather for a city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    /// City name as resolved by the provider
    pub city: String,
    /// Temperature in °C
    pub temperature: f64,
    /// Short condition description (e.g. "light rain")
    pub condition: String,
    /// Relative humidity in percent
    pub humidity: u8,
    /// Wind speed in m/s
    pub wind_speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    name: String,
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    #[serde(default)]
    wind: OwmWind,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwmWind {
    #[serde(default)]
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    city: String,
}

/// `get_weather(city)` backed by `OpenWeatherMap`
pub struct WeatherTool {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl WeatherTool {
    /// Create the tool; calls fail until an API key is configured
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the tool at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch the current weather for `city`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if the key is missing or the upstream call fails
    pub async fn current(&self, city: &str) -> Result<WeatherReport> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Tool("WEATHER_API_KEY is not configured".to_string()))?;

        tracing::debug!(city, "fetching weather");

        let response = self
            .client
            .get(format!("{}/weather", self.base_url))
            .query(&[("q", city), ("appid", api_key), ("units", "metric")])
            .send()
            .await
            .map_err(|e| Error::Tool(format!("weather request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "weather API error");
            return Err(Error::Tool(format!("weather API error {status}: {body}")));
        }

        let raw: OwmResponse = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("invalid weather response: {e}")))?;

        Ok(report_from(raw))
    }
}

fn report_from(raw: OwmResponse) -> WeatherReport {
    WeatherReport {
        city: raw.name,
        temperature: raw.main.temp,
        condition: raw
            .weather
            .into_iter()
            .next()
            .map(|c| c.description)
            .unwrap_or_default(),
        humidity: raw.main.humidity,
        wind_speed: raw.wind.speed,
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Get the current weather forecast for a specific city".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "city": {
                        "type": "string",
                        "description": "The city to get weather for"
                    }
                },
                "required": ["city"]
            }),
        }
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value> {
        let args: WeatherArgs = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("invalid arguments: {e}")))?;

        let report = self.current(&args.city).await?;
        Ok(serde_json::to_value(report)?)
    }
}
