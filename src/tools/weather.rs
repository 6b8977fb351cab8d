//! `getWeather`: multi-day forecast from weatherapi.com.

use std::time::Duration;

use rmcp::model::JsonObject;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::registry::{ToolContext, ToolFuture, ToolHandler};
use crate::error::ToolError;

pub const WEATHER_API_BASE: &str = "https://api.weatherapi.com/v1";
pub const MAX_FORECAST_DAYS: i64 = 14;

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl WeatherConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: WEATHER_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: Location,
    forecast: Forecast,
}

#[derive(Debug, Deserialize)]
struct Location {
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    forecastday: Vec<ForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ForecastDay {
    date: String,
    day: DaySummary,
}

#[derive(Debug, Deserialize)]
struct DaySummary {
    maxtemp_c: f64,
    mintemp_c: f64,
    #[serde(default)]
    daily_chance_of_rain: Option<f64>,
    condition: Condition,
}

#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: i64,
    message: String,
}

fn summarize(forecast: &ForecastResponse) -> String {
    let loc = &forecast.location;
    let mut place = loc.name.clone();
    for part in [&loc.region, &loc.country] {
        if !part.is_empty() && part != &loc.name {
            place.push_str(", ");
            place.push_str(part);
        }
    }

    let mut out = format!("Weather forecast for {}:", place);
    for day in &forecast.forecast.forecastday {
        out.push_str(&format!(
            "\n{}: {}, {:.1}°C to {:.1}°C",
            day.date, day.day.condition.text, day.day.mintemp_c, day.day.maxtemp_c
        ));
        if let Some(rain) = day.day.daily_chance_of_rain {
            out.push_str(&format!(", {}% chance of rain", rain));
        }
    }
    out
}

pub struct WeatherTool {
    config: WeatherConfig,
    http: reqwest::Client,
}

impl WeatherTool {
    pub fn new(config: WeatherConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    async fn forecast(&self, city: &str, days: i64) -> Result<String, ToolError> {
        let url = format!("{}/forecast.json", self.config.base_url.trim_end_matches('/'));
        debug!("Fetching {}-day forecast for {}", days, city);

        let days = days.to_string();
        let url = reqwest::Url::parse_with_params(
            &url,
            [("key", self.config.api_key.as_str()), ("q", city), ("days", days.as_str())],
        )
        .map_err(|e| ToolError::Execution(format!("invalid weather endpoint: {}", e)))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("weather service unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to read weather response: {}", e)))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| format!("{} (code {})", b.error.message, b.error.code))
                .unwrap_or(body);
            return Err(ToolError::Execution(format!("weather service returned {}: {}", status, reason)));
        }

        let forecast: ForecastResponse = serde_json::from_str(&body)
            .map_err(|e| ToolError::Execution(format!("unexpected weather response: {}", e)))?;
        Ok(summarize(&forecast))
    }
}

impl ToolHandler for WeatherTool {
    fn name(&self) -> &str {
        "getWeather"
    }

    fn description(&self) -> &str {
        "Use api.weather to get weather information."
    }

    fn input_schema(&self) -> JsonObject {
        let schema = json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name"
                },
                "days": {
                    "type": "integer",
                    "description": "Number of days of weather forecast. Value ranges from 1 to 14",
                    "minimum": 1,
                    "maximum": MAX_FORECAST_DAYS
                }
            },
            "required": ["city"]
        });
        schema.as_object().cloned().unwrap_or_default()
    }

    fn execute(&self, args: JsonObject, _ctx: &ToolContext) -> ToolFuture<'_> {
        Box::pin(async move {
            let city = args
                .get("city")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| ToolError::InvalidArguments("city is required".to_string()))?;
            let days = forecast_days(args.get("days"))?;
            if !(1..=MAX_FORECAST_DAYS).contains(&days) {
                return Err(ToolError::InvalidArguments(format!(
                    "days must be between 1 and {}, got {}",
                    MAX_FORECAST_DAYS, days
                )));
            }
            self.forecast(city, days).await
        })
    }
}

/// Read `days`: absent or null means one day, an integral number is taken
/// as is, anything else is rejected.
fn forecast_days(value: Option<&Value>) -> Result<i64, ToolError> {
    let value = match value {
        None | Some(Value::Null) => return Ok(1),
        Some(value) => value,
    };
    if let Some(days) = value.as_i64() {
        return Ok(days);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        _ => Err(ToolError::InvalidArguments(format!(
            "days must be a whole number, got {}",
            value
        ))),
    }
}
