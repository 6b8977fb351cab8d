//! `getCityTime`: current wall-clock time in an IANA time zone.

use chrono::Utc;
use chrono_tz::Tz;
use rmcp::model::JsonObject;
use serde_json::json;

use super::registry::{ToolContext, ToolFuture, ToolHandler};
use crate::error::ToolError;

/// Timestamp layout of the tool output; `%Z` is the zone abbreviation.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Format the current time in `zone_id`.
pub fn current_time_in(zone_id: &str) -> Result<String, ToolError> {
    let zone_id = zone_id.trim();
    let zone: Tz = zone_id
        .parse()
        .map_err(|_| ToolError::InvalidArguments(format!("unknown time zone id `{}`", zone_id)))?;
    Ok(Utc::now().with_timezone(&zone).format(TIME_FORMAT).to_string())
}

pub struct CityTimeTool;

impl CityTimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CityTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolHandler for CityTimeTool {
    fn name(&self) -> &str {
        "getCityTime"
    }

    fn description(&self) -> &str {
        "Get the time of a specified city."
    }

    fn input_schema(&self) -> JsonObject {
        let schema = json!({
            "type": "object",
            "properties": {
                "timeZoneId": {
                    "type": "string",
                    "description": "Time zone id, such as Asia/Shanghai"
                }
            },
            "required": ["timeZoneId"]
        });
        schema.as_object().cloned().unwrap_or_default()
    }

    fn execute(&self, args: JsonObject, _ctx: &ToolContext) -> ToolFuture<'_> {
        Box::pin(async move {
            let zone_id = args
                .get("timeZoneId")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .ok_or_else(|| ToolError::InvalidArguments("timeZoneId is required".to_string()))?;
            let now = current_time_in(zone_id)?;
            Ok(format!(
                "The current time zone is {} and the current time is {}",
                zone_id, now
            ))
        })
    }
}
