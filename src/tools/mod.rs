//! Tool handlers and the registry that holds them.
//!
//! The registry is shared by the dispatcher (tools offered to the model) and
//! the MCP server (tools offered to MCP clients).

mod registry;
mod time;
mod translate;
mod weather;

pub use registry::{ToolContext, ToolFuture, ToolHandler, ToolRegistry};
pub use time::{CityTimeTool, TIME_FORMAT, current_time_in};
pub use translate::{BAIDU_TRANSLATE_URL, BaiduTranslateTool, TranslateConfig};
pub use weather::{MAX_FORECAST_DAYS, WEATHER_API_BASE, WeatherConfig, WeatherTool};

#[cfg(test)]
pub(crate) use registry::test_support;

use anyhow::Result;

/// Registry with every built-in tool: `getCityTime`, `getWeather`, `baiduTranslate`.
pub fn builtin_registry(weather: WeatherConfig, translate: TranslateConfig) -> Result<ToolRegistry> {
    ToolRegistry::new()
        .register_handler(CityTimeTool::new())?
        .register_handler(WeatherTool::new(weather))?
        .register_handler(BaiduTranslateTool::new(translate))
}
