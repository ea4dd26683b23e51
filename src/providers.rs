//! External signal providers.
//!
//! Weather and demand conditions influence contextual score adjustment but
//! are not real integrations here; the engine consumes these traits and an
//! integrator supplies live implementations. The static stubs below return
//! fixed values.

use crate::error::Result;
use crate::models::{DemandLevel, WeatherKind};
use async_trait::async_trait;

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_weather(&self) -> Result<WeatherKind>;
}

#[async_trait]
pub trait DemandProvider: Send + Sync {
    async fn current_demand(&self) -> Result<DemandLevel>;
}

/// Fixed-value weather stub
pub struct StaticWeatherProvider {
    weather: WeatherKind,
}

impl StaticWeatherProvider {
    pub fn new(weather: WeatherKind) -> Self {
        Self { weather }
    }
}

impl Default for StaticWeatherProvider {
    fn default() -> Self {
        Self::new(WeatherKind::Sunny)
    }
}

#[async_trait]
impl WeatherProvider for StaticWeatherProvider {
    async fn current_weather(&self) -> Result<WeatherKind> {
        Ok(self.weather)
    }
}

/// Fixed-value demand stub
pub struct StaticDemandProvider {
    demand: DemandLevel,
}

impl StaticDemandProvider {
    pub fn new(demand: DemandLevel) -> Self {
        Self { demand }
    }
}

impl Default for StaticDemandProvider {
    fn default() -> Self {
        Self::new(DemandLevel::Normal)
    }
}

#[async_trait]
impl DemandProvider for StaticDemandProvider {
    async fn current_demand(&self) -> Result<DemandLevel> {
        Ok(self.demand)
    }
}
