//! Simulated Station Source
//!
//! Synthesizes plausible observations by perturbing fixed baselines with
//! bounded noise. Lets the whole pipeline run without a live source.

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::{Observation, StationSource};
use crate::error::Result;

const BASE_TEMPERATURE: f64 = 20.0;
const TEMPERATURE_NOISE: f64 = 5.0;
const BASE_HUMIDITY: i32 = 60;
const HUMIDITY_NOISE: i32 = 15;
const BASE_PRESSURE: f64 = 1013.0;
const PRESSURE_NOISE: f64 = 8.0;
const WIND_RANGE: std::ops::RangeInclusive<i32> = 2..=4;
const MAX_RAIN: f64 = 0.1;

/// Generates synthetic observations for one station
pub struct SimulatedSource {
    station: String,
    rng: Mutex<StdRng>,
}

impl SimulatedSource {
    /// Create a source seeded from OS entropy
    pub fn new(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a reproducible source
    pub fn with_seed(station: impl Into<String>, seed: u64) -> Self {
        Self {
            station: station.into(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn generate(&self) -> Observation {
        let mut rng = self.rng.lock();

        let temperature = BASE_TEMPERATURE + rng.gen_range(-TEMPERATURE_NOISE..=TEMPERATURE_NOISE);
        let humidity = BASE_HUMIDITY + rng.gen_range(-HUMIDITY_NOISE..=HUMIDITY_NOISE);
        let pressure = BASE_PRESSURE + rng.gen_range(-PRESSURE_NOISE..=PRESSURE_NOISE);
        let wind_speed = rng.gen_range(WIND_RANGE);
        let precipitation = rng.gen_range(0.0..=MAX_RAIN);

        Observation {
            station: self.station.clone(),
            timestamp: Utc::now().trunc_subsecs(0),
            temperature: round_to(temperature, 1),
            relative_humidity: humidity.clamp(0, 100),
            pressure: round_to(pressure, 1),
            wind_speed,
            precipitation: round_to(precipitation, 2),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

impl std::fmt::Debug for SimulatedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSource")
            .field("station", &self.station)
            .finish()
    }
}

#[async_trait]
impl StationSource for SimulatedSource {
    async fn acquire(&self) -> Result<Observation> {
        Ok(self.generate())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
