//! Simulated drivers for running the agent without attached hardware.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::*;

/// Environmental sensor producing a slow random walk around room values.
pub struct SimulatedEnvSensor {
    rng: StdRng,
    last: EnvReading,
}

impl SimulatedEnvSensor {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            last: EnvReading {
                temperature: 25.0,
                humidity: 50.0,
                pressure: 1013.25,
            },
        }
    }
}

impl Default for SimulatedEnvSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Release for SimulatedEnvSensor {
    fn name(&self) -> &str {
        "simulated environmental sensor"
    }
}

impl EnvSensor for SimulatedEnvSensor {
    fn read(&mut self) -> Result<EnvReading, DriverError> {
        let reading = EnvReading {
            temperature: round_to(self.last.temperature + self.rng.gen_range(-0.5..0.5), 1),
            humidity: round_to(
                (self.last.humidity + self.rng.gen_range(-1.0..1.0)).clamp(0.0, 100.0),
                1,
            ),
            pressure: round_to(1013.25 + self.rng.gen_range(-5.0..5.0), 2),
        };
        self.last = reading;
        Ok(reading)
    }
}

/// Security sensor firing each detection with a fixed probability.
pub struct SimulatedSecuritySensor {
    rng: StdRng,
    motion_probability: f64,
    smoke_probability: f64,
    sound_probability: f64,
}

impl SimulatedSecuritySensor {
    pub fn new(motion_probability: f64, smoke_probability: f64, sound_probability: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            motion_probability,
            smoke_probability,
            sound_probability,
        }
    }
}

impl Default for SimulatedSecuritySensor {
    fn default() -> Self {
        Self::new(0.05, 0.001, 0.0)
    }
}

impl Release for SimulatedSecuritySensor {
    fn name(&self) -> &str {
        "simulated security sensor"
    }
}

impl SecuritySensor for SimulatedSecuritySensor {
    fn read(&mut self) -> Result<Detections, DriverError> {
        Ok(Detections {
            motion: self.rng.gen_bool(self.motion_probability.clamp(0.0, 1.0)),
            smoke: self.rng.gen_bool(self.smoke_probability.clamp(0.0, 1.0)),
            sound: self.rng.gen_bool(self.sound_probability.clamp(0.0, 1.0)),
        })
    }
}

/// Relay outputs kept in memory. All start OFF.
pub struct RelayBank {
    states: HashMap<Device, Switch>,
}

impl RelayBank {
    pub fn new() -> Self {
        let states = Device::ALL.iter().map(|d| (*d, Switch::Off)).collect();
        for device in Device::ALL {
            tracing::info!("Device {} initialized. Initial state: OFF", device);
        }
        Self { states }
    }
}

impl Default for RelayBank {
    fn default() -> Self {
        Self::new()
    }
}

impl Release for RelayBank {
    fn name(&self) -> &str {
        "relay bank"
    }

    fn release(&mut self) -> Result<(), DriverError> {
        for state in self.states.values_mut() {
            *state = Switch::Off;
        }
        Ok(())
    }
}

impl Actuators for RelayBank {
    fn set(&mut self, device: Device, state: Switch) -> Result<(), DriverError> {
        self.states.insert(device, state);
        tracing::info!("Actuator {} turned {}.", device, state);
        Ok(())
    }

    fn status(&self, device: Device) -> Switch {
        self.states.get(&device).copied().unwrap_or(Switch::Off)
    }
}

/// Camera that writes an empty placeholder file per capture.
#[derive(Default)]
pub struct SimulatedCamera {
    captures: u64,
}

impl Release for SimulatedCamera {
    fn name(&self) -> &str {
        "simulated camera"
    }

    fn release(&mut self) -> Result<(), DriverError> {
        tracing::debug!("Camera stopped after {} captures", self.captures);
        Ok(())
    }
}

impl Camera for SimulatedCamera {
    fn capture(&mut self, path: &Path) -> Result<(), DriverError> {
        if path.file_name().is_none() {
            return Err(DriverError::Camera(format!("invalid image path {}", path.display())));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, [])?;
        self.captures += 1;
        Ok(())
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_bank_starts_off_and_releases_off() {
        let mut bank = RelayBank::new();
        assert!(Device::ALL.iter().all(|d| bank.status(*d) == Switch::Off));

        bank.set(Device::Fan, Switch::On).unwrap();
        assert_eq!(bank.status(Device::Fan), Switch::On);

        bank.release().unwrap();
        assert_eq!(bank.status(Device::Fan), Switch::Off);
    }

    #[test]
    fn test_certain_sensor_always_detects() {
        let mut sensor = SimulatedSecuritySensor::new(1.0, 0.0, 0.0);
        let d = sensor.read().unwrap();
        assert!(d.motion);
        assert!(!d.smoke);
    }

    #[test]
    fn test_env_readings_stay_plausible() {
        let mut sensor = SimulatedEnvSensor::new();
        for _ in 0..50 {
            let r = sensor.read().unwrap();
            assert!((0.0..=100.0).contains(&r.humidity));
            assert!((1008.0..=1018.5).contains(&r.pressure));
        }
    }

    #[test]
    fn test_camera_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots").join("a.jpg");
        let mut cam = SimulatedCamera::default();
        cam.capture(&path).unwrap();
        assert!(path.exists());
        assert!(cam.capture(Path::new("/")).is_err());
    }
}
