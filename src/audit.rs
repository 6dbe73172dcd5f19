//! Append-only JSON-lines audit trail.
//!
//! Separate from the sync-tracked store: raw environmental readings,
//! security events with a detection, and actuator changes are appended
//! here and never read back by the agent.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::{SecurityEvent, TelemetrySample};
use crate::devices::{Device, Switch};

/// Actuator state change as written to the device log.
#[derive(Debug, Serialize)]
struct DeviceStatus {
    timestamp: DateTime<Utc>,
    device_name: Device,
    status: Switch,
}

struct LogFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn append<T: Serialize>(&self, record: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&line)?;
        file.flush()
    }

    fn sync(&self) -> io::Result<()> {
        let file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.sync_all()
    }
}

/// The three daily audit logs, named `<YYYYMMDD>_<kind>.txt`.
pub struct AuditLog {
    env: LogFile,
    security: LogFile,
    device: LogFile,
}

impl AuditLog {
    /// Open today's logs under `dir`, creating it if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d").to_string();

        let log = Self {
            env: LogFile::open(dir.join(format!("{}_environmental_data.txt", stamp)))?,
            security: LogFile::open(dir.join(format!("{}_security_data.txt", stamp)))?,
            device: LogFile::open(dir.join(format!("{}_device_status.txt", stamp)))?,
        };
        tracing::info!("Logging to files starting with {}_...", stamp);
        Ok(log)
    }

    pub fn append_env(&self, sample: &TelemetrySample) -> io::Result<()> {
        self.env.append(sample)
    }

    pub fn append_security(&self, event: &SecurityEvent) -> io::Result<()> {
        self.security.append(event)
    }

    pub fn append_device(&self, device: Device, status: Switch) -> io::Result<()> {
        self.device.append(&DeviceStatus {
            timestamp: Utc::now(),
            device_name: device,
            status,
        })
    }

    /// Force all three logs to disk.
    pub fn sync_all(&self) -> io::Result<()> {
        for log in [&self.env, &self.security, &self.device] {
            log.sync().map_err(|e| {
                io::Error::new(e.kind(), format!("fsync {}: {}", log.path.display(), e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();

        let sample = TelemetrySample {
            timestamp: Utc::now(),
            temperature: 22.5,
            humidity: 41.0,
            pressure: 1011.0,
        };
        log.append_env(&sample).unwrap();
        log.append_env(&sample).unwrap();
        log.append_device(Device::Light, Switch::On).unwrap();
        log.sync_all().unwrap();

        let env_file = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with("_environmental_data.txt"))
            .unwrap();
        let contents = fs::read_to_string(env_file).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: TelemetrySample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.temperature, 22.5);
    }

    #[test]
    fn test_device_status_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        log.append_device(Device::Buzzer, Switch::Off).unwrap();

        let device_file = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with("_device_status.txt"))
            .unwrap();
        let line = fs::read_to_string(device_file).unwrap();
        assert!(line.contains(r#""device_name":"buzzer""#));
        assert!(line.contains(r#""status":"off""#));
    }
}
