use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Discovery tuning (per candidate IP and per wave).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub per_ip_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_waves: u32,
    pub wave_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            per_ip_timeout_ms: 1500,
            max_retries: 3,
            retry_delay_ms: 300,
            max_waves: 3,
            wave_delay_ms: 1000,
        }
    }
}

impl ScanConfig {
    pub fn per_ip_timeout(&self) -> Duration {
        Duration::from_millis(self.per_ip_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn wave_delay(&self) -> Duration {
        Duration::from_millis(self.wave_delay_ms)
    }
}

/// Session and event-source tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Event-channel read attempts; a timeout means "no event yet".
    pub event_recv_timeout_s: u64,
    /// Command-channel reads during a data phase (downloads).
    pub command_timeout_s: u64,
    /// Command-channel reads for control operations.
    pub control_timeout_s: u64,
    pub poll_interval_min_ms: u64,
    pub poll_interval_max_ms: u64,
    pub poll_interval_step_ms: u64,
    pub sony_in_memory_max_wait_s: u64,
    pub sony_gate_poll_interval_ms: u64,
    pub sony_signature_polls: u32,
    pub sony_signature_poll_interval_ms: u64,
    pub transaction_reserve_block: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_recv_timeout_s: 30,
            command_timeout_s: 60,
            control_timeout_s: 10,
            poll_interval_min_ms: 50,
            poll_interval_max_ms: 200,
            poll_interval_step_ms: 50,
            sony_in_memory_max_wait_s: 35,
            sony_gate_poll_interval_ms: 100,
            sony_signature_polls: 20,
            sony_signature_poll_interval_ms: 150,
            transaction_reserve_block: 32,
        }
    }
}

impl SessionConfig {
    pub fn event_recv_timeout(&self) -> Duration {
        Duration::from_secs(self.event_recv_timeout_s)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_s)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_s)
    }

    pub fn sony_in_memory_max_wait(&self) -> Duration {
        Duration::from_secs(self.sony_in_memory_max_wait_s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl CoreConfig {
    /// Load from a JSON file, falling back to defaults when absent.
    pub fn load(path: &str) -> Result<Self> {
        if let Ok(config_str) = fs::read_to_string(path) {
            let config: CoreConfig = serde_json::from_str(&config_str)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            return Ok(config);
        }

        tracing::warn!("{} not found, using default configuration", path);
        Ok(CoreConfig::default())
    }
}
