//! Kernel configuration
//!
//! Loaded from JSON; every field has a default so a partial document (or
//! `{}`) is valid.

use super::error::{KResult, KernelError};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Tunables read once at boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Path opened three times for a new process's stdio
    pub console_path: String,
    /// Initial descriptor-table capacity of an ordinary process
    pub fd_table_capacity: usize,
    /// Descriptors at or past this value are never assigned
    pub fd_limit: usize,
    /// Initial process-table capacity
    pub proc_table_capacity: usize,
    /// Pids at or past this value are never assigned
    pub pid_limit: usize,
    /// Permission bits passed to the file system on open
    pub default_file_mode: u32,
    /// One of off, error, warn, info, debug, trace
    pub log_level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            console_path: "con:".to_string(),
            fd_table_capacity: 4,
            fd_limit: 128,
            proc_table_capacity: 4,
            pid_limit: 256,
            default_file_mode: 0o664,
            log_level: "info".to_string(),
        }
    }
}

impl KernelConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> KResult<Self> {
        let config: KernelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> KResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> KResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> KResult<()> {
        if self.console_path.is_empty() {
            return Err(KernelError::Config("console_path is empty".into()));
        }
        // stdio lives in slots 0..3
        if self.fd_table_capacity < 3 {
            return Err(KernelError::Config(format!(
                "fd_table_capacity {} cannot hold stdio",
                self.fd_table_capacity
            )));
        }
        if self.fd_limit < self.fd_table_capacity {
            return Err(KernelError::Config(format!(
                "fd_limit {} is below fd_table_capacity {}",
                self.fd_limit, self.fd_table_capacity
            )));
        }
        // slot 0 is never used, slot 1 is the kernel process
        if self.proc_table_capacity < 2 {
            return Err(KernelError::Config(format!(
                "proc_table_capacity {} cannot hold the kernel process",
                self.proc_table_capacity
            )));
        }
        if self.pid_limit < self.proc_table_capacity {
            return Err(KernelError::Config(format!(
                "pid_limit {} is below proc_table_capacity {}",
                self.pid_limit, self.proc_table_capacity
            )));
        }
        if self.pid_limit > u32::MAX as usize || self.fd_limit > u32::MAX as usize {
            return Err(KernelError::Config("limits must fit in 32 bits".into()));
        }
        self.parse_log_level()?;
        Ok(())
    }

    /// The configured log level; `Info` if it does not parse
    pub fn log_level(&self) -> LevelFilter {
        self.parse_log_level().unwrap_or(LevelFilter::Info)
    }

    fn parse_log_level(&self) -> KResult<LevelFilter> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| KernelError::Config(format!("unknown log level '{}'", self.log_level)))
    }
}
