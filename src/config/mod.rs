//! Configuration management for the display session
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers the slot layout, every bounded wait the
//! session performs, and general service settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::registry::{SlotLayout, MAX_DISPLAYS};

/// Main configuration struct containing all session settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionConfig {
    /// Slot layout and display limits
    #[serde(default)]
    pub display: DisplayConfig,

    /// Bounds of every wait the session performs
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// General service settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Slot layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// Builtin panels, including the primary
    pub builtin: usize,

    /// Pluggable (external) outputs
    pub pluggable: usize,

    /// Virtual display slots
    pub virtual_displays: usize,

    /// Virtual displays that may exist at once
    pub max_virtual_displays: u32,

    /// Apply builtin power changes in the background through a dummy alias
    pub async_power_mode: bool,
}

/// Wait bounds, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// How long a hotplugged display may take to report its capabilities
    pub external_connection_ms: u64,

    /// Interval between capability polls while a display enumerates
    pub enumeration_poll_ms: u64,

    /// One round of waiting for the VM to release a panel
    pub vm_release_interval_ms: u64,

    pub vm_release_retries: u32,

    /// One round of waiting for a commit to land
    pub commit_done_interval_ms: u64,

    /// Draw cycles to wait for a commit before giving up
    pub commit_done_retries: u32,

    /// How long hotplug delivery waits for a client to register
    pub client_hotplug_wait_ms: u64,

    /// How long a caller waits on an in-flight power transition
    pub power_transition_ms: u64,

    /// How long one capture may stay in flight
    pub cwb_completion_ms: u64,
}

/// General service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,

    /// Idle timeout applied to builtin panels, 0 disables it
    pub idle_timeout_ms: u32,

    /// Run against the in-process headless core instead of hardware
    pub null_display_mode: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            builtin: 1,
            pluggable: 1,
            virtual_displays: 1,
            max_virtual_displays: 1,
            async_power_mode: true,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            external_connection_ms: 500,
            enumeration_poll_ms: 20,
            vm_release_interval_ms: 100,
            vm_release_retries: 3,
            commit_done_interval_ms: 100,
            commit_done_retries: 3,
            client_hotplug_wait_ms: 5000,
            power_transition_ms: 1000,
            cwb_completion_ms: 1000,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug: false,
            idle_timeout_ms: 0,
            null_display_mode: true,
        }
    }
}

impl DisplayConfig {
    pub fn layout(&self) -> SlotLayout {
        SlotLayout {
            builtin: self.builtin,
            pluggable: self.pluggable,
            virtual_displays: self.virtual_displays,
            async_power: self.async_power_mode,
        }
    }
}

impl TimeoutConfig {
    pub fn external_connection(&self) -> Duration {
        Duration::from_millis(self.external_connection_ms)
    }

    pub fn enumeration_poll(&self) -> Duration {
        Duration::from_millis(self.enumeration_poll_ms)
    }

    pub fn vm_release_interval(&self) -> Duration {
        Duration::from_millis(self.vm_release_interval_ms)
    }

    pub fn commit_done_interval(&self) -> Duration {
        Duration::from_millis(self.commit_done_interval_ms)
    }

    pub fn client_hotplug_wait(&self) -> Duration {
        Duration::from_millis(self.client_hotplug_wait_ms)
    }

    pub fn power_transition(&self) -> Duration {
        Duration::from_millis(self.power_transition_ms)
    }

    pub fn cwb_completion(&self) -> Duration {
        Duration::from_millis(self.cwb_completion_ms)
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let rest = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: SessionConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let layout = self.display.layout();
        if layout.builtin == 0 {
            anyhow::bail!("Invalid display layout: at least one builtin display is required");
        }
        if layout.total() > MAX_DISPLAYS {
            anyhow::bail!(
                "Invalid display layout: {} slots exceed the maximum of {}",
                layout.total(),
                MAX_DISPLAYS
            );
        }
        if self.display.max_virtual_displays as usize > self.display.virtual_displays {
            anyhow::bail!(
                "Invalid max_virtual_displays: {} exceeds the {} virtual slot(s)",
                self.display.max_virtual_displays,
                self.display.virtual_displays
            );
        }

        let t = &self.timeouts;
        if t.vm_release_retries == 0 || t.commit_done_retries == 0 {
            anyhow::bail!("Invalid retry count: must be at least 1");
        }
        if t.vm_release_interval_ms == 0
            || t.commit_done_interval_ms == 0
            || t.enumeration_poll_ms == 0
        {
            anyhow::bail!("Invalid wait interval: must be greater than 0");
        }
        if t.enumeration_poll_ms > t.external_connection_ms {
            anyhow::bail!("Invalid enumeration_poll_ms: longer than external_connection_ms");
        }
        if t.cwb_completion_ms == 0 || t.power_transition_ms == 0 {
            anyhow::bail!("Invalid timeout: must be greater than 0");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Non-default sections from the partial config override this config
    pub fn merge_partial(mut self, partial: SessionConfig) -> Self {
        let default_config = SessionConfig::default();

        if partial.display != default_config.display {
            self.display = partial.display;
        }
        if partial.timeouts != default_config.timeouts {
            self.timeouts = partial.timeouts;
        }
        if partial.general != default_config.general {
            self.general = partial.general;
        }

        self
    }
}

#[cfg(test)]
mod tests;

#[cfg(test)]
mod property_tests;
