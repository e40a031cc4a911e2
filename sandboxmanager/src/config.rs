/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Sandbox manager configuration loaded from a YAML file.

use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

// Global config instance
static SANDBOX_CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FunctionConfig {
    #[serde(default = "default_function_name")]
    pub name: String,
    #[serde(default = "default_function_version")]
    pub version: String,
    #[serde(default = "default_handler")]
    pub handler: String,
    #[serde(default)]
    pub arn: String,
    #[serde(default = "default_memory_size_mb")]
    pub memory_size_mb: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty function config deserializes")
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SandboxConfig {
    #[serde(default = "default_host_ip")]
    pub host_ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub function: FunctionConfig,
    /// Names of external agent processes expected to register during init.
    #[serde(default)]
    pub external_agents: Vec<String>,
    #[serde(default = "default_invoke_reset_timeout_ms")]
    pub invoke_reset_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: i64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty sandbox config deserializes")
    }
}

fn default_host_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_function_name() -> String {
    "function".to_string()
}

fn default_function_version() -> String {
    "$LATEST".to_string()
}

fn default_handler() -> String {
    "handler".to_string()
}

fn default_memory_size_mb() -> u32 {
    3008
}

fn default_timeout_ms() -> i64 {
    300_000
}

fn default_invoke_reset_timeout_ms() -> u64 {
    300_000
}

fn default_shutdown_timeout_ms() -> i64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// The ARN reported on invocations, derived from the function name
    /// unless overridden.
    pub fn function_arn(&self) -> String {
        if !self.sandbox.function.arn.is_empty() {
            return self.sandbox.function.arn.clone();
        }
        format!(
            "arn:aws:lambda:us-east-1:012345678912:function:{}",
            self.sandbox.function.name
        )
    }

    // Get or initialize the global config
    pub fn get() -> &'static Config {
        SANDBOX_CONFIG.get().unwrap_or_else(|| {
            let default_config = Config::default();
            SANDBOX_CONFIG.set(default_config.clone()).unwrap_or(());
            SANDBOX_CONFIG.get().unwrap()
        })
    }

    // Set the global config
    pub fn set_global(config: Config) {
        let _ = SANDBOX_CONFIG.set(config);
    }
}

//UNIT TEST CASES
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sandbox.host_ip, "0.0.0.0");
        assert_eq!(config.sandbox.port, 8080);
        assert_eq!(config.sandbox.function.version, "$LATEST");
        assert_eq!(config.sandbox.function.memory_size_mb, 3008);
        assert!(config.sandbox.external_agents.is_empty());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
sandbox:
  port: 9001
  function:
    name: imgresize
    handler: index.resize
  external_agents:
    - watchdog
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sandbox.port, 9001);
        assert_eq!(config.sandbox.function.name, "imgresize");
        assert_eq!(config.sandbox.function.handler, "index.resize");
        assert_eq!(config.sandbox.external_agents, vec!["watchdog".to_owned()]);
        // Untouched fields keep their defaults.
        assert_eq!(config.sandbox.host_ip, "0.0.0.0");
    }

    #[test]
    fn test_function_arn_derived_from_name() {
        let yaml = r#"
sandbox:
  function:
    name: imgresize
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.function_arn(),
            "arn:aws:lambda:us-east-1:012345678912:function:imgresize"
        );
    }

    #[test]
    fn test_function_arn_override() {
        let yaml = r#"
sandbox:
  function:
    arn: "arn:aws:lambda:eu-west-1:000000000000:function:custom"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.function_arn(),
            "arn:aws:lambda:eu-west-1:000000000000:function:custom"
        );
    }
}
