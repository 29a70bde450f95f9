/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/


use iot_agent::{
    FilterPolicy, MqttTransportOptions, TlsMaterial, DEFAULT_DEVICE_DATA_SUBJECT,
    DEFAULT_DEVICE_SUBJECT,
};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_TOKEN_USER: &str = "iotagent";
// The client only speaks MQTT 3.1.1 (protocol name "MQTT", level 4).
const SUPPORTED_PROTOCOL_ID: &str = "MQTT";
const SUPPORTED_PROTOCOL_VERSION: u8 = 4;

#[derive(Debug)]
pub enum ConfigurationError {
    Read { path: PathBuf, source: std::io::Error },
    Parse(json5::Error),
    MissingSection(&'static str),
    MissingTls,
    Certificate { path: PathBuf, source: std::io::Error },
    UnsupportedProtocolVersion(u8),
    UnsupportedProtocolId(String),
    FeatureDisabled { required_by: &'static str, feature: &'static str },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::Read { path, source } => {
                write!(f, "unable to read config file {}: {source}", path.display())
            }
            ConfigurationError::Parse(err) => write!(f, "unable to parse config file: {err}"),
            ConfigurationError::MissingSection(section) => {
                write!(f, "configuration section `{section}` is required")
            }
            ConfigurationError::MissingTls => {
                write!(f, "`mqtt.secure` is set but no `mqtt.tls` block is configured")
            }
            ConfigurationError::Certificate { path, source } => {
                write!(f, "unable to read certificate {}: {source}", path.display())
            }
            ConfigurationError::UnsupportedProtocolVersion(version) => {
                write!(f, "unsupported MQTT protocol version {version}")
            }
            ConfigurationError::UnsupportedProtocolId(id) => {
                write!(f, "unsupported MQTT protocol id `{id}`")
            }
            ConfigurationError::FeatureDisabled {
                required_by,
                feature,
            } => write!(
                f,
                "{required_by} requires the binary to be built with the `{feature}` feature"
            ),
        }
    }
}

impl Error for ConfigurationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigurationError::Read { source, .. } | ConfigurationError::Certificate { source, .. } => {
                Some(source)
            }
            ConfigurationError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub(crate) mqtt: MqttConfig,
    pub(crate) broker: BrokerConfig,
    #[serde(default)]
    pub(crate) device_manager: Option<DeviceManagerConfig>,
    #[serde(default)]
    pub(crate) translation: TranslationConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub(crate) keep_alive_secs: u64,
    #[serde(default)]
    pub(crate) protocol_id: Option<String>,
    #[serde(default)]
    pub(crate) protocol_version: Option<u8>,
    #[serde(default)]
    pub(crate) secure: bool,
    #[serde(default)]
    pub(crate) tls: Option<TlsConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub(crate) key: PathBuf,
    pub(crate) cert: PathBuf,
    #[serde(default)]
    pub(crate) ca: Vec<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum BrokerConfig {
    #[serde(alias = "orion")]
    ContextState {
        host: String,
        #[serde(default)]
        service_path: Option<String>,
    },
    #[serde(alias = "kafka")]
    LogBased {
        brokers: Vec<String>,
        group_id: String,
        #[serde(default = "default_device_data_subject")]
        device_data_subject: String,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct DeviceManagerConfig {
    pub(crate) brokers: Vec<String>,
    pub(crate) group_id: String,
    pub(crate) registry_url: String,
    pub(crate) tenants_url: String,
    pub(crate) tenancy_topic: String,
    #[serde(default = "default_device_subject")]
    pub(crate) device_subject: String,
    #[serde(default = "default_retry_delay_ms")]
    pub(crate) retry_delay_ms: u64,
    #[serde(default = "default_token_user")]
    pub(crate) token_user: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct TranslationConfig {
    #[serde(default)]
    pub(crate) filter_policy: FilterPolicy,
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_token_user() -> String {
    DEFAULT_TOKEN_USER.to_string()
}

fn default_device_subject() -> String {
    DEFAULT_DEVICE_SUBJECT.to_string()
}

fn default_device_data_subject() -> String {
    DEFAULT_DEVICE_DATA_SUBJECT.to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json5(&contents)
    }

    pub fn from_json5(contents: &str) -> Result<Self, ConfigurationError> {
        let config: Config = json5::from_str(contents).map_err(ConfigurationError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.mqtt.validate()?;
        if matches!(self.broker, BrokerConfig::LogBased { .. }) && self.device_manager.is_none() {
            return Err(ConfigurationError::MissingSection("device_manager"));
        }
        Ok(())
    }

    /// Fixed delay between lifecycle retries.
    pub fn retry_delay(&self) -> Duration {
        let millis = self
            .device_manager
            .as_ref()
            .map_or(DEFAULT_RETRY_DELAY_MS, |dm| dm.retry_delay_ms);
        Duration::from_millis(millis)
    }
}

impl MqttConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        // Accepted only when they match what the client sends on CONNECT.
        if let Some(version) = self.protocol_version {
            if version != SUPPORTED_PROTOCOL_VERSION {
                return Err(ConfigurationError::UnsupportedProtocolVersion(version));
            }
        }
        if let Some(protocol_id) = &self.protocol_id {
            if protocol_id != SUPPORTED_PROTOCOL_ID {
                return Err(ConfigurationError::UnsupportedProtocolId(protocol_id.clone()));
            }
        }
        if self.secure && self.tls.is_none() {
            return Err(ConfigurationError::MissingTls);
        }
        Ok(())
    }

    /// Transport options, reading TLS material from disk when `secure` is set.
    pub fn transport_options(&self, retry_delay: Duration) -> Result<MqttTransportOptions, ConfigurationError> {
        let mut options = MqttTransportOptions::new(self.host.clone(), self.port);
        options.client_id = self.client_id.clone();
        options.keep_alive = Duration::from_secs(self.keep_alive_secs);
        options.retry_delay = retry_delay;

        if self.secure {
            let tls = self.tls.as_ref().ok_or(ConfigurationError::MissingTls)?;
            options.tls = Some(tls.load()?);
        }
        Ok(options)
    }
}

impl TlsConfig {
    fn load(&self) -> Result<TlsMaterial, ConfigurationError> {
        let mut ca = Vec::new();
        for path in &self.ca {
            ca.extend(read_certificate(path)?);
            ca.push(b'\n');
        }
        let cert = read_certificate(&self.cert)?;
        let key = read_certificate(&self.key)?;
        Ok(TlsMaterial {
            ca,
            client_auth: Some((cert, key)),
        })
    }
}

fn read_certificate(path: &Path) -> Result<Vec<u8>, ConfigurationError> {
    std::fs::read(path).map_err(|source| ConfigurationError::Certificate {
        path: path.to_path_buf(),
        source,
    })
}
