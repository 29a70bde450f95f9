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


//! Subscribe/publish transport toward the devices.

pub(crate) mod mqtt;

use async_trait::async_trait;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

pub use mqtt::{MqttTransport, MqttTransportOptions, TlsMaterial, WILDCARD_TOPIC};

pub const CLIENT_ID_PREFIX: &str = "iotagent-json";

/// `iotagent-json-<random suffix>`.
pub fn random_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}-{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportFault {
    NotStarted,
    Connection(String),
    Publish(String),
    Subscribe(String),
}

impl Display for TransportFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::NotStarted => write!(f, "transport not started"),
            TransportFault::Connection(msg) => write!(f, "transport connection error: {msg}"),
            TransportFault::Publish(msg) => write!(f, "transport publish error: {msg}"),
            TransportFault::Subscribe(msg) => write!(f, "transport subscription error: {msg}"),
        }
    }
}

impl Error for TransportFault {}

/// Outbound half of the device transport.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportFault>;
}
