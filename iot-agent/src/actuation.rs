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


//! Relays actuation requests to the device topic.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::device::{ActuationRequest, DeviceCache, DeviceLifecycleEvent, ACTUATE_TOPIC_LABEL, CONFIGURATION_TYPE};
use crate::drop_reason::DropReason;
use crate::observability::{events, fields};
use crate::transport::DeviceTransport;

const COMPONENT: &str = "actuation";

/// `/{tenant}/{deviceId}/config`.
pub fn default_actuation_topic(tenant: &str, device_id: &str) -> String {
    format!("/{tenant}/{device_id}/config")
}

/// The device's `topic-config` override, or the default scheme.
pub fn actuation_topic(device: &DeviceLifecycleEvent, tenant: &str) -> String {
    device
        .configuration_value(CONFIGURATION_TYPE, ACTUATE_TOPIC_LABEL)
        .map(str::to_string)
        .unwrap_or_else(|| default_actuation_topic(tenant, &device.device_id))
}

#[derive(Clone)]
pub struct ActuationRelay {
    devices: DeviceCache,
    transport: Arc<dyn DeviceTransport>,
}

impl ActuationRelay {
    pub fn new(devices: DeviceCache, transport: Arc<dyn DeviceTransport>) -> Self {
        Self { devices, transport }
    }

    /// Spawns the publication of `request` and returns the chosen topic.
    pub fn relay(&self, request: &ActuationRequest) -> Result<String, DropReason> {
        let Some(device) = self.devices.lookup(&request.device_id) else {
            debug!(
                event = events::NOTIFICATION_DROP,
                component = COMPONENT,
                device_id = request.device_id.as_str(),
                reason = DropReason::UnknownDevice.as_str(),
                "actuation target not in cache"
            );
            return Err(DropReason::UnknownDevice);
        };

        let tenant = request
            .tenant()
            .or_else(|| device.tenant())
            .unwrap_or_default();
        let topic = actuation_topic(&device, tenant);
        let payload = request.payload.to_string().into_bytes();

        debug!(
            event = events::ACTUATION_PUBLISH_ATTEMPT,
            component = COMPONENT,
            tenant = fields::format_optional(Some(tenant).filter(|t| !t.is_empty())),
            device_id = request.device_id.as_str(),
            topic = topic.as_str(),
            "publishing actuation"
        );

        let transport = self.transport.clone();
        let device_id = request.device_id.clone();
        let publish_topic = topic.clone();
        tokio::spawn(async move {
            match transport.publish(&publish_topic, payload).await {
                Ok(()) => debug!(
                    event = events::ACTUATION_PUBLISH_OK,
                    component = COMPONENT,
                    device_id = device_id.as_str(),
                    topic = publish_topic.as_str(),
                    "actuation published"
                ),
                Err(err) => warn!(
                    event = events::ACTUATION_PUBLISH_FAILED,
                    component = COMPONENT,
                    device_id = device_id.as_str(),
                    topic = publish_topic.as_str(),
                    err = %err,
                    "actuation publish failed"
                ),
            }
        });

        Ok(topic)
    }
}
