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


//! Agent orchestrator: the single consumer of every external event.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actuation::ActuationRelay;
use crate::device::{DeviceCache, DeviceLifecycleEvent, DeviceNotification, LifecycleEventType};
use crate::dispatch::DataBroker;
use crate::drop_reason::DropReason;
use crate::observability::{events, fields};
use crate::resolution::{IdResolver, MessageContext};
use crate::transport::DeviceTransport;
use crate::translation::{FilterPolicy, TranslationPipeline};

const COMPONENT: &str = "agent";
const TENANT_META_KEY: &str = "service";

/// A discrete external event entering the agent.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    /// Telemetry published by a device.
    Inbound { topic: String, payload: Vec<u8> },
    /// A device-manager record; `tenant` names the consumer it arrived on.
    DeviceNotification {
        tenant: Option<String>,
        payload: Vec<u8>,
    },
}

pub struct Agent {
    pipeline: TranslationPipeline,
    devices: DeviceCache,
    resolver: IdResolver,
    broker: Arc<dyn DataBroker>,
    actuation: ActuationRelay,
}

impl Agent {
    pub fn new(
        devices: DeviceCache,
        resolver: IdResolver,
        filter_policy: FilterPolicy,
        broker: Arc<dyn DataBroker>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Self {
        Self {
            pipeline: TranslationPipeline::new(resolver.clone(), devices.clone(), filter_policy),
            actuation: ActuationRelay::new(devices.clone(), transport),
            devices,
            resolver,
            broker,
        }
    }

    pub fn devices(&self) -> &DeviceCache {
        &self.devices
    }

    pub fn resolver(&self) -> &IdResolver {
        &self.resolver
    }

    /// Processes one event to completion. Failures are logged and absorbed.
    pub fn handle_event(&self, event: AgentEvent) {
        let _ = match event {
            AgentEvent::Inbound { topic, payload } => self.handle_inbound(&topic, &payload),
            AgentEvent::DeviceNotification { tenant, payload } => {
                self.handle_notification(tenant.as_deref(), &payload)
            }
        };
    }

    /// Runs inbound telemetry through the pipeline and hands the result to the sink.
    pub fn handle_inbound(&self, topic: &str, payload: &[u8]) -> Result<(), DropReason> {
        // The topic doubles as format key.
        let update = self
            .pipeline
            .handle_inbound(topic, payload, MessageContext { topic })?;

        debug!(
            event = events::INBOUND_DISPATCH,
            component = COMPONENT,
            topic,
            tenant = update.tenant.as_str(),
            device_id = update.device_id.as_str(),
            attributes = update.attributes.len(),
            "sending device update"
        );
        self.broker.update_data(update);
        Ok(())
    }

    /// Applies a lifecycle record to the caches, or relays an actuation request.
    pub fn handle_notification(&self, tenant: Option<&str>, payload: &[u8]) -> Result<(), DropReason> {
        let notification = match DeviceNotification::from_slice(payload) {
            Ok(notification) => notification,
            Err(err) => {
                debug!(
                    event = events::NOTIFICATION_DROP,
                    component = COMPONENT,
                    tenant = fields::format_optional(tenant),
                    reason = DropReason::UnknownNotification.as_str(),
                    err = %err,
                    payload = %fields::format_payload_preview(payload),
                    "dropping device-manager record"
                );
                return Err(DropReason::UnknownNotification);
            }
        };

        match notification {
            DeviceNotification::Lifecycle(mut event) => {
                fill_tenant(&mut event, tenant);
                debug!(
                    event = events::NOTIFICATION_RECEIVE,
                    component = COMPONENT,
                    tenant = fields::format_optional(event.tenant()),
                    device_id = event.device_id.as_str(),
                    kind = ?event.event_type,
                    "device lifecycle event"
                );
                self.apply_lifecycle_event(&event);
                Ok(())
            }
            DeviceNotification::Actuate(mut request) => {
                if request.tenant().is_none() {
                    if let Some(tenant) = tenant {
                        request
                            .meta
                            .insert(TENANT_META_KEY.to_string(), Value::from(tenant));
                    }
                }
                self.actuation.relay(&request).map(drop)
            }
        }
    }

    // Readers never see a resolver entry whose device is missing from the cache.
    fn apply_lifecycle_event(&self, event: &DeviceLifecycleEvent) {
        match event.event_type {
            LifecycleEventType::Created | LifecycleEventType::Updated => {
                self.devices.apply_lifecycle_event(event);
                self.resolver.apply_lifecycle_event(event);
            }
            LifecycleEventType::Removed => {
                self.resolver.apply_lifecycle_event(event);
                self.devices.apply_lifecycle_event(event);
            }
        }
    }

    /// Consumes events until the channel closes or `shutdown` fires.
    pub async fn run(&self, mut receiver: mpsc::Receiver<AgentEvent>, shutdown: CancellationToken) {
        info!(event = events::AGENT_STARTED, component = COMPONENT, "agent running");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = receiver.recv() => event,
            };
            match event {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
        info!(event = events::AGENT_STOPPED, component = COMPONENT, "agent stopped");
    }
}

fn fill_tenant(event: &mut DeviceLifecycleEvent, tenant: Option<&str>) {
    if event.tenant().is_some() {
        return;
    }
    if let Some(tenant) = tenant {
        event
            .meta
            .insert(TENANT_META_KEY.to_string(), Value::from(tenant));
    }
}
