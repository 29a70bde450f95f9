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


//! # iot-agent
//!
//! `iot-agent` bridges device telemetry published over MQTT to a context-state HTTP
//! service or to a log-based broker, and relays actuation requests back to the devices.
//!
//! Typical usage wires an [`Agent`] with a [`DataBroker`] sink and a [`DeviceTransport`],
//! then feeds it [`AgentEvent`]s from the transport and the device-manager consumers.
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use iot_agent::{
//!     Agent, AgentEvent, DataBroker, DeviceCache, DeviceTransport, DeviceUpdate, DropReason,
//!     FilterPolicy, IdResolver, TransportFault,
//! };
//!
//! struct PrintingSink;
//!
//! impl DataBroker for PrintingSink {
//!     fn update_data(&self, update: DeviceUpdate) {
//!         println!("{} -> {:?}", update.device_id, update.attributes);
//!     }
//! }
//!
//! struct NoTransport;
//!
//! #[async_trait]
//! impl DeviceTransport for NoTransport {
//!     async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), TransportFault> {
//!         Err(TransportFault::NotStarted)
//!     }
//! }
//!
//! let agent = Agent::new(
//!     DeviceCache::new(),
//!     IdResolver::new(),
//!     FilterPolicy::LabelOnly,
//!     Arc::new(PrintingSink),
//!     Arc::new(NoTransport),
//! );
//!
//! let created = br#"{
//!     "event": "create",
//!     "data": {"id": "dev-1", "attrs": {"1": [
//!         {"label": "t", "type": "dynamic"},
//!         {"label": "id-location", "type": "meta",
//!          "static_value": "{\"type\":\"mqtt-topic\",\"id\":\"/tenantA/sensor-07/attrs\",\"xid\":\"/tenantA/sensor-07/attrs\"}"}
//!     ]}},
//!     "meta": {"service": "tenantA"}
//! }"#;
//! agent.handle_event(AgentEvent::DeviceNotification { tenant: None, payload: created.to_vec() });
//!
//! assert!(agent.handle_inbound("/tenantA/sensor-07/attrs", br#"{"t": 21.5}"#).is_ok());
//! assert_eq!(
//!     agent.handle_inbound("/tenantB/unknown/attrs", br#"{"t": 1}"#),
//!     Err(DropReason::UnresolvedIdentity)
//! );
//! ```
//!
//! ## Internal architecture map
//!
//! - Device: lifecycle notification model and the device cache
//! - Resolution: `id-location` rules and the identity resolver
//! - Translation: patch interpreter, attribute filter and the inbound pipeline
//! - Dispatch: context-state sink, log-broker sink, topic registry and supervised consumers
//! - Transport: MQTT subscribe/publish adapter
//! - Agent: event loop wiring all of the above, plus the actuation relay
//!
//! Caches are owned values handed to components at construction. Each one publishes a new
//! snapshot per lifecycle event, so readers see either all or none of an event's effects.
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events. Every event carries an `event` field from
//! `observability::events` and a `component` field.
//! Library code emits events and does not initialize a global subscriber. Binaries and
//! tests are responsible for one-time `tracing_subscriber` initialization.

mod actuation;
pub use actuation::{actuation_topic, default_actuation_topic, ActuationRelay};

mod agent;
pub use agent::{Agent, AgentEvent};

mod device;
pub use device::{
    ActuationRequest, AttributeConfig, DeviceCache, DeviceLifecycleEvent, DeviceNotification,
    DeviceTemplates, LifecycleEventType, NotificationParseError, ACTUATE_TOPIC_LABEL,
    ACTUATOR_TYPE, CONFIGURATION_TYPE, DEVICE_TOPIC_LABEL, ID_LOCATION_LABEL, TRANSLATOR_TYPE,
};

mod dispatch;
#[cfg(feature = "kafka")]
pub use dispatch::KafkaClientFactory;
pub use dispatch::{
    bearer_token, build_attribute_wrappers, build_envelope, BrokerFault, ContextStateDispatcher,
    ContextUpdateError, DataBroker, HttpTopicRegistry, LifecycleState, LogBrokerDispatcher,
    LogClientFactory, LogConsumer, LogProducer, NotificationConsumers, Supervisor, TopicCache,
    TopicRegistry, TopicResolutionError, DEFAULT_DEVICE_DATA_SUBJECT, DEFAULT_DEVICE_SUBJECT,
};

mod drop_reason;
pub use drop_reason::DropReason;

#[doc(hidden)]
pub mod observability;

mod resolution;
pub use resolution::{IdResolver, MatchKind, MessageContext, ResolverRule, ResolverRuleError};

mod translation;
pub use translation::{
    apply as apply_patch, filter_registered_attributes, DeviceUpdate, FilterPolicy, JsonPointer,
    MetaAttributes, PatchApplyError, PatchFailure, PatchInstruction, TranslationPipeline,
    TIME_INSTANT_KEY,
};

mod transport;
pub use transport::{
    random_client_id, DeviceTransport, MqttTransport, MqttTransportOptions, TlsMaterial,
    TransportFault, WILDCARD_TOPIC,
};
