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


//! Downstream sinks and the broker clients feeding the agent.

pub(crate) mod context_state;
#[cfg(feature = "kafka")]
pub(crate) mod kafka;
pub(crate) mod log_broker;
pub(crate) mod supervisor;
pub(crate) mod topic_registry;

use crate::translation::DeviceUpdate;

pub use context_state::{build_attribute_wrappers, ContextStateDispatcher, ContextUpdateError};
#[cfg(feature = "kafka")]
pub use kafka::KafkaClientFactory;
pub use log_broker::{
    build_envelope, LogBrokerDispatcher, LogClientFactory, LogConsumer, LogProducer,
    NotificationConsumers, DEFAULT_DEVICE_DATA_SUBJECT, DEFAULT_DEVICE_SUBJECT,
};
pub use supervisor::{BrokerFault, LifecycleState, Supervisor};
pub use topic_registry::{
    bearer_token, HttpTopicRegistry, TopicCache, TopicRegistry, TopicResolutionError,
};

/// A downstream sink. Calls return at once; delivery happens on a spawned task and its
/// outcome is only logged.
pub trait DataBroker: Send + Sync {
    fn update_data(&self, update: DeviceUpdate);
}
