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


//! Log-based broker sink and the device-manager notification consumers.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentEvent;
use crate::dispatch::context_state::build_attribute_wrappers;
use crate::dispatch::supervisor::{BrokerFault, Initializer, LifecycleState, ReadyHook, Supervisor};
use crate::dispatch::topic_registry::TopicCache;
use crate::dispatch::DataBroker;
use crate::observability::events;
use crate::translation::DeviceUpdate;

const COMPONENT: &str = "log_broker";

pub const ENVELOPE_PROTOCOL: &str = "mqtt";
pub const ENVELOPE_PAYLOAD_FORMAT: &str = "json";
pub const DEFAULT_DEVICE_DATA_SUBJECT: &str = "device-data";
pub const DEFAULT_DEVICE_SUBJECT: &str = "dojot.device-manager.device";
pub const TENANT_CREATED: &str = "CREATE";

#[async_trait]
pub trait LogProducer: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerFault>;
}

#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Next record value.
    async fn recv(&self) -> Result<Vec<u8>, BrokerFault>;
}

/// Creates fresh broker clients; each lifecycle retry asks for a new one.
#[async_trait]
pub trait LogClientFactory: Send + Sync {
    async fn create_producer(&self) -> Result<Arc<dyn LogProducer>, BrokerFault>;

    async fn create_consumer(&self, topics: &[String]) -> Result<Arc<dyn LogConsumer>, BrokerFault>;
}

/// Record published for every device update.
pub fn build_envelope(update: &DeviceUpdate) -> serde_json::Value {
    json!({
        "metadata": {
            "deviceid": update.device_id,
            "protocol": ENVELOPE_PROTOCOL,
            "payload": ENVELOPE_PAYLOAD_FORMAT,
        },
        "attrs": build_attribute_wrappers(&update.attributes, &update.meta),
    })
}

/// Publishes device updates while its supervised producer is ready.
#[derive(Clone)]
pub struct LogBrokerDispatcher {
    producer: Supervisor<dyn LogProducer>,
    topics: Arc<TopicCache>,
    subject: String,
}

impl LogBrokerDispatcher {
    pub fn new(
        factory: Arc<dyn LogClientFactory>,
        topics: Arc<TopicCache>,
        subject: impl Into<String>,
        retry_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let initializer: Initializer<dyn LogProducer> = Arc::new(move || {
            let factory = factory.clone();
            async move { factory.create_producer().await }.boxed()
        });
        Self {
            producer: Supervisor::new("producer", retry_delay, shutdown, initializer, None),
            topics,
            subject: subject.into(),
        }
    }

    pub fn start(&self) {
        self.producer.start();
    }

    pub fn producer_state(&self) -> LifecycleState {
        self.producer.state()
    }

    async fn publish(&self, producer: Arc<dyn LogProducer>, update: DeviceUpdate) {
        let topic = match self.topics.resolve(&update.tenant, &self.subject).await {
            Ok(topic) => topic,
            // Logged by the cache; the next update for this tenant retries the lookup.
            Err(_) => return,
        };

        let record = build_envelope(&update).to_string().into_bytes();
        match producer.send(&topic, &update.device_id, record).await {
            Ok(()) => debug!(
                event = events::LOG_PUBLISH_OK,
                component = COMPONENT,
                tenant = update.tenant.as_str(),
                device_id = update.device_id.as_str(),
                topic = topic.as_str(),
                "device update published"
            ),
            Err(fault) => {
                warn!(
                    event = events::LOG_PUBLISH_FAILED,
                    component = COMPONENT,
                    tenant = update.tenant.as_str(),
                    device_id = update.device_id.as_str(),
                    topic = topic.as_str(),
                    err = %fault,
                    "failed to publish device update"
                );
                if fault.is_fatal_for_client() {
                    self.producer.report_fault(&producer, &fault);
                }
            }
        }
    }
}

impl DataBroker for LogBrokerDispatcher {
    fn update_data(&self, update: DeviceUpdate) {
        let Some(producer) = self.producer.handle() else {
            info!(
                event = events::SINK_NOT_READY,
                component = COMPONENT,
                tenant = update.tenant.as_str(),
                device_id = update.device_id.as_str(),
                state = self.producer.state().as_str(),
                "producer not ready, dropping update"
            );
            return;
        };

        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.publish(producer, update).await });
    }
}

#[derive(Deserialize)]
struct TenancyRecord {
    #[serde(rename = "type")]
    record_type: String,
    tenant: String,
}

/// One supervised consumer per tenant plus the tenant-lifecycle watcher.
pub struct NotificationConsumers {
    factory: Arc<dyn LogClientFactory>,
    topics: Arc<TopicCache>,
    device_subject: String,
    tenancy_topic: String,
    retry_delay: Duration,
    shutdown: CancellationToken,
    sender: mpsc::Sender<AgentEvent>,
    tenants: Mutex<HashMap<String, Supervisor<dyn LogConsumer>>>,
    watcher: Mutex<Option<Supervisor<dyn LogConsumer>>>,
}

impl NotificationConsumers {
    pub fn new(
        factory: Arc<dyn LogClientFactory>,
        topics: Arc<TopicCache>,
        device_subject: impl Into<String>,
        tenancy_topic: impl Into<String>,
        retry_delay: Duration,
        shutdown: CancellationToken,
        sender: mpsc::Sender<AgentEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            topics,
            device_subject: device_subject.into(),
            tenancy_topic: tenancy_topic.into(),
            retry_delay,
            shutdown,
            sender,
            tenants: Mutex::new(HashMap::new()),
            watcher: Mutex::new(None),
        })
    }

    /// Starts the tenant watcher and the bootstrap pass over known tenants.
    pub fn start(self: &Arc<Self>) {
        self.start_watcher();

        let consumers = self.clone();
        tokio::spawn(async move { consumers.bootstrap().await });
    }

    pub fn tenant_state(&self, tenant: &str) -> Option<LifecycleState> {
        self.tenants
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(tenant)
            .map(Supervisor::state)
    }

    pub fn watcher_state(&self) -> Option<LifecycleState> {
        self.watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(Supervisor::state)
    }

    pub fn known_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self
            .tenants
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        tenants.sort();
        tenants
    }

    /// Creates the consumer of `tenant` on first sight; later calls are no-ops.
    pub fn ensure_tenant(&self, tenant: &str) {
        let supervisor = {
            let mut tenants = self
                .tenants
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if tenants.contains_key(tenant) {
                return;
            }
            let supervisor = self.tenant_supervisor(tenant);
            tenants.insert(tenant.to_string(), supervisor.clone());
            supervisor
        };

        info!(
            event = events::TENANT_DISCOVERED,
            component = COMPONENT,
            tenant,
            "starting notification consumer for tenant"
        );
        supervisor.start();
    }

    // Retries on the fixed delay: tenants that already exist never show up on the tenancy topic.
    async fn bootstrap(self: Arc<Self>) {
        loop {
            match self.topics.registry().list_tenants().await {
                Ok(tenants) => {
                    for tenant in tenants {
                        self.ensure_tenant(&tenant);
                    }
                    return;
                }
                Err(err) => warn!(
                    event = events::TENANT_BOOTSTRAP_FAILED,
                    component = COMPONENT,
                    err = %err,
                    retry_ms = self.retry_delay.as_millis() as u64,
                    "could not list tenants, retrying"
                ),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    fn start_watcher(self: &Arc<Self>) {
        let factory = self.factory.clone();
        let topic = self.tenancy_topic.clone();
        let initializer: Initializer<dyn LogConsumer> = Arc::new(move || {
            let factory = factory.clone();
            let topics = vec![topic.clone()];
            async move { factory.create_consumer(&topics).await }.boxed()
        });

        let consumers = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let on_ready: ReadyHook<dyn LogConsumer> = Arc::new(
            move |consumer: Arc<dyn LogConsumer>, supervisor: Supervisor<dyn LogConsumer>| {
                tokio::spawn(watch_tenancy(
                    consumers.clone(),
                    consumer,
                    supervisor,
                    shutdown.clone(),
                ));
            },
        );

        let supervisor = Supervisor::new(
            format!("tenancy-consumer[{}]", self.tenancy_topic),
            self.retry_delay,
            self.shutdown.clone(),
            initializer,
            Some(on_ready),
        );
        *self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(supervisor.clone());
        supervisor.start();
    }

    fn tenant_supervisor(&self, tenant: &str) -> Supervisor<dyn LogConsumer> {
        let factory = self.factory.clone();
        let topics = self.topics.clone();
        let subject = self.device_subject.clone();
        let owner = tenant.to_string();
        let initializer: Initializer<dyn LogConsumer> = Arc::new(move || {
            let factory = factory.clone();
            let topics = topics.clone();
            let subject = subject.clone();
            let tenant = owner.clone();
            async move {
                let topic = topics
                    .resolve(&tenant, &subject)
                    .await
                    .map_err(|err| BrokerFault::Connection(err.to_string()))?;
                factory.create_consumer(&[topic]).await
            }
            .boxed()
        });

        let sender = self.sender.clone();
        let shutdown = self.shutdown.clone();
        let owner = tenant.to_string();
        let on_ready: ReadyHook<dyn LogConsumer> = Arc::new(
            move |consumer: Arc<dyn LogConsumer>, supervisor: Supervisor<dyn LogConsumer>| {
                tokio::spawn(forward_notifications(
                    owner.clone(),
                    consumer,
                    supervisor,
                    sender.clone(),
                    shutdown.clone(),
                ));
            },
        );

        Supervisor::new(
            format!("device-consumer[{tenant}]"),
            self.retry_delay,
            self.shutdown.clone(),
            initializer,
            Some(on_ready),
        )
    }
}

async fn forward_notifications(
    tenant: String,
    consumer: Arc<dyn LogConsumer>,
    supervisor: Supervisor<dyn LogConsumer>,
    sender: mpsc::Sender<AgentEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = consumer.recv() => received,
        };

        match received {
            Ok(payload) => {
                let event = AgentEvent::DeviceNotification {
                    tenant: Some(tenant.clone()),
                    payload,
                };
                if sender.send(event).await.is_err() {
                    warn!(
                        event = events::CONSUMER_FORWARD_FAILED,
                        component = COMPONENT,
                        tenant = tenant.as_str(),
                        "agent channel closed, stopping consumer"
                    );
                    return;
                }
            }
            Err(fault) => {
                warn!(
                    event = events::CONSUMER_RECV_FAILED,
                    component = COMPONENT,
                    tenant = tenant.as_str(),
                    err = %fault,
                    "notification consumer failed"
                );
                supervisor.report_fault(&consumer, &fault);
                return;
            }
        }
    }
}

async fn watch_tenancy(
    consumers: Weak<NotificationConsumers>,
    consumer: Arc<dyn LogConsumer>,
    supervisor: Supervisor<dyn LogConsumer>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = consumer.recv() => received,
        };

        let payload = match received {
            Ok(payload) => payload,
            Err(fault) => {
                warn!(
                    event = events::CONSUMER_RECV_FAILED,
                    component = COMPONENT,
                    resource = supervisor.resource(),
                    err = %fault,
                    "tenancy consumer failed"
                );
                supervisor.report_fault(&consumer, &fault);
                return;
            }
        };

        let Some(owner) = consumers.upgrade() else {
            return;
        };
        match serde_json::from_slice::<TenancyRecord>(&payload) {
            Ok(record) if record.record_type == TENANT_CREATED => {
                owner.ensure_tenant(&record.tenant);
            }
            Ok(record) => debug!(
                event = events::TENANCY_RECORD_IGNORED,
                component = COMPONENT,
                tenant = record.tenant.as_str(),
                record_type = record.record_type.as_str(),
                "ignoring tenancy record"
            ),
            Err(err) => debug!(
                event = events::TENANCY_RECORD_IGNORED,
                component = COMPONENT,
                err = %err,
                "ignoring unparsable tenancy record"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::build_envelope;
    use crate::translation::{DeviceUpdate, MetaAttributes};
    use serde_json::{json, Map};

    #[test]
    fn envelope_carries_metadata_and_wrapped_attributes() {
        let mut attributes = Map::new();
        attributes.insert("t".to_string(), json!("21.5"));
        let update = DeviceUpdate {
            tenant: "tenantA".to_string(),
            device_id: "dev-1".to_string(),
            attributes,
            meta: MetaAttributes {
                time_instant: Some("2023-01-01T00:00:00Z".to_string()),
            },
        };

        assert_eq!(
            build_envelope(&update),
            json!({
                "metadata": {"deviceid": "dev-1", "protocol": "mqtt", "payload": "json"},
                "attrs": {
                    "t": {
                        "value": "21.5",
                        "metadata": {"name": "TimeInstant", "type": "ISO8601", "value": "2023-01-01T00:00:00Z"}
                    }
                }
            })
        );
    }
}
