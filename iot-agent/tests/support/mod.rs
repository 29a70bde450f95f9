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


#![allow(dead_code)]

use async_trait::async_trait;
use iot_agent::{
    BrokerFault, DataBroker, DeviceTransport, DeviceUpdate, LogClientFactory, LogConsumer,
    LogProducer, TopicRegistry, TopicResolutionError, TransportFault,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Polls `condition` until it holds or the timeout elapses.
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub(crate) async fn wait_until_async<F, Fut>(condition: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

#[derive(Default)]
pub(crate) struct RecordingBroker {
    updates: Mutex<Vec<DeviceUpdate>>,
}

impl RecordingBroker {
    pub(crate) fn updates(&self) -> Vec<DeviceUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl DataBroker for RecordingBroker {
    fn update_data(&self, update: DeviceUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingTransport {
    pub(crate) fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceTransport for RecordingTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportFault> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Topic registry backed by a fixed table.
pub(crate) struct StaticTopicRegistry {
    tenants: Vec<String>,
    topics: HashMap<(String, String), String>,
    listing_failures: AtomicUsize,
    listing_calls: Arc<AtomicUsize>,
}

impl StaticTopicRegistry {
    pub(crate) fn new(tenants: &[&str]) -> Self {
        Self {
            tenants: tenants.iter().map(|t| t.to_string()).collect(),
            topics: HashMap::new(),
            listing_failures: AtomicUsize::new(0),
            listing_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The first `times` tenant listings fail.
    pub(crate) fn failing_tenant_listings(self, times: usize) -> Self {
        self.listing_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Counter of tenant listings, shared with the registry.
    pub(crate) fn listing_calls(&self) -> Arc<AtomicUsize> {
        self.listing_calls.clone()
    }

    pub(crate) fn with_topic(mut self, tenant: &str, subject: &str, topic: &str) -> Self {
        self.topics
            .insert((tenant.to_string(), subject.to_string()), topic.to_string());
        self
    }
}

#[async_trait]
impl TopicRegistry for StaticTopicRegistry {
    async fn lookup_topic(&self, tenant: &str, subject: &str) -> Result<String, TopicResolutionError> {
        self.topics
            .get(&(tenant.to_string(), subject.to_string()))
            .cloned()
            .ok_or_else(|| TopicResolutionError::InvalidBody(format!("no topic for {tenant}/{subject}")))
    }

    async fn list_tenants(&self) -> Result<Vec<String>, TopicResolutionError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .listing_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TopicResolutionError::InvalidBody("tenant service starting".to_string()));
        }
        Ok(self.tenants.clone())
    }
}

/// Record published through a [`ScriptedProducer`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PublishedRecord {
    pub(crate) topic: String,
    pub(crate) key: String,
    pub(crate) value: Value,
}

pub(crate) struct ScriptedProducer {
    factory: Arc<FactoryState>,
}

#[async_trait]
impl LogProducer for ScriptedProducer {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerFault> {
        let held = self.factory.held_sends.lock().unwrap().pop_front();
        if let Some(release) = held {
            if let Ok(fault) = release.await {
                return Err(fault);
            }
        }
        if let Some(fault) = self.factory.send_faults.lock().unwrap().pop_front() {
            return Err(fault);
        }
        let value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        self.factory.published.lock().unwrap().push(PublishedRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }
}

pub(crate) struct ScriptedConsumer {
    records: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Vec<u8>, BrokerFault>>>,
}

#[async_trait]
impl LogConsumer for ScriptedConsumer {
    async fn recv(&self) -> Result<Vec<u8>, BrokerFault> {
        match self.records.lock().await.recv().await {
            Some(record) => record,
            None => Err(BrokerFault::Receive("feed closed".to_string())),
        }
    }
}

#[derive(Default)]
struct FactoryState {
    producer_failures: Mutex<VecDeque<BrokerFault>>,
    consumer_failures: Mutex<VecDeque<BrokerFault>>,
    send_faults: Mutex<VecDeque<BrokerFault>>,
    held_sends: Mutex<VecDeque<oneshot::Receiver<BrokerFault>>>,
    producers_created: Mutex<usize>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    feeds: Mutex<HashMap<String, mpsc::UnboundedSender<Result<Vec<u8>, BrokerFault>>>>,
    published: Mutex<Vec<PublishedRecord>>,
}

/// In-memory [`LogClientFactory`] whose failures are scripted up front.
#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    state: Arc<FactoryState>,
}

impl ScriptedFactory {
    pub(crate) fn fail_producer_creation(&self, times: usize) {
        let mut failures = self.state.producer_failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back(BrokerFault::Connection("broker unreachable".to_string()));
        }
    }

    pub(crate) fn fail_consumer_creation(&self, times: usize) {
        let mut failures = self.state.consumer_failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back(BrokerFault::Connection("broker unreachable".to_string()));
        }
    }

    pub(crate) fn fail_next_send(&self, fault: BrokerFault) {
        self.state.send_faults.lock().unwrap().push_back(fault);
    }

    /// Blocks the next send until the returned sender fails it (or is dropped, which lets
    /// it through).
    pub(crate) fn hold_next_send(&self) -> oneshot::Sender<BrokerFault> {
        let (release, held) = oneshot::channel();
        self.state.held_sends.lock().unwrap().push_back(held);
        release
    }

    pub(crate) fn pending_holds(&self) -> usize {
        self.state.held_sends.lock().unwrap().len()
    }

    pub(crate) fn producers_created(&self) -> usize {
        *self.state.producers_created.lock().unwrap()
    }

    pub(crate) fn subscriptions(&self) -> Vec<Vec<String>> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    pub(crate) fn published(&self) -> Vec<PublishedRecord> {
        self.state.published.lock().unwrap().clone()
    }

    /// Delivers `record` to the most recent consumer subscribed to `topic`.
    pub(crate) fn deliver(&self, topic: &str, record: Result<Vec<u8>, BrokerFault>) -> bool {
        match self.state.feeds.lock().unwrap().get(topic) {
            Some(feed) => feed.send(record).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl LogClientFactory for ScriptedFactory {
    async fn create_producer(&self) -> Result<Arc<dyn LogProducer>, BrokerFault> {
        if let Some(fault) = self.state.producer_failures.lock().unwrap().pop_front() {
            return Err(fault);
        }
        *self.state.producers_created.lock().unwrap() += 1;
        Ok(Arc::new(ScriptedProducer {
            factory: self.state.clone(),
        }))
    }

    async fn create_consumer(&self, topics: &[String]) -> Result<Arc<dyn LogConsumer>, BrokerFault> {
        if let Some(fault) = self.state.consumer_failures.lock().unwrap().pop_front() {
            return Err(fault);
        }
        let (feed, records) = mpsc::unbounded_channel();
        {
            let mut feeds = self.state.feeds.lock().unwrap();
            for topic in topics {
                feeds.insert(topic.clone(), feed.clone());
            }
        }
        self.state.subscriptions.lock().unwrap().push(topics.to_vec());
        Ok(Arc::new(ScriptedConsumer {
            records: tokio::sync::Mutex::new(records),
        }))
    }
}

pub(crate) fn topic_rule(raw_id: &str, format_key: &str, regexp: Option<&str>) -> String {
    let mut rule = json!({"type": "mqtt-topic", "id": raw_id, "xid": format_key});
    if let Some(regexp) = regexp {
        rule["regexp"] = Value::from(regexp);
    }
    rule.to_string()
}

pub(crate) fn attribute_rule(attribute: &str, raw_id: &str, format_key: &str) -> String {
    json!({
        "type": "message-attribute",
        "attribute_name": attribute,
        "id": raw_id,
        "xid": format_key,
    })
    .to_string()
}

/// Device-manager record as it arrives on a tenant's device topic.
pub(crate) fn notification(event: &str, tenant: Option<&str>, device_id: &str, attrs: Value) -> Vec<u8> {
    let mut record = json!({"event": event, "data": {"id": device_id, "attrs": attrs}});
    if let Some(tenant) = tenant {
        record["meta"] = json!({"service": tenant});
    }
    record.to_string().into_bytes()
}

/// Template map `{"1": [...]}` from `(label, type, static_value)` triples.
pub(crate) fn templates(attributes: &[(&str, &str, Option<&str>)]) -> Value {
    let attributes: Vec<Value> = attributes
        .iter()
        .map(|(label, attr_type, static_value)| {
            let mut attribute = json!({"label": label, "type": attr_type});
            if let Some(value) = static_value {
                attribute["static_value"] = Value::from(*value);
            }
            attribute
        })
        .collect();
    json!({ "1": attributes })
}
