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


//! rdkafka-backed log broker clients.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use crate::dispatch::log_broker::{LogClientFactory, LogConsumer, LogProducer};
use crate::dispatch::supervisor::BrokerFault;

const METADATA_TIMEOUT: Duration = Duration::from_secs(2);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaClientFactory {
    brokers: String,
    group_id: String,
    client_id: String,
}

impl KafkaClientFactory {
    pub fn new(brokers: &[String], group_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.join(","),
            group_id: group_id.into(),
            client_id: client_id.into(),
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.as_str())
            .set("client.id", self.client_id.as_str());
        config
    }
}

fn connection_fault(err: impl std::fmt::Display) -> BrokerFault {
    BrokerFault::Connection(err.to_string())
}

fn is_transport_error(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::BrokerTransportFailure)
    )
}

#[async_trait]
impl LogClientFactory for KafkaClientFactory {
    async fn create_producer(&self) -> Result<Arc<dyn LogProducer>, BrokerFault> {
        let producer: FutureProducer = self
            .base_config()
            .set("request.required.acks", "1")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(connection_fault)?;

        // Creation is lazy; a metadata round trip proves the cluster is reachable.
        let probe = producer.clone();
        task::spawn_blocking(move || probe.client().fetch_metadata(None, Timeout::After(METADATA_TIMEOUT)))
            .await
            .map_err(connection_fault)?
            .map_err(connection_fault)?;

        Ok(Arc::new(KafkaProducer { producer }))
    }

    async fn create_consumer(&self, topics: &[String]) -> Result<Arc<dyn LogConsumer>, BrokerFault> {
        let consumer: StreamConsumer = self
            .base_config()
            .set("group.id", self.group_id.as_str())
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "10000")
            .create()
            .map_err(connection_fault)?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs).map_err(connection_fault)?;

        Ok(Arc::new(KafkaConsumer { consumer }))
    }
}

struct KafkaProducer {
    producer: FutureProducer,
}

#[async_trait]
impl LogProducer for KafkaProducer {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerFault> {
        let record = FutureRecord::to(topic).key(key).payload(payload.as_slice());
        match self.producer.send(record, SEND_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err((err, _)) if is_transport_error(&err) => Err(BrokerFault::Connection(err.to_string())),
            Err((err, _)) => Err(BrokerFault::Publish(err.to_string())),
        }
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl LogConsumer for KafkaConsumer {
    async fn recv(&self) -> Result<Vec<u8>, BrokerFault> {
        loop {
            match self.consumer.recv().await {
                Ok(message) => return Ok(message.payload().map(<[u8]>::to_vec).unwrap_or_default()),
                Err(KafkaError::PartitionEOF(_)) => continue,
                Err(err) => return Err(BrokerFault::Receive(err.to_string())),
            }
        }
    }
}
