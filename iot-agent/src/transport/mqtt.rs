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


use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentEvent;
use crate::observability::{events, fields};
use crate::transport::{random_client_id, DeviceTransport, TransportFault};

const COMPONENT: &str = "mqtt_transport";
const REQUEST_CHANNEL_CAPACITY: usize = 100;
const STOP_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Every topic on the broker.
pub const WILDCARD_TOPIC: &str = "#";

/// PEM material for a TLS session.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterial {
    /// Concatenated CA bundle.
    pub ca: Vec<u8>,
    /// Client certificate and key.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Clone, Debug)]
pub struct MqttTransportOptions {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub keep_alive: Duration,
    pub tls: Option<TlsMaterial>,
    pub retry_delay: Duration,
}

impl MqttTransportOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            tls: None,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub(crate) fn to_mqtt_options(&self) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(random_client_id);

        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(tls) = &self.tls {
            options.set_transport(Transport::tls(tls.ca.clone(), tls.client_auth.clone(), None));
        }
        options
    }
}

/// MQTT client that forwards every publication as an [`AgentEvent::Inbound`].
pub struct MqttTransport {
    options: MqttTransportOptions,
    client: Mutex<Option<AsyncClient>>,
    stop: CancellationToken,
    // Fired by the event loop once the disconnect request has been written.
    flushed: CancellationToken,
}

impl MqttTransport {
    pub fn new(options: MqttTransportOptions, shutdown: &CancellationToken) -> Self {
        Self {
            options,
            client: Mutex::new(None),
            stop: shutdown.child_token(),
            flushed: CancellationToken::new(),
        }
    }

    /// Connects and spawns the event loop; `#` is (re)subscribed on every connection.
    pub fn start(&self, sender: mpsc::Sender<AgentEvent>) -> JoinHandle<()> {
        let (client, event_loop) =
            AsyncClient::new(self.options.to_mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        *self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(client.clone());

        info!(
            event = events::TRANSPORT_STARTING,
            component = COMPONENT,
            host = self.options.host.as_str(),
            port = self.options.port,
            tls = self.options.tls.is_some(),
            "connecting to MQTT broker"
        );

        tokio::spawn(run_event_loop(
            client,
            event_loop,
            sender,
            self.options.retry_delay,
            self.stop.clone(),
            self.flushed.clone(),
        ))
    }

    /// Unsubscribes from `#` and ends the event loop.
    pub async fn stop(&self) -> Result<(), TransportFault> {
        let client = self.current_client();
        let result = match client {
            Some(client) => {
                let unsubscribed = client
                    .unsubscribe(WILDCARD_TOPIC)
                    .await
                    .map_err(|err| TransportFault::Subscribe(err.to_string()));
                if let Err(err) = &unsubscribed {
                    warn!(
                        event = events::TRANSPORT_SUBSCRIBE_FAILED,
                        component = COMPONENT,
                        topic = WILDCARD_TOPIC,
                        err = %err,
                        "could not unsubscribe"
                    );
                }
                let _ = client.disconnect().await;
                if tokio::time::timeout(STOP_FLUSH_TIMEOUT, self.flushed.cancelled())
                    .await
                    .is_err()
                {
                    warn!(
                        event = events::TRANSPORT_FAULT,
                        component = COMPONENT,
                        timeout_ms = STOP_FLUSH_TIMEOUT.as_millis() as u64,
                        "disconnect was not flushed before the timeout"
                    );
                }
                unsubscribed
            }
            None => Err(TransportFault::NotStarted),
        };
        self.stop.cancel();
        result
    }

    fn current_client(&self) -> Option<AsyncClient> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DeviceTransport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportFault> {
        let client = self.current_client().ok_or(TransportFault::NotStarted)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| TransportFault::Publish(err.to_string()))
    }
}

async fn run_event_loop(
    client: AsyncClient,
    mut event_loop: EventLoop,
    sender: mpsc::Sender<AgentEvent>,
    retry_delay: Duration,
    stop: CancellationToken,
    flushed: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            _ = stop.cancelled() => break,
            polled = event_loop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(
                    event = events::TRANSPORT_CONNECTED,
                    component = COMPONENT,
                    "connected to MQTT broker"
                );
                // The event loop is the only reader of the request channel, so never wait on it here.
                match client.try_subscribe(WILDCARD_TOPIC, QoS::AtMostOnce) {
                    Ok(()) => debug!(
                        event = events::TRANSPORT_SUBSCRIBE_OK,
                        component = COMPONENT,
                        topic = WILDCARD_TOPIC,
                        "subscribed to all topics"
                    ),
                    Err(err) => warn!(
                        event = events::TRANSPORT_SUBSCRIBE_FAILED,
                        component = COMPONENT,
                        topic = WILDCARD_TOPIC,
                        err = %err,
                        "could not subscribe to all topics"
                    ),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    event = events::INBOUND_RECEIVE,
                    component = COMPONENT,
                    topic = publish.topic.as_str(),
                    payload = %fields::format_payload_preview(&publish.payload),
                    "got MQTT message"
                );
                let event = AgentEvent::Inbound {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if sender.send(event).await.is_err() {
                    warn!(
                        event = events::TRANSPORT_FORWARD_FAILED,
                        component = COMPONENT,
                        "agent channel closed, stopping transport"
                    );
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                flushed.cancel();
                break;
            }
            Ok(_) => {}
            Err(err) => {
                let fault = TransportFault::Connection(err.to_string());
                warn!(
                    event = events::TRANSPORT_FAULT,
                    component = COMPONENT,
                    err = %fault,
                    retry_ms = retry_delay.as_millis() as u64,
                    "MQTT connection error, retrying"
                );
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    info!(
        event = events::TRANSPORT_STOPPED,
        component = COMPONENT,
        "MQTT event loop stopped"
    );
}
