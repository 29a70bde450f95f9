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


mod config;

use crate::config::{BrokerConfig, Config, ConfigurationError};
use clap::Parser;
use iot_agent::{
    Agent, AgentEvent, ContextStateDispatcher, DataBroker, DeviceCache, HttpTopicRegistry,
    IdResolver, LogBrokerDispatcher, LogClientFactory, MqttTransport, NotificationConsumers,
    TopicCache,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EVENT_QUEUE_SIZE: usize = 1024;

#[derive(Parser)]
#[command(about = "Bridges MQTT/JSON devices to a context-state or log-based broker")]
struct AgentArgs {
    /// Path to the JSON (or json5) configuration document.
    #[arg(value_name = "FILE")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let args = AgentArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(err = %err, "iot agent failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: AgentArgs) -> Result<(), ConfigurationError> {
    let config = Config::load(&args.config)?;
    let retry_delay = config.retry_delay();
    let transport_options = config.mqtt.transport_options(retry_delay)?;

    let shutdown = CancellationToken::new();
    let (sender, receiver) = mpsc::channel::<AgentEvent>(EVENT_QUEUE_SIZE);
    let http = reqwest::Client::new();

    let topics = config.device_manager.as_ref().map(|device_manager| {
        Arc::new(TopicCache::new(Arc::new(HttpTopicRegistry::new(
            http.clone(),
            device_manager.registry_url.clone(),
            device_manager.tenants_url.clone(),
            device_manager.token_user.clone(),
        ))))
    });

    let broker = build_broker(&config, http, topics.clone(), retry_delay, &shutdown)?;

    let consumers = match (&config.device_manager, topics) {
        (Some(device_manager), Some(topics)) => {
            let consumers = NotificationConsumers::new(
                log_client_factory(
                    &device_manager.brokers,
                    &device_manager.group_id,
                    "device_manager",
                )?,
                topics,
                device_manager.device_subject.clone(),
                device_manager.tenancy_topic.clone(),
                retry_delay,
                shutdown.clone(),
                sender.clone(),
            );
            Some(consumers)
        }
        _ => {
            warn!("no device_manager configured, device caches stay empty and inbound messages will be dropped");
            None
        }
    };

    let transport = Arc::new(MqttTransport::new(transport_options, &shutdown));
    let agent = Agent::new(
        DeviceCache::new(),
        IdResolver::new(),
        config.translation.filter_policy,
        broker,
        transport.clone(),
    );

    if let Some(consumers) = &consumers {
        consumers.start();
    }
    let transport_task = transport.start(sender);
    let agent_shutdown = shutdown.clone();
    let agent_task = tokio::spawn(async move { agent.run(receiver, agent_shutdown).await });

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(err = %err, "unable to listen for the shutdown signal");
    }
    info!("shutdown requested");

    if let Err(err) = transport.stop().await {
        warn!(err = %err, "MQTT transport did not stop cleanly");
    }
    shutdown.cancel();
    let _ = transport_task.await;
    let _ = agent_task.await;
    Ok(())
}

fn build_broker(
    config: &Config,
    http: reqwest::Client,
    topics: Option<Arc<TopicCache>>,
    retry_delay: Duration,
    shutdown: &CancellationToken,
) -> Result<Arc<dyn DataBroker>, ConfigurationError> {
    match &config.broker {
        BrokerConfig::ContextState { host, service_path } => {
            info!(host = host.as_str(), "dispatching to the context-state broker");
            Ok(Arc::new(ContextStateDispatcher::new(
                http,
                host,
                service_path.as_deref(),
            )))
        }
        BrokerConfig::LogBased {
            brokers,
            group_id,
            device_data_subject,
        } => {
            let topics = topics.ok_or(ConfigurationError::MissingSection("device_manager"))?;
            info!(brokers = ?brokers, "dispatching to the log-based broker");
            let dispatcher = LogBrokerDispatcher::new(
                log_client_factory(brokers, group_id, "broker")?,
                topics,
                device_data_subject.clone(),
                retry_delay,
                shutdown.clone(),
            );
            dispatcher.start();
            Ok(Arc::new(dispatcher))
        }
    }
}

#[cfg(feature = "kafka")]
fn log_client_factory(
    brokers: &[String],
    group_id: &str,
    _required_by: &'static str,
) -> Result<Arc<dyn LogClientFactory>, ConfigurationError> {
    Ok(Arc::new(iot_agent::KafkaClientFactory::new(
        brokers,
        group_id,
        iot_agent::random_client_id(),
    )))
}

#[cfg(not(feature = "kafka"))]
fn log_client_factory(
    _brokers: &[String],
    _group_id: &str,
    required_by: &'static str,
) -> Result<Arc<dyn LogClientFactory>, ConfigurationError> {
    Err(ConfigurationError::FeatureDisabled {
        required_by,
        feature: "kafka",
    })
}
