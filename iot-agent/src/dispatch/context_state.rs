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


//! Context-state HTTP sink.

use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use tracing::{debug, warn};

use crate::dispatch::DataBroker;
use crate::observability::events;
use crate::translation::{DeviceUpdate, MetaAttributes, TIME_INSTANT_KEY};

const COMPONENT: &str = "context_state_sink";

pub const SERVICE_HEADER: &str = "Fiware-Service";
pub const SERVICE_PATH_HEADER: &str = "Fiware-ServicePath";
pub const DEFAULT_SERVICE_PATH: &str = "/";

#[derive(Debug)]
pub enum ContextUpdateError {
    /// The configured host cannot serve as a base for entity URLs.
    InvalidHost(String),
    Request(reqwest::Error),
}

impl Display for ContextUpdateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContextUpdateError::InvalidHost(host) => write!(f, "invalid context-state host `{host}`"),
            ContextUpdateError::Request(err) => write!(f, "request failed: {err}"),
        }
    }
}

impl Error for ContextUpdateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ContextUpdateError::InvalidHost(_) => None,
            ContextUpdateError::Request(err) => Some(err),
        }
    }
}

/// One value wrapper per attribute, carrying the timestamp metadata when present.
pub fn build_attribute_wrappers(attributes: &Map<String, Value>, meta: &MetaAttributes) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(name, value)| {
            let wrapper = match &meta.time_instant {
                Some(time_instant) => json!({
                    "value": value,
                    "metadata": {
                        "name": TIME_INSTANT_KEY,
                        "type": "ISO8601",
                        "value": time_instant,
                    },
                }),
                None => json!({ "value": value }),
            };
            (name.clone(), wrapper)
        })
        .collect()
}

/// PUTs every update to `{host}/v2/entities/{deviceId}/attrs`.
#[derive(Clone)]
pub struct ContextStateDispatcher {
    client: reqwest::Client,
    host: String,
    service_path: String,
}

impl ContextStateDispatcher {
    /// `host` is a base URL; a bare `host:port` is treated as plain HTTP.
    pub fn new(client: reqwest::Client, host: &str, service_path: Option<&str>) -> Self {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        Self {
            client,
            host,
            service_path: service_path.unwrap_or(DEFAULT_SERVICE_PATH).to_string(),
        }
    }

    /// The device id is pushed as a single percent-encoded path segment.
    pub fn entity_url(&self, device_id: &str) -> Result<reqwest::Url, ContextUpdateError> {
        let invalid = || ContextUpdateError::InvalidHost(self.host.clone());
        let mut url = reqwest::Url::parse(&self.host).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["v2", "entities", device_id, "attrs"]);
        Ok(url)
    }

    /// Issues the PUT and returns the response status.
    pub async fn send_update(&self, update: &DeviceUpdate) -> Result<reqwest::StatusCode, ContextUpdateError> {
        let url = self.entity_url(&update.device_id)?;
        let body = build_attribute_wrappers(&update.attributes, &update.meta);
        let response = self
            .client
            .put(url)
            .header(SERVICE_HEADER, update.tenant.as_str())
            .header(SERVICE_PATH_HEADER, self.service_path.as_str())
            .json(&body)
            .send()
            .await
            .map_err(ContextUpdateError::Request)?;
        Ok(response.status())
    }
}

impl DataBroker for ContextStateDispatcher {
    fn update_data(&self, update: DeviceUpdate) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            match dispatcher.send_update(&update).await {
                Ok(status) if status.is_success() => debug!(
                    event = events::CONTEXT_UPDATE_OK,
                    component = COMPONENT,
                    tenant = update.tenant.as_str(),
                    device_id = update.device_id.as_str(),
                    status = status.as_u16(),
                    "device updated"
                ),
                Ok(status) => warn!(
                    event = events::CONTEXT_UPDATE_FAILED,
                    component = COMPONENT,
                    tenant = update.tenant.as_str(),
                    device_id = update.device_id.as_str(),
                    status = status.as_u16(),
                    "context-state service rejected update"
                ),
                Err(err) => warn!(
                    event = events::CONTEXT_UPDATE_FAILED,
                    component = COMPONENT,
                    tenant = update.tenant.as_str(),
                    device_id = update.device_id.as_str(),
                    err = %err,
                    "error while posting device update"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{build_attribute_wrappers, ContextStateDispatcher, ContextUpdateError};
    use crate::dispatch::DataBroker;
    use crate::translation::{DeviceUpdate, MetaAttributes};
    use httpmock::{Method::PUT, MockServer};
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    fn attributes() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("t".to_string(), json!("21.5"));
        map.insert("h".to_string(), json!(40));
        map
    }

    fn update(time_instant: Option<&str>) -> DeviceUpdate {
        DeviceUpdate {
            tenant: "tenantA".to_string(),
            device_id: "dev-1".to_string(),
            attributes: attributes(),
            meta: MetaAttributes {
                time_instant: time_instant.map(str::to_string),
            },
        }
    }

    #[test]
    fn wrappers_without_timestamp_only_carry_values() {
        let wrappers = build_attribute_wrappers(&attributes(), &MetaAttributes::default());
        assert_eq!(
            Value::Object(wrappers),
            json!({"t": {"value": "21.5"}, "h": {"value": 40}})
        );
    }

    #[test]
    fn wrappers_with_timestamp_carry_iso8601_metadata() {
        let meta = MetaAttributes {
            time_instant: Some("2023-01-01T00:00:00Z".to_string()),
        };
        let wrappers = build_attribute_wrappers(&attributes(), &meta);
        assert_eq!(
            wrappers["t"],
            json!({
                "value": "21.5",
                "metadata": {"name": "TimeInstant", "type": "ISO8601", "value": "2023-01-01T00:00:00Z"}
            })
        );
        assert_eq!(wrappers.len(), 2);
    }

    #[test]
    fn bare_hosts_default_to_http() {
        let dispatcher = ContextStateDispatcher::new(reqwest::Client::new(), "orion:1026", None);
        let url = dispatcher.entity_url("dev-1").expect("valid url");
        assert_eq!(url.as_str(), "http://orion:1026/v2/entities/dev-1/attrs");
    }

    #[test]
    fn device_ids_stay_inside_their_path_segment() {
        let dispatcher = ContextStateDispatcher::new(reqwest::Client::new(), "http://orion:1026/ctx/", None);
        let url = dispatcher.entity_url("room/1#a?b c").expect("valid url");
        assert_eq!(
            url.as_str(),
            "http://orion:1026/ctx/v2/entities/room%2F1%23a%3Fb%20c/attrs"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn unusable_host_is_reported_without_a_request() {
        let dispatcher = ContextStateDispatcher::new(reqwest::Client::new(), "http://", None);
        let err = dispatcher.send_update(&update(None)).await.expect_err("no base url");
        assert!(matches!(err, ContextUpdateError::InvalidHost(_)));
    }

    #[tokio::test]
    async fn update_is_put_with_tenant_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v2/entities/dev-1/attrs")
                    .header("Fiware-Service", "tenantA")
                    .header("Fiware-ServicePath", "/")
                    .header("content-type", "application/json")
                    .json_body(json!({"t": {"value": "21.5"}, "h": {"value": 40}}));
                then.status(204);
            })
            .await;

        let dispatcher = ContextStateDispatcher::new(reqwest::Client::new(), &server.base_url(), None);
        let status = dispatcher.send_update(&update(None)).await.expect("request sent");

        mock.assert_async().await;
        assert_eq!(status.as_u16(), 204);
    }

    #[tokio::test]
    async fn update_data_returns_immediately_and_delivers_in_background() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v2/entities/dev-1/attrs")
                    .header("Fiware-ServicePath", "/devices");
                then.status(204);
            })
            .await;

        let dispatcher =
            ContextStateDispatcher::new(reqwest::Client::new(), &server.base_url(), Some("/devices"));
        dispatcher.update_data(update(Some("2023-01-01T00:00:00Z")));

        for _ in 0..100 {
            if mock.hits_async().await == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("update was never delivered");
    }

    #[tokio::test]
    async fn unreachable_sink_is_absorbed() {
        let dispatcher = ContextStateDispatcher::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
        assert!(dispatcher.send_update(&update(None)).await.is_err());
        dispatcher.update_data(update(None));
    }
}
