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


//! Per-tenant topic resolution through the topic registry.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::observability::events;

const COMPONENT: &str = "topic_registry";

/// Service name carried by the token used for tenant listing.
pub const MANAGEMENT_SERVICE: &str = "internal";

#[derive(Debug)]
pub enum TopicResolutionError {
    Request(reqwest::Error),
    Status { url: String, status: u16 },
    InvalidBody(String),
}

impl Display for TopicResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TopicResolutionError::Request(err) => write!(f, "registry request failed: {err}"),
            TopicResolutionError::Status { url, status } => {
                write!(f, "registry answered {status} for {url}")
            }
            TopicResolutionError::InvalidBody(msg) => write!(f, "invalid registry response: {msg}"),
        }
    }
}

impl Error for TopicResolutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TopicResolutionError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TopicResolutionError {
    fn from(err: reqwest::Error) -> Self {
        TopicResolutionError::Request(err)
    }
}

/// Source of physical topic names and of the tenant list.
#[async_trait]
pub trait TopicRegistry: Send + Sync {
    async fn lookup_topic(&self, tenant: &str, subject: &str) -> Result<String, TopicResolutionError>;

    async fn list_tenants(&self) -> Result<Vec<String>, TopicResolutionError>;
}

/// Unsigned JWT-shaped bearer credential scoped to `service`.
pub fn bearer_token(service: &str, username: &str) -> String {
    let header = json!({"alg": "none", "typ": "JWT"}).to_string();
    let claims = json!({"service": service, "username": username}).to_string();
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    )
}

#[derive(Deserialize)]
struct TopicResponse {
    topic: String,
}

#[derive(Deserialize)]
struct TenantsResponse {
    tenants: Vec<String>,
}

/// HTTP topic registry.
pub struct HttpTopicRegistry {
    client: reqwest::Client,
    registry_url: String,
    tenants_url: String,
    token_user: String,
}

impl HttpTopicRegistry {
    pub fn new(
        client: reqwest::Client,
        registry_url: impl Into<String>,
        tenants_url: impl Into<String>,
        token_user: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registry_url: registry_url.into(),
            tenants_url: tenants_url.into(),
            token_user: token_user.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        service: &str,
    ) -> Result<T, TopicResolutionError> {
        let response = self
            .client
            .get(&url)
            .bearer_auth(bearer_token(service, &self.token_user))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TopicResolutionError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| TopicResolutionError::InvalidBody(err.to_string()))
    }
}

#[async_trait]
impl TopicRegistry for HttpTopicRegistry {
    async fn lookup_topic(&self, tenant: &str, subject: &str) -> Result<String, TopicResolutionError> {
        let url = format!("{}/topic/{subject}", self.registry_url.trim_end_matches('/'));
        let response: TopicResponse = self.get_json(url, tenant).await?;
        if response.topic.is_empty() {
            return Err(TopicResolutionError::InvalidBody("empty topic name".to_string()));
        }
        Ok(response.topic)
    }

    async fn list_tenants(&self) -> Result<Vec<String>, TopicResolutionError> {
        let response: TenantsResponse = self
            .get_json(self.tenants_url.clone(), MANAGEMENT_SERVICE)
            .await?;
        Ok(response.tenants)
    }
}

/// `tenant -> subject -> topic` cache in front of a registry. Entries never expire.
pub struct TopicCache {
    registry: Arc<dyn TopicRegistry>,
    topics: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl TopicCache {
    pub fn new(registry: Arc<dyn TopicRegistry>) -> Self {
        Self {
            registry,
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn TopicRegistry> {
        &self.registry
    }

    pub async fn cached(&self, tenant: &str, subject: &str) -> Option<String> {
        self.topics
            .read()
            .await
            .get(tenant)
            .and_then(|subjects| subjects.get(subject))
            .cloned()
    }

    /// Cached topic, or a registry lookup whose success is cached.
    pub async fn resolve(&self, tenant: &str, subject: &str) -> Result<String, TopicResolutionError> {
        if let Some(topic) = self.cached(tenant, subject).await {
            return Ok(topic);
        }

        match self.registry.lookup_topic(tenant, subject).await {
            Ok(topic) => {
                debug!(
                    event = events::TOPIC_RESOLVE_OK,
                    component = COMPONENT,
                    tenant,
                    subject,
                    topic = topic.as_str(),
                    "topic resolved"
                );
                self.topics
                    .write()
                    .await
                    .entry(tenant.to_string())
                    .or_default()
                    .insert(subject.to_string(), topic.clone());
                Ok(topic)
            }
            Err(err) => {
                warn!(
                    event = events::TOPIC_RESOLVE_FAILED,
                    component = COMPONENT,
                    tenant,
                    subject,
                    err = %err,
                    "topic resolution failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        bearer_token, HttpTopicRegistry, TopicCache, TopicRegistry, TopicResolutionError,
    };
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use httpmock::{Method::GET, MockServer};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRegistry {
        lookups: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TopicRegistry for CountingRegistry {
        async fn lookup_topic(&self, tenant: &str, subject: &str) -> Result<String, TopicResolutionError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TopicResolutionError::InvalidBody("registry down".to_string()));
            }
            Ok(format!("{tenant}.{subject}"))
        }

        async fn list_tenants(&self) -> Result<Vec<String>, TopicResolutionError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn bearer_token_carries_service_and_username() {
        let token = bearer_token("tenantA", "iotagent");
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "");

        let claims: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).expect("base64")).expect("json");
        assert_eq!(claims, json!({"service": "tenantA", "username": "iotagent"}));
    }

    #[tokio::test]
    async fn resolved_topics_are_cached_per_tenant_and_subject() {
        let registry = Arc::new(CountingRegistry {
            lookups: AtomicUsize::new(0),
            fail: false,
        });
        let cache = TopicCache::new(registry.clone());

        assert_eq!(cache.resolve("a", "device-data").await.expect("topic"), "a.device-data");
        assert_eq!(cache.resolve("a", "device-data").await.expect("topic"), "a.device-data");
        assert_eq!(cache.resolve("b", "device-data").await.expect("topic"), "b.device-data");

        assert_eq!(registry.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached("a", "device-data").await.as_deref(), Some("a.device-data"));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let registry = Arc::new(CountingRegistry {
            lookups: AtomicUsize::new(0),
            fail: true,
        });
        let cache = TopicCache::new(registry.clone());

        assert!(cache.resolve("a", "device-data").await.is_err());
        assert!(cache.resolve("a", "device-data").await.is_err());

        assert_eq!(registry.lookups.load(Ordering::SeqCst), 2);
        assert!(cache.cached("a", "device-data").await.is_none());
    }

    #[tokio::test]
    async fn http_registry_looks_up_topics_with_a_tenant_token() {
        let server = MockServer::start_async().await;
        let token = bearer_token("tenantA", "iotagent");
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/topic/device-data")
                    .header("authorization", format!("Bearer {token}"));
                then.status(200).json_body(json!({"topic": "tenantA.device-data"}));
            })
            .await;

        let registry = HttpTopicRegistry::new(
            reqwest::Client::new(),
            server.base_url(),
            server.url("/admin/tenants"),
            "iotagent",
        );

        let topic = registry
            .lookup_topic("tenantA", "device-data")
            .await
            .expect("topic");

        mock.assert_async().await;
        assert_eq!(topic, "tenantA.device-data");
    }

    #[tokio::test]
    async fn http_registry_lists_tenants_and_reports_bad_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/admin/tenants");
                then.status(200).json_body(json!({"tenants": ["tenantA", "tenantB"]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/topic/device-data");
                then.status(503);
            })
            .await;

        let registry = HttpTopicRegistry::new(
            reqwest::Client::new(),
            server.base_url(),
            server.url("/admin/tenants"),
            "iotagent",
        );

        assert_eq!(
            registry.list_tenants().await.expect("tenants"),
            vec!["tenantA".to_string(), "tenantB".to_string()]
        );
        let err = registry
            .lookup_topic("tenantA", "device-data")
            .await
            .expect_err("status error");
        assert!(matches!(err, TopicResolutionError::Status { status: 503, .. }));
    }
}
