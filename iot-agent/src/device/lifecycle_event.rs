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

//! Device lifecycle notifications as published by the device manager.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Attribute type of agent configuration attributes.
pub const CONFIGURATION_TYPE: &str = "meta";
/// Attribute type of actuation attributes.
pub const ACTUATOR_TYPE: &str = "actuator";
/// Attribute type of translator instructions.
pub const TRANSLATOR_TYPE: &str = "meta-translator";

/// Configuration label holding a JSON-encoded identity resolution rule.
pub const ID_LOCATION_LABEL: &str = "id-location";
/// Configuration label holding the topic the device publishes to.
pub const DEVICE_TOPIC_LABEL: &str = "topic";
/// Configuration label overriding the topic actuation messages are sent to.
pub const ACTUATE_TOPIC_LABEL: &str = "topic-config";

const TENANT_META_KEY: &str = "service";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventType {
    Created,
    Updated,
    Removed,
}

/// One attribute of a device template.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AttributeConfig {
    pub label: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(
        default,
        deserialize_with = "deserialize_static_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub static_value: Option<String>,
}

impl AttributeConfig {
    pub fn new(label: &str, attr_type: &str, static_value: Option<&str>) -> Self {
        Self {
            label: label.to_string(),
            attr_type: attr_type.to_string(),
            static_value: static_value.map(str::to_string),
        }
    }

    /// Static value, treating an empty string as absent.
    pub fn non_empty_static_value(&self) -> Option<&str> {
        self.static_value
            .as_deref()
            .filter(|value| !value.is_empty())
    }
}

// Device managers are not consistent about static value encoding: numbers and booleans
// show up unquoted next to JSON documents stored as strings.
fn deserialize_static_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Templates of a device, in the order they were declared in the notification.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceTemplates(Vec<(String, Vec<AttributeConfig>)>);

impl DeviceTemplates {
    pub fn new(templates: Vec<(String, Vec<AttributeConfig>)>) -> Self {
        Self(templates)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn templates(&self) -> impl Iterator<Item = (&str, &[AttributeConfig])> {
        self.0
            .iter()
            .map(|(template_id, attrs)| (template_id.as_str(), attrs.as_slice()))
    }

    /// Every attribute, template order first and attribute order second.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeConfig> {
        self.0.iter().flat_map(|(_, attrs)| attrs.iter())
    }
}

impl Serialize for DeviceTemplates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(id, attrs)| (id, attrs)))
    }
}

impl<'de> Deserialize<'de> for DeviceTemplates {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TemplatesVisitor;

        impl<'de> Visitor<'de> for TemplatesVisitor {
            type Value = DeviceTemplates;

            fn expecting(&self, f: &mut Formatter) -> fmt::Result {
                write!(f, "a map of template id to attribute list")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(DeviceTemplates::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut templates = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((template_id, attrs)) =
                    map.next_entry::<String, Vec<AttributeConfig>>()?
                {
                    templates.push((template_id, attrs));
                }
                Ok(DeviceTemplates(templates))
            }
        }

        deserializer.deserialize_any(TemplatesVisitor)
    }
}

/// Latest known schema snapshot of one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceLifecycleEvent {
    pub event_type: LifecycleEventType,
    pub device_id: String,
    pub attrs: DeviceTemplates,
    pub meta: Map<String, Value>,
}

impl DeviceLifecycleEvent {
    pub fn new(
        event_type: LifecycleEventType,
        device_id: &str,
        attrs: DeviceTemplates,
        meta: Map<String, Value>,
    ) -> Self {
        Self {
            event_type,
            device_id: device_id.to_string(),
            attrs,
            meta,
        }
    }

    /// Owning tenant, carried as `meta.service`.
    pub fn tenant(&self) -> Option<&str> {
        self.meta.get(TENANT_META_KEY).and_then(Value::as_str)
    }

    /// Static value of the first attribute with the given type and label.
    pub fn configuration_value(&self, attr_type: &str, label: &str) -> Option<&str> {
        self.attrs
            .attributes()
            .filter(|attr| attr.attr_type == attr_type && attr.label == label)
            .find_map(AttributeConfig::non_empty_static_value)
    }
}

/// Actuation request addressed to one device.
#[derive(Clone, Debug, PartialEq)]
pub struct ActuationRequest {
    pub device_id: String,
    pub payload: Value,
    pub meta: Map<String, Value>,
}

impl ActuationRequest {
    pub fn tenant(&self) -> Option<&str> {
        self.meta.get(TENANT_META_KEY).and_then(Value::as_str)
    }
}

/// A decoded device-manager record.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceNotification {
    Lifecycle(DeviceLifecycleEvent),
    Actuate(ActuationRequest),
}

#[derive(Debug)]
pub enum NotificationParseError {
    Malformed(serde_json::Error),
    UnknownEvent(String),
    InvalidTemplates(serde_json::Error),
}

impl Display for NotificationParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NotificationParseError::Malformed(err) => write!(f, "malformed notification: {err}"),
            NotificationParseError::UnknownEvent(event) => {
                write!(f, "unknown notification event `{event}`")
            }
            NotificationParseError::InvalidTemplates(err) => {
                write!(f, "invalid device templates: {err}")
            }
        }
    }
}

impl Error for NotificationParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NotificationParseError::Malformed(err) | NotificationParseError::InvalidTemplates(err) => {
                Some(err)
            }
            NotificationParseError::UnknownEvent(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct WireNotification {
    event: String,
    data: WireNotificationData,
    #[serde(default)]
    meta: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireNotificationData {
    id: String,
    #[serde(default)]
    attrs: Value,
}

impl DeviceNotification {
    pub fn from_slice(payload: &[u8]) -> Result<Self, NotificationParseError> {
        let wire: WireNotification =
            serde_json::from_slice(payload).map_err(NotificationParseError::Malformed)?;

        let event_type = match wire.event.as_str() {
            "create" | "created" => LifecycleEventType::Created,
            "update" | "updated" => LifecycleEventType::Updated,
            "remove" | "removed" => LifecycleEventType::Removed,
            "actuate" => {
                return Ok(DeviceNotification::Actuate(ActuationRequest {
                    device_id: wire.data.id,
                    payload: wire.data.attrs,
                    meta: wire.meta,
                }))
            }
            _ => return Err(NotificationParseError::UnknownEvent(wire.event)),
        };

        let attrs: DeviceTemplates = serde_json::from_value(wire.data.attrs)
            .map_err(NotificationParseError::InvalidTemplates)?;

        Ok(DeviceNotification::Lifecycle(DeviceLifecycleEvent {
            event_type,
            device_id: wire.data.id,
            attrs,
            meta: wire.meta,
        }))
    }
}
