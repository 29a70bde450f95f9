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


use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::device::{DeviceCache, DeviceTemplates, TRANSLATOR_TYPE};
use crate::drop_reason::DropReason;
use crate::observability::events;
use crate::resolution::{IdResolver, MessageContext};
use crate::translation::attribute_filter::{filter_registered_attributes, FilterPolicy};
use crate::translation::json_patch::{self, PatchInstruction};

const COMPONENT: &str = "translation_pipeline";

/// Payload key carrying the sample timestamp.
pub const TIME_INSTANT_KEY: &str = "TimeInstant";

/// Meta attributes travelling next to the filtered attribute set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetaAttributes {
    pub time_instant: Option<String>,
}

/// Normalized update ready for a sink.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceUpdate {
    pub tenant: String,
    pub device_id: String,
    pub attributes: Map<String, Value>,
    pub meta: MetaAttributes,
}

// A translator static value is either a list of instructions or a single one.
#[derive(Deserialize)]
#[serde(untagged)]
enum TranslatorDocument {
    Many(Vec<PatchInstruction>),
    One(PatchInstruction),
}

/// Resolve, look up, translate and filter.
#[derive(Clone)]
pub struct TranslationPipeline {
    resolver: IdResolver,
    devices: DeviceCache,
    filter_policy: FilterPolicy,
}

impl TranslationPipeline {
    pub fn new(resolver: IdResolver, devices: DeviceCache, filter_policy: FilterPolicy) -> Self {
        Self {
            resolver,
            devices,
            filter_policy,
        }
    }

    pub fn handle_inbound(
        &self,
        format_key: &str,
        raw_message: &[u8],
        context: MessageContext<'_>,
    ) -> Result<DeviceUpdate, DropReason> {
        let payload: Value = serde_json::from_slice(raw_message).map_err(|err| {
            debug!(
                event = events::INBOUND_DROP,
                component = COMPONENT,
                topic = context.topic,
                reason = DropReason::MalformedPayload.as_str(),
                err = %err,
                "dropping unparsable message"
            );
            DropReason::MalformedPayload
        })?;

        let Some(device_id) = self.resolver.resolve(format_key, &payload, context) else {
            debug!(
                event = events::INBOUND_DROP,
                component = COMPONENT,
                topic = context.topic,
                reason = DropReason::UnresolvedIdentity.as_str(),
                "no device id detected"
            );
            return Err(DropReason::UnresolvedIdentity);
        };

        let Some(device) = self.devices.lookup(&device_id) else {
            debug!(
                event = events::INBOUND_DROP,
                component = COMPONENT,
                topic = context.topic,
                device_id = device_id.as_str(),
                reason = DropReason::UnknownDevice.as_str(),
                "device not found in cache"
            );
            return Err(DropReason::UnknownDevice);
        };

        let translated = translate(&device_id, &device.attrs, payload);

        let time_instant = translated.get(TIME_INSTANT_KEY).and_then(|value| {
            let text = time_instant_text(value);
            if text.is_none() {
                debug!(
                    event = events::TIME_INSTANT_IGNORED,
                    component = COMPONENT,
                    device_id = device_id.as_str(),
                    "ignoring structured TimeInstant"
                );
            }
            text
        });

        let attributes = match &translated {
            Value::Object(map) => filter_registered_attributes(map, &device.attrs, self.filter_policy),
            _ => Map::new(),
        };

        Ok(DeviceUpdate {
            tenant: device.tenant().unwrap_or_default().to_string(),
            device_id,
            attributes,
            meta: MetaAttributes { time_instant },
        })
    }
}

// Numbers and booleans travel as their JSON text, the way static values do.
fn time_instant_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Concatenates every translator instruction list, template order first.
pub(crate) fn collect_translators(
    templates: &DeviceTemplates,
) -> Result<Vec<PatchInstruction>, serde_json::Error> {
    let mut instructions = Vec::new();
    for attr in templates
        .attributes()
        .filter(|attr| attr.attr_type == TRANSLATOR_TYPE)
    {
        let Some(static_value) = attr.non_empty_static_value() else {
            continue;
        };
        let document: TranslatorDocument = serde_json::from_str(static_value)?;
        match document {
            TranslatorDocument::Many(list) => instructions.extend(list),
            TranslatorDocument::One(single) => instructions.push(single),
        }
    }
    Ok(instructions)
}

// Best effort: any translator problem yields the untouched payload.
fn translate(device_id: &str, templates: &DeviceTemplates, payload: Value) -> Value {
    let instructions = match collect_translators(templates) {
        Ok(instructions) if instructions.is_empty() => return payload,
        Ok(instructions) => instructions,
        Err(err) => {
            warn!(
                event = events::TRANSLATOR_PARSE_FAILED,
                component = COMPONENT,
                device_id,
                err = %err,
                "ignoring unparsable translator"
            );
            return payload;
        }
    };

    match json_patch::apply(&payload, &instructions) {
        Ok(translated) => {
            debug!(
                event = events::TRANSLATION_APPLIED,
                component = COMPONENT,
                device_id,
                instructions = instructions.len(),
                "message translated"
            );
            translated
        }
        Err(err) => {
            warn!(
                event = events::TRANSLATION_FAILED,
                component = COMPONENT,
                device_id,
                err = %err,
                "translation failed, forwarding untranslated message"
            );
            payload
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{collect_translators, TranslationPipeline};
    use crate::device::{
        AttributeConfig, DeviceCache, DeviceLifecycleEvent, DeviceTemplates, LifecycleEventType,
    };
    use crate::drop_reason::DropReason;
    use crate::resolution::{IdResolver, MessageContext};
    use crate::translation::FilterPolicy;
    use serde_json::{json, Map, Value};

    const TOPIC: &str = "/tenantA/sensor-07/attrs";

    fn id_location() -> AttributeConfig {
        let rule = json!({
            "type": "mqtt-topic",
            "regexp": "^/[^/]+/([^/]+)/attrs$",
            "id": "sensor-07",
            "xid": TOPIC,
        });
        AttributeConfig::new("id-location", "meta", Some(&rule.to_string()))
    }

    fn translator(raw: Value) -> AttributeConfig {
        AttributeConfig::new("translator", "meta-translator", Some(&raw.to_string()))
    }

    fn pipeline_with(attrs: Vec<AttributeConfig>) -> TranslationPipeline {
        let mut meta = Map::new();
        meta.insert("service".to_string(), json!("tenantA"));
        let event = DeviceLifecycleEvent::new(
            LifecycleEventType::Created,
            "dev-1",
            DeviceTemplates::new(vec![("1".to_string(), attrs)]),
            meta,
        );
        let resolver = IdResolver::new();
        let devices = DeviceCache::new();
        resolver.apply_lifecycle_event(&event);
        devices.apply_lifecycle_event(&event);
        TranslationPipeline::new(resolver, devices, FilterPolicy::LabelOnly)
    }

    fn inbound(pipeline: &TranslationPipeline, payload: &str) -> Result<super::DeviceUpdate, DropReason> {
        pipeline.handle_inbound(TOPIC, payload.as_bytes(), MessageContext { topic: TOPIC })
    }

    #[test]
    fn translated_payload_is_filtered_and_timestamped() {
        let pipeline = pipeline_with(vec![
            id_location(),
            AttributeConfig::new("temperature", "dynamic", None),
            translator(json!([{"op": "move", "from": "/t", "path": "/temperature"}])),
        ]);

        let update = inbound(&pipeline, r#"{"t":"21.5","TimeInstant":"2023-01-01T00:00:00Z"}"#)
            .expect("update");

        assert_eq!(update.tenant, "tenantA");
        assert_eq!(update.device_id, "dev-1");
        assert_eq!(Value::Object(update.attributes), json!({"temperature": "21.5"}));
        assert_eq!(update.meta.time_instant.as_deref(), Some("2023-01-01T00:00:00Z"));
    }

    #[test]
    fn failing_translator_falls_back_to_the_original_payload() {
        let pipeline = pipeline_with(vec![
            id_location(),
            AttributeConfig::new("t", "dynamic", None),
            AttributeConfig::new("extra", "dynamic", None),
            translator(json!([
                {"op": "add", "path": "/extra", "value": 1},
                {"op": "test", "path": "/t", "value": "never"},
            ])),
        ]);

        let update = inbound(&pipeline, r#"{"t":"21.5"}"#).expect("update");

        assert_eq!(Value::Object(update.attributes), json!({"t": "21.5"}));
    }

    #[test]
    fn unparsable_translator_does_not_block_delivery() {
        let pipeline = pipeline_with(vec![
            id_location(),
            AttributeConfig::new("t", "dynamic", None),
            AttributeConfig::new("translator", "meta-translator", Some("not a patch")),
        ]);

        let update = inbound(&pipeline, r#"{"t":1}"#).expect("update");

        assert_eq!(Value::Object(update.attributes), json!({"t": 1}));
    }

    #[test]
    fn translators_concatenate_in_template_then_attribute_order() {
        let templates = DeviceTemplates::new(vec![
            (
                "b".to_string(),
                vec![translator(json!({"op": "add", "path": "/first", "value": 1}))],
            ),
            (
                "a".to_string(),
                vec![
                    translator(json!([{"op": "add", "path": "/second", "value": 2}])),
                    AttributeConfig::new("translator", "meta-translator", Some("")),
                    AttributeConfig::new("translator", "dynamic", Some("ignored")),
                    translator(json!([{"op": "remove", "path": "/first"}])),
                ],
            ),
        ]);

        let instructions = collect_translators(&templates).expect("translators parse");
        let ops: Vec<&str> = instructions.iter().map(|i| i.op_name()).collect();

        assert_eq!(ops, ["add", "add", "remove"]);
    }

    #[test]
    fn drop_points_report_distinct_reasons() {
        let pipeline = pipeline_with(vec![id_location()]);
        assert_eq!(inbound(&pipeline, "{not json").err(), Some(DropReason::MalformedPayload));

        let unresolved = pipeline.handle_inbound(
            "/other/topic",
            b"{}",
            MessageContext { topic: "/other/topic" },
        );
        assert_eq!(unresolved.err(), Some(DropReason::UnresolvedIdentity));

        let resolver = IdResolver::new();
        let event = DeviceLifecycleEvent::new(
            LifecycleEventType::Created,
            "dev-1",
            DeviceTemplates::new(vec![("1".to_string(), vec![id_location()])]),
            Map::new(),
        );
        resolver.apply_lifecycle_event(&event);
        let uncached = TranslationPipeline::new(resolver, DeviceCache::new(), FilterPolicy::LabelOnly);
        assert_eq!(inbound(&uncached, "{}").err(), Some(DropReason::UnknownDevice));
    }

    #[test]
    fn non_object_payload_yields_no_attributes() {
        let pipeline = pipeline_with(vec![id_location(), AttributeConfig::new("t", "dynamic", None)]);

        let update = inbound(&pipeline, "[1,2,3]").expect("update");

        assert!(update.attributes.is_empty());
        assert_eq!(update.meta.time_instant, None);
    }

    #[test]
    fn numeric_time_instant_is_kept_as_text() {
        let pipeline = pipeline_with(vec![id_location(), AttributeConfig::new("t", "dynamic", None)]);

        let epoch = inbound(&pipeline, r#"{"t":1,"TimeInstant":1672531200000}"#).expect("update");
        assert_eq!(epoch.meta.time_instant.as_deref(), Some("1672531200000"));

        let structured = inbound(&pipeline, r#"{"t":1,"TimeInstant":{"at":1}}"#).expect("update");
        assert_eq!(structured.meta.time_instant, None);
        assert_eq!(Value::Object(structured.attributes), json!({"t": 1}));
    }
}
