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

//! Resolver cache: format key → rule and raw id → canonical id.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::device::{
    DeviceLifecycleEvent, LifecycleEventType, CONFIGURATION_TYPE, ID_LOCATION_LABEL,
};
use crate::observability::events;
use crate::resolution::resolver_rule::ResolverRule;

const COMPONENT: &str = "id_resolver";

/// Transport-side context of an inbound message.
#[derive(Clone, Copy, Debug)]
pub struct MessageContext<'a> {
    pub topic: &'a str,
}

#[derive(Clone, Default)]
struct ResolverSnapshot {
    rules_by_format_key: HashMap<String, Arc<ResolverRule>>,
    canonical_by_raw_id: HashMap<String, String>,
    // Rules each device registered with its latest snapshot, so an update or removal can
    // retract what the device no longer carries.
    rules_by_device: HashMap<String, Vec<Arc<ResolverRule>>>,
}

impl ResolverSnapshot {
    fn retract(&mut self, canonical_id: &str, rules: &[Arc<ResolverRule>]) {
        for rule in rules {
            let owned_by_device = self
                .rules_by_format_key
                .get(&rule.format_key)
                .is_some_and(|current| current.canonical_id == canonical_id);
            if owned_by_device {
                self.rules_by_format_key.remove(&rule.format_key);
            }

            let mapped_to_device = self
                .canonical_by_raw_id
                .get(&rule.raw_id)
                .is_some_and(|current| current == canonical_id);
            if mapped_to_device {
                self.canonical_by_raw_id.remove(&rule.raw_id);
            }
        }
    }

    fn retract_device(&mut self, canonical_id: &str) {
        if let Some(previous) = self.rules_by_device.remove(canonical_id) {
            self.retract(canonical_id, &previous);
        }
    }

    fn register(&mut self, canonical_id: &str, rules: Vec<Arc<ResolverRule>>) {
        for rule in &rules {
            self.rules_by_format_key
                .insert(rule.format_key.clone(), rule.clone());
            self.canonical_by_raw_id
                .insert(rule.raw_id.clone(), rule.canonical_id.clone());
        }
        if !rules.is_empty() {
            self.rules_by_device.insert(canonical_id.to_string(), rules);
        }
    }
}

/// Identity resolver owning the resolver cache.
#[derive(Clone)]
pub struct IdResolver {
    snapshot: Arc<ArcSwap<ResolverSnapshot>>,
}

impl Default for IdResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdResolver {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(ResolverSnapshot::default())),
        }
    }

    /// Resolves the canonical device id of a message, or `None` when unresolved.
    pub fn resolve(
        &self,
        format_key: &str,
        payload: &Value,
        context: MessageContext<'_>,
    ) -> Option<String> {
        let snapshot = self.snapshot.load();

        let Some(rule) = snapshot.rules_by_format_key.get(format_key) else {
            debug!(
                event = events::RESOLVER_MISS,
                component = COMPONENT,
                format_key,
                reason = "no_rule_for_format_key",
                "format key not found in resolver cache"
            );
            return None;
        };

        let Some(raw_id) = rule.extract_raw_id(payload, context.topic) else {
            debug!(
                event = events::RESOLVER_MISS,
                component = COMPONENT,
                format_key,
                reason = "raw_id_not_extracted",
                "no raw device id in message"
            );
            return None;
        };

        let canonical_id = snapshot.canonical_by_raw_id.get(&raw_id).cloned();
        if canonical_id.is_none() {
            debug!(
                event = events::RESOLVER_MISS,
                component = COMPONENT,
                format_key,
                raw_id = raw_id.as_str(),
                reason = "raw_id_not_registered",
                "raw device id has no canonical mapping"
            );
        }
        canonical_id
    }

    /// Decodes every `id-location` rule carried by the event, skipping invalid ones.
    pub fn extract_rules(event: &DeviceLifecycleEvent) -> Vec<ResolverRule> {
        event
            .attrs
            .attributes()
            .filter(|attr| attr.attr_type == CONFIGURATION_TYPE && attr.label == ID_LOCATION_LABEL)
            .filter_map(|attr| {
                let static_value = attr.non_empty_static_value()?;
                match ResolverRule::from_static_value(static_value, &event.device_id) {
                    Ok(rule) => Some(rule),
                    Err(err) => {
                        warn!(
                            event = events::RESOLVER_RULE_INVALID,
                            component = COMPONENT,
                            device_id = event.device_id.as_str(),
                            err = %err,
                            "ignoring invalid id-location rule"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Applies the rules of one lifecycle event as a single visible change.
    pub fn apply_lifecycle_event(&self, event: &DeviceLifecycleEvent) {
        let device_id = event.device_id.as_str();
        let rules: Vec<Arc<ResolverRule>> = Self::extract_rules(event)
            .into_iter()
            .map(Arc::new)
            .collect();

        match event.event_type {
            LifecycleEventType::Created | LifecycleEventType::Updated => {
                self.snapshot.rcu(|current| {
                    let mut next = ResolverSnapshot::clone(current);
                    next.retract_device(device_id);
                    next.register(device_id, rules.clone());
                    next
                });
                debug!(
                    event = events::RESOLVER_RULES_APPLY,
                    component = COMPONENT,
                    device_id,
                    rule_count = rules.len(),
                    "applied id-location rules"
                );
            }
            LifecycleEventType::Removed => {
                self.snapshot.rcu(|current| {
                    let mut next = ResolverSnapshot::clone(current);
                    next.retract_device(device_id);
                    next.retract(device_id, &rules);
                    next
                });
                debug!(
                    event = events::RESOLVER_RULES_PURGE,
                    component = COMPONENT,
                    device_id,
                    rule_count = rules.len(),
                    "purged id-location rules"
                );
            }
        }
    }

    /// Rule currently registered for `format_key`.
    pub fn rule_for(&self, format_key: &str) -> Option<Arc<ResolverRule>> {
        self.snapshot
            .load()
            .rules_by_format_key
            .get(format_key)
            .cloned()
    }

    /// Canonical id currently mapped to `raw_id`.
    pub fn canonical_id_for(&self, raw_id: &str) -> Option<String> {
        self.snapshot
            .load()
            .canonical_by_raw_id
            .get(raw_id)
            .cloned()
    }
}
