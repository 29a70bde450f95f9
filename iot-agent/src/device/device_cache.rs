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

//! Device cache keyed by canonical device identifier.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::device::lifecycle_event::{DeviceLifecycleEvent, LifecycleEventType};
use crate::observability::events;

const COMPONENT: &str = "device_cache";

type DeviceSnapshot = HashMap<String, Arc<DeviceLifecycleEvent>>;

/// Latest schema snapshot per device.
///
/// Readers load an immutable snapshot; each lifecycle event publishes a new one, so a
/// reader never observes half of an update.
#[derive(Clone)]
pub struct DeviceCache {
    snapshot: Arc<ArcSwap<DeviceSnapshot>>,
}

impl Default for DeviceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Looks up the latest snapshot stored for `device_id`.
    pub fn lookup(&self, device_id: &str) -> Option<Arc<DeviceLifecycleEvent>> {
        self.snapshot.load().get(device_id).cloned()
    }

    /// Replaces (`Created`/`Updated`) or deletes (`Removed`) the entry of `event.device_id`.
    pub fn apply_lifecycle_event(&self, event: &DeviceLifecycleEvent) {
        let device_id = event.device_id.as_str();
        match event.event_type {
            LifecycleEventType::Created | LifecycleEventType::Updated => {
                let entry = Arc::new(event.clone());
                self.snapshot.rcu(|current| {
                    let mut next = DeviceSnapshot::clone(current);
                    next.insert(event.device_id.clone(), entry.clone());
                    next
                });
                debug!(
                    event = events::DEVICE_CACHE_UPSERT,
                    component = COMPONENT,
                    device_id,
                    "stored device snapshot"
                );
            }
            LifecycleEventType::Removed => {
                self.snapshot.rcu(|current| {
                    let mut next = DeviceSnapshot::clone(current);
                    next.remove(device_id);
                    next
                });
                debug!(
                    event = events::DEVICE_CACHE_REMOVE,
                    component = COMPONENT,
                    device_id,
                    "removed device snapshot"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceCache;
    use crate::device::{AttributeConfig, DeviceLifecycleEvent, DeviceTemplates, LifecycleEventType};
    use serde_json::{json, Map, Value};

    fn event(event_type: LifecycleEventType, device_id: &str, labels: &[&str]) -> DeviceLifecycleEvent {
        let attrs = labels
            .iter()
            .map(|label| AttributeConfig::new(label, "dynamic", None))
            .collect();
        let mut meta = Map::new();
        meta.insert("service".to_string(), Value::String("tenantA".to_string()));
        DeviceLifecycleEvent::new(
            event_type,
            device_id,
            DeviceTemplates::new(vec![("1".to_string(), attrs)]),
            meta,
        )
    }

    #[test]
    fn created_event_is_returned_by_lookup() {
        let cache = DeviceCache::new();
        let created = event(LifecycleEventType::Created, "dev-1", &["t"]);

        cache.apply_lifecycle_event(&created);

        assert_eq!(cache.lookup("dev-1").as_deref(), Some(&created));
        assert!(cache.lookup("dev-2").is_none());
    }

    #[test]
    fn updated_event_replaces_the_whole_snapshot() {
        let cache = DeviceCache::new();
        cache.apply_lifecycle_event(&event(LifecycleEventType::Created, "dev-1", &["t", "h"]));
        let updated = event(LifecycleEventType::Updated, "dev-1", &["p"]);

        cache.apply_lifecycle_event(&updated);
        cache.apply_lifecycle_event(&updated);

        let stored = cache.lookup("dev-1").expect("device should be cached");
        assert_eq!(*stored, updated);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removed_event_deletes_the_entry() {
        let cache = DeviceCache::new();
        cache.apply_lifecycle_event(&event(LifecycleEventType::Created, "dev-1", &["t"]));

        cache.apply_lifecycle_event(&event(LifecycleEventType::Removed, "dev-1", &[]));

        assert!(cache.lookup("dev-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn readers_keep_their_snapshot_across_updates() {
        let cache = DeviceCache::new();
        cache.apply_lifecycle_event(&event(LifecycleEventType::Created, "dev-1", &["t"]));
        let before = cache.lookup("dev-1").expect("device should be cached");

        cache.apply_lifecycle_event(&event(LifecycleEventType::Removed, "dev-1", &[]));

        assert_eq!(before.meta.get("service"), Some(&json!("tenantA")));
    }
}
