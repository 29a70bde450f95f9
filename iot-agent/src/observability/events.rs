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

//! Canonical structured event names used across `iot-agent`.

// Inbound pipeline events.
pub const INBOUND_RECEIVE: &str = "inbound_receive";
pub const INBOUND_DROP: &str = "inbound_drop";
pub const INBOUND_DISPATCH: &str = "inbound_dispatch";
pub const TRANSLATION_APPLIED: &str = "translation_applied";
pub const TRANSLATION_FAILED: &str = "translation_failed";
pub const TRANSLATOR_PARSE_FAILED: &str = "translator_parse_failed";
pub const TIME_INSTANT_IGNORED: &str = "time_instant_ignored";

// Lifecycle notification events.
pub const NOTIFICATION_RECEIVE: &str = "notification_receive";
pub const NOTIFICATION_DROP: &str = "notification_drop";
pub const DEVICE_CACHE_UPSERT: &str = "device_cache_upsert";
pub const DEVICE_CACHE_REMOVE: &str = "device_cache_remove";
pub const RESOLVER_RULES_APPLY: &str = "resolver_rules_apply";
pub const RESOLVER_RULES_PURGE: &str = "resolver_rules_purge";
pub const RESOLVER_RULE_INVALID: &str = "resolver_rule_invalid";
pub const RESOLVER_MISS: &str = "resolver_miss";

// Actuation events.
pub const ACTUATION_PUBLISH_ATTEMPT: &str = "actuation_publish_attempt";
pub const ACTUATION_PUBLISH_OK: &str = "actuation_publish_ok";
pub const ACTUATION_PUBLISH_FAILED: &str = "actuation_publish_failed";

// Context-state sink events.
pub const CONTEXT_UPDATE_OK: &str = "context_update_ok";
pub const CONTEXT_UPDATE_FAILED: &str = "context_update_failed";

// Log-based sink events.
pub const LOG_PUBLISH_OK: &str = "log_publish_ok";
pub const LOG_PUBLISH_FAILED: &str = "log_publish_failed";
pub const SINK_NOT_READY: &str = "sink_not_ready";
pub const TOPIC_RESOLVE_OK: &str = "topic_resolve_ok";
pub const TOPIC_RESOLVE_FAILED: &str = "topic_resolve_failed";
pub const TENANT_DISCOVERED: &str = "tenant_discovered";
pub const TENANT_BOOTSTRAP_FAILED: &str = "tenant_bootstrap_failed";
pub const TENANCY_RECORD_IGNORED: &str = "tenancy_record_ignored";
pub const CONSUMER_RECV_FAILED: &str = "consumer_recv_failed";
pub const CONSUMER_FORWARD_FAILED: &str = "consumer_forward_failed";

// Supervised lifecycle events.
pub const LIFECYCLE_INITIALIZING: &str = "lifecycle_initializing";
pub const LIFECYCLE_READY: &str = "lifecycle_ready";
pub const LIFECYCLE_FAULTED: &str = "lifecycle_faulted";
pub const LIFECYCLE_RETRY_SCHEDULED: &str = "lifecycle_retry_scheduled";
pub const LIFECYCLE_RETRY_SUPPRESSED: &str = "lifecycle_retry_suppressed";
pub const LIFECYCLE_FAULT_STALE: &str = "lifecycle_fault_stale";

// Subscribe transport events.
pub const TRANSPORT_STARTING: &str = "transport_starting";
pub const TRANSPORT_CONNECTED: &str = "transport_connected";
pub const TRANSPORT_SUBSCRIBE_OK: &str = "transport_subscribe_ok";
pub const TRANSPORT_SUBSCRIBE_FAILED: &str = "transport_subscribe_failed";
pub const TRANSPORT_FAULT: &str = "transport_fault";
pub const TRANSPORT_FORWARD_FAILED: &str = "transport_forward_failed";
pub const TRANSPORT_STOPPED: &str = "transport_stopped";

// Agent loop events.
pub const AGENT_STARTED: &str = "agent_started";
pub const AGENT_STOPPED: &str = "agent_stopped";
