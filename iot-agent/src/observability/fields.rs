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

//! Canonical structured field keys and value-format helpers.

pub const EVENT: &str = "event";
pub const COMPONENT: &str = "component";
pub const TOPIC: &str = "topic";
pub const DEVICE_ID: &str = "device_id";
pub const TENANT: &str = "tenant";
pub const SUBJECT: &str = "subject";
pub const RESOURCE: &str = "resource";
pub const REASON: &str = "reason";
pub const ERR: &str = "err";

pub const NONE: &str = "none";
pub const PAYLOAD_PREVIEW_MAX_LEN: usize = 256;

/// Renders at most [`PAYLOAD_PREVIEW_MAX_LEN`] characters of a raw payload for debug logs.
pub fn format_payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= PAYLOAD_PREVIEW_MAX_LEN {
        text.into_owned()
    } else {
        let mut preview: String = text.chars().take(PAYLOAD_PREVIEW_MAX_LEN).collect();
        preview.push_str("...");
        preview
    }
}

pub fn format_optional(value: Option<&str>) -> &str {
    value.unwrap_or(NONE)
}
