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

use crate::device::{AttributeConfig, DeviceTemplates, CONFIGURATION_TYPE, TRANSLATOR_TYPE};

/// Which template attributes may admit a payload key.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Any attribute with a matching label, whatever its type.
    #[default]
    LabelOnly,
    /// Like `LabelOnly`, but configuration and translator attributes never admit a key.
    ExcludeConfiguration,
}

impl FilterPolicy {
    fn admits(self, attr: &AttributeConfig) -> bool {
        match self {
            FilterPolicy::LabelOnly => true,
            FilterPolicy::ExcludeConfiguration => {
                attr.attr_type != CONFIGURATION_TYPE && attr.attr_type != TRANSLATOR_TYPE
            }
        }
    }
}

/// Keeps the top-level payload keys that some template attribute declares.
pub fn filter_registered_attributes(
    payload: &Map<String, Value>,
    templates: &DeviceTemplates,
    policy: FilterPolicy,
) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(key, _)| {
            templates
                .attributes()
                .any(|attr| attr.label == key.as_str() && policy.admits(attr))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
