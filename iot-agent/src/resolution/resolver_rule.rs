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

//! Identity resolution rules decoded from `id-location` attributes.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Where the raw device identifier is found in an inbound message.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum MatchKind {
    #[serde(rename = "mqtt-topic")]
    TopicMatch,
    #[serde(rename = "message-attribute")]
    AttributeMatch,
}

#[derive(Deserialize)]
struct WireResolverRule {
    #[serde(rename = "type")]
    match_kind: MatchKind,
    #[serde(default)]
    attribute_name: Option<String>,
    #[serde(default)]
    regexp: Option<String>,
    id: String,
    xid: String,
}

#[derive(Debug)]
pub enum ResolverRuleError {
    Malformed(serde_json::Error),
    InvalidPattern(regex::Error),
    MissingAttributeName,
}

impl Display for ResolverRuleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResolverRuleError::Malformed(err) => write!(f, "malformed resolver rule: {err}"),
            ResolverRuleError::InvalidPattern(err) => {
                write!(f, "invalid resolver rule pattern: {err}")
            }
            ResolverRuleError::MissingAttributeName => {
                write!(f, "message-attribute rule without attribute_name")
            }
        }
    }
}

impl Error for ResolverRuleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolverRuleError::Malformed(err) => Some(err),
            ResolverRuleError::InvalidPattern(err) => Some(err),
            ResolverRuleError::MissingAttributeName => None,
        }
    }
}

/// One compiled identity resolution rule.
#[derive(Clone, Debug)]
pub struct ResolverRule {
    pub match_kind: MatchKind,
    pub attribute_name: Option<String>,
    pub pattern: Option<Regex>,
    pub raw_id: String,
    pub canonical_id: String,
    pub format_key: String,
}

impl ResolverRule {
    /// Decodes the JSON static value of an `id-location` attribute owned by `canonical_id`.
    pub fn from_static_value(
        static_value: &str,
        canonical_id: &str,
    ) -> Result<Self, ResolverRuleError> {
        let wire: WireResolverRule =
            serde_json::from_str(static_value).map_err(ResolverRuleError::Malformed)?;

        if wire.match_kind == MatchKind::AttributeMatch && wire.attribute_name.is_none() {
            return Err(ResolverRuleError::MissingAttributeName);
        }

        let pattern = wire
            .regexp
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(ResolverRuleError::InvalidPattern)?;

        Ok(Self {
            match_kind: wire.match_kind,
            attribute_name: wire.attribute_name,
            pattern,
            raw_id: wire.id,
            canonical_id: canonical_id.to_string(),
            format_key: wire.xid,
        })
    }

    /// Extracts the raw device identifier; `None` when the data source is missing or the
    /// extracted value is empty.
    pub fn extract_raw_id(&self, payload: &Value, topic: &str) -> Option<String> {
        let data_source = match self.match_kind {
            MatchKind::TopicMatch => topic.to_string(),
            MatchKind::AttributeMatch => {
                let attribute = payload.get(self.attribute_name.as_deref()?)?;
                match attribute {
                    Value::String(text) => text.clone(),
                    Value::Number(_) | Value::Bool(_) => attribute.to_string(),
                    _ => return None,
                }
            }
        };

        let raw_id = match &self.pattern {
            Some(pattern) => pattern.replace_all(&data_source, "${1}").into_owned(),
            None => data_source,
        };

        (!raw_id.is_empty()).then_some(raw_id)
    }
}

impl PartialEq for ResolverRule {
    fn eq(&self, other: &Self) -> bool {
        self.match_kind == other.match_kind
            && self.attribute_name == other.attribute_name
            && self.pattern.as_ref().map(Regex::as_str) == other.pattern.as_ref().map(Regex::as_str)
            && self.raw_id == other.raw_id
            && self.canonical_id == other.canonical_id
            && self.format_key == other.format_key
    }
}
