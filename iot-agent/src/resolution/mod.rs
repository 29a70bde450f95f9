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

//! Device identity resolution.
//!
//! Maps a message's format key (usually its inbound topic) plus message content to the
//! canonical device identifier, using the `id-location` rules carried by device templates.

pub(crate) mod id_resolver;
pub(crate) mod resolver_rule;

pub use id_resolver::{IdResolver, MessageContext};
pub use resolver_rule::{MatchKind, ResolverRule, ResolverRuleError};
