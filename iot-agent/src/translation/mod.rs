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


//! Turns raw inbound messages into schema-filtered device updates.

pub(crate) mod attribute_filter;
pub(crate) mod json_patch;
pub(crate) mod pipeline;

pub use attribute_filter::{filter_registered_attributes, FilterPolicy};
pub use json_patch::{apply, JsonPointer, PatchApplyError, PatchFailure, PatchInstruction};
pub use pipeline::{DeviceUpdate, MetaAttributes, TranslationPipeline, TIME_INSTANT_KEY};
