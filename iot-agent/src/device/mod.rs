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

//! Device schema model and the device cache fed by lifecycle notifications.

pub(crate) mod device_cache;
pub(crate) mod lifecycle_event;

pub use device_cache::DeviceCache;
pub use lifecycle_event::{
    ActuationRequest, AttributeConfig, DeviceLifecycleEvent, DeviceNotification, DeviceTemplates,
    LifecycleEventType, NotificationParseError, ACTUATE_TOPIC_LABEL, ACTUATOR_TYPE,
    CONFIGURATION_TYPE, DEVICE_TOPIC_LABEL, ID_LOCATION_LABEL, TRANSLATOR_TYPE,
};
