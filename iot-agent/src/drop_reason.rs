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


use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Why an inbound message or a device-manager record was not delivered.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DropReason {
    MalformedPayload,
    UnresolvedIdentity,
    UnknownDevice,
    UnknownNotification,
}

impl DropReason {
    /// Stable value of the `reason` log field.
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::MalformedPayload => "malformed_payload",
            DropReason::UnresolvedIdentity => "unresolved_identity",
            DropReason::UnknownDevice => "unknown_device",
            DropReason::UnknownNotification => "unknown_notification",
        }
    }
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error for DropReason {}
