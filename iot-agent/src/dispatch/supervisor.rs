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


//! Fixed-delay lifecycle supervision for broker clients.
//!
//! A supervised resource moves `Initializing -> Ready -> Faulted -> Initializing`. A fault
//! drops the live handle and schedules exactly one deferred re-initialization; faults
//! reported while that retry is pending are absorbed.

use futures::future::BoxFuture;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observability::events;

const COMPONENT: &str = "supervisor";

/// Connection-level failure of a log broker client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BrokerFault {
    /// The client could not be created or lost its connection.
    Connection(String),
    /// A single record could not be published; the client itself is still usable.
    Publish(String),
    /// The consumer stream failed.
    Receive(String),
}

impl BrokerFault {
    /// Whether the fault invalidates the client handle.
    pub fn is_fatal_for_client(&self) -> bool {
        !matches!(self, BrokerFault::Publish(_))
    }
}

impl Display for BrokerFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BrokerFault::Connection(msg) => write!(f, "broker connection failed: {msg}"),
            BrokerFault::Publish(msg) => write!(f, "broker publish failed: {msg}"),
            BrokerFault::Receive(msg) => write!(f, "broker receive failed: {msg}"),
        }
    }
}

impl Error for BrokerFault {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    Initializing,
    Ready,
    Faulted,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Faulted => "faulted",
        }
    }
}

pub type Initializer<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<T>, BrokerFault>> + Send + Sync>;

/// Invoked with the fresh handle every time the resource becomes ready.
pub type ReadyHook<T> = Arc<dyn Fn(Arc<T>, Supervisor<T>) + Send + Sync>;

struct Slot<T: ?Sized> {
    state: LifecycleState,
    handle: Option<Arc<T>>,
}

struct SupervisorInner<T: ?Sized> {
    resource: String,
    slot: Mutex<Slot<T>>,
    retry_scheduled: AtomicBool,
    retry_delay: Duration,
    initializer: Initializer<T>,
    on_ready: Option<ReadyHook<T>>,
    shutdown: CancellationToken,
}

impl<T: ?Sized> SupervisorInner<T> {
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        // A poisoned slot still holds a consistent state/handle pair.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Supervisor<T: ?Sized> {
    inner: Arc<SupervisorInner<T>>,
}

impl<T: ?Sized> Clone for Supervisor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Supervisor<T> {
    pub fn new(
        resource: impl Into<String>,
        retry_delay: Duration,
        shutdown: CancellationToken,
        initializer: Initializer<T>,
        on_ready: Option<ReadyHook<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                resource: resource.into(),
                slot: Mutex::new(Slot {
                    state: LifecycleState::Initializing,
                    handle: None,
                }),
                retry_scheduled: AtomicBool::new(false),
                retry_delay,
                initializer,
                on_ready,
                shutdown,
            }),
        }
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    /// Kicks off the first initialization attempt.
    pub fn start(&self) {
        if self.inner.retry_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.schedule(Duration::ZERO);
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.slot().state
    }

    /// Live handle, only while `Ready`.
    pub fn handle(&self) -> Option<Arc<T>> {
        let slot = self.inner.slot();
        match slot.state {
            LifecycleState::Ready => slot.handle.clone(),
            _ => None,
        }
    }

    /// Reports that `handle` failed. Faults from a handle that is no longer the current one
    /// are ignored, so a late failure of a replaced client cannot discard its successor.
    ///
    /// Returns whether the fault was applied.
    pub fn report_fault(&self, handle: &Arc<T>, fault: &BrokerFault) -> bool {
        let current = {
            let slot = self.inner.slot();
            slot.handle
                .as_ref()
                .is_some_and(|current| same_handle(current, handle))
        };
        if !current {
            debug!(
                event = events::LIFECYCLE_FAULT_STALE,
                component = COMPONENT,
                resource = self.inner.resource.as_str(),
                err = %fault,
                "ignoring fault from a replaced handle"
            );
            return false;
        }
        self.mark_faulted(fault);
        true
    }

    // Marks the resource faulted and schedules one re-initialization after the retry delay.
    fn mark_faulted(&self, fault: &BrokerFault) {
        {
            let mut slot = self.inner.slot();
            slot.state = LifecycleState::Faulted;
            slot.handle = None;
        }
        warn!(
            event = events::LIFECYCLE_FAULTED,
            component = COMPONENT,
            resource = self.inner.resource.as_str(),
            err = %fault,
            "resource faulted"
        );

        if self.inner.retry_scheduled.swap(true, Ordering::SeqCst) {
            debug!(
                event = events::LIFECYCLE_RETRY_SUPPRESSED,
                component = COMPONENT,
                resource = self.inner.resource.as_str(),
                "retry already pending"
            );
            return;
        }

        info!(
            event = events::LIFECYCLE_RETRY_SCHEDULED,
            component = COMPONENT,
            resource = self.inner.resource.as_str(),
            delay_ms = self.inner.retry_delay.as_millis() as u64,
            "scheduling re-initialization"
        );
        self.schedule(self.inner.retry_delay);
    }

    fn schedule(&self, delay: Duration) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = supervisor.inner.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            supervisor.initialize().await;
        });
    }

    async fn initialize(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.slot().state = LifecycleState::Initializing;
        self.inner.retry_scheduled.store(false, Ordering::SeqCst);
        debug!(
            event = events::LIFECYCLE_INITIALIZING,
            component = COMPONENT,
            resource = self.inner.resource.as_str(),
            "initializing resource"
        );

        match (self.inner.initializer)().await {
            Ok(handle) => {
                {
                    let mut slot = self.inner.slot();
                    slot.state = LifecycleState::Ready;
                    slot.handle = Some(handle.clone());
                }
                info!(
                    event = events::LIFECYCLE_READY,
                    component = COMPONENT,
                    resource = self.inner.resource.as_str(),
                    "resource ready"
                );
                if let Some(on_ready) = &self.inner.on_ready {
                    on_ready(handle, self.clone());
                }
            }
            Err(fault) => self.mark_faulted(&fault),
        }
    }
}

fn same_handle<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    // Compare data pointers only; vtable pointers of the same type may differ.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
