// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pluggable connectivity and visibility notifiers.
//!
//! The host environment supplies platform-specific providers; the engine
//! only consumes their two-value event streams. From the raw connectivity
//! stream the engine derives a debounced "reconnected" signal: it fires
//! only after a `Lost` followed by an `Available`, and only once
//! `resume_after` has passed with no further `Lost` in between.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Network availability transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Available,
    Lost,
}

/// Application visibility transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    Foreground,
    Background,
}

/// Source of network availability events.
pub trait NetworkObserver: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent>;
}

/// Source of application visibility events.
pub trait VisibilityObserver: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<VisibilityEvent>;
}

/// Channel-backed provider: the host pushes events, the engine subscribes.
/// Doubles as the test double for both observer traits.
pub struct EventNotifier<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventNotifier<E> {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    /// Push an event to every subscriber. A notifier with no subscribers
    /// drops the event silently.
    pub fn notify(&self, event: E) {
        let _ = self.tx.send(event);
    }
}

impl<E: Clone> Default for EventNotifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkObserver for EventNotifier<NetworkEvent> {
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }
}

impl VisibilityObserver for EventNotifier<VisibilityEvent> {
    fn subscribe(&self) -> broadcast::Receiver<VisibilityEvent> {
        self.tx.subscribe()
    }
}

/// Drive `on_reconnect` from loss→available transitions.
///
/// No `Lost` ever observed means no signal, even if `Available` fires.
/// A new `Lost` during the `resume_after` window resets the wait; the
/// next `Available` starts a fresh full window. Runs until the event
/// source closes.
pub async fn on_network_reconnect<F>(
    mut events: broadcast::Receiver<NetworkEvent>,
    resume_after: Duration,
    mut on_reconnect: F,
) where
    F: FnMut(),
{
    let mut saw_lost = false;
    loop {
        match events.recv().await {
            Ok(NetworkEvent::Lost) => {
                debug!("Network lost");
                saw_lost = true;
            }
            Ok(NetworkEvent::Available) if saw_lost => {
                let timer = tokio::time::sleep(resume_after);
                tokio::pin!(timer);
                let fired = loop {
                    tokio::select! {
                        () = &mut timer => break true,
                        event = events.recv() => match event {
                            Ok(NetworkEvent::Lost) => {
                                debug!("Network lost again during resume window");
                                break false;
                            }
                            // Repeated Available does not restart the window.
                            Ok(NetworkEvent::Available) => {}
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(skipped, "Network event stream lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => return,
                        }
                    }
                };
                if fired {
                    info!("Network reconnected");
                    on_reconnect();
                    saw_lost = false;
                }
            }
            Ok(NetworkEvent::Available) => {
                // Available without a prior Lost is not a reconnect.
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Network event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Drive `on_foreground` from background→foreground transitions.
/// The initial `Foreground` of a session does not fire.
pub async fn on_visibility_foreground<F>(
    mut events: broadcast::Receiver<VisibilityEvent>,
    mut on_foreground: F,
) where
    F: FnMut(),
{
    let mut saw_background = false;
    loop {
        match events.recv().await {
            Ok(VisibilityEvent::Background) => saw_background = true,
            Ok(VisibilityEvent::Foreground) if saw_background => {
                info!("Application returned to foreground");
                on_foreground();
                saw_background = false;
            }
            Ok(VisibilityEvent::Foreground) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
