use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::EntityActor;
use crate::protocol::{Event, EventKind, MediaState, RadioButtonState};

/// Debounce of hold and radio-off flicker.
///
/// Radio-off and hold notifications land in the actor's overwrite-latest
/// slots. The first radio-off of an entity passes straight through and stays
/// pending; later ones, and every hold, put the entity to sleep for `delay`.
/// On wake-up the latest radio state is replayed, or the latest media state
/// if no radio state is pending.
pub(crate) struct Dormancy {
    actor: Arc<EntityActor>,
    radio: watch::Receiver<Option<Event>>,
    media: watch::Receiver<Option<Event>>,
    done: CancellationToken,
    delay: Duration,
}

impl Dormancy {
    pub(crate) fn new(actor: Arc<EntityActor>, delay: Duration) -> Self {
        Self {
            radio: actor.subscribe_last_radio(),
            media: actor.subscribe_last_media(),
            done: actor.done_token(),
            actor,
            delay,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut last_radio: Option<Event> = None;
        let mut last_media: Option<Event> = None;
        let mut last_put = RadioButtonState::Invalid;
        let mut wake: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                _ = self.done.cancelled() => break,

                _ = expired(&mut wake) => {
                    wake = None;
                    self.actor.set_dormant(false);
                    if let Some(event) = last_radio.take() {
                        if let EventKind::Radio(state) = event.kind {
                            last_put = state;
                        }
                        debug!("{} waking up, replaying {:?}", self.actor.key(), event.kind);
                        self.actor.deliver(event).await;
                    } else if let Some(event) = last_media.take() {
                        if event.kind != EventKind::Media(MediaState::None) {
                            debug!("{} waking up, replaying {:?}", self.actor.key(), event.kind);
                            self.actor.deliver(event).await;
                        }
                    }
                }

                changed = self.radio.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = self.radio.borrow_and_update().clone();
                    let Some(event) = latest else {
                        continue;
                    };
                    let EventKind::Radio(state) = event.kind else {
                        continue;
                    };
                    last_radio = Some(event.clone());
                    if self.actor.is_dormant() || !state.is_off() {
                        continue;
                    }
                    if last_put == RadioButtonState::Invalid {
                        // passes through, and stays pending for the next wake-up
                        last_put = state;
                        self.actor.deliver(event).await;
                    } else {
                        wake = Some(self.go_dormant());
                    }
                }

                changed = self.media.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = self.media.borrow_and_update().clone();
                    let Some(event) = latest else {
                        continue;
                    };
                    let hold = matches!(event.kind, EventKind::Media(state) if state.is_hold());
                    last_media = Some(event);
                    if hold && !self.actor.is_dormant() {
                        wake = Some(self.go_dormant());
                    }
                }
            }
        }
    }

    fn go_dormant(&self) -> Pin<Box<Sleep>> {
        debug!("{} going dormant for {:?}", self.actor.key(), self.delay);
        self.actor.set_dormant(true);
        Box::pin(sleep(self.delay))
    }
}

async fn expired(wake: &mut Option<Pin<Box<Sleep>>>) {
    match wake {
        Some(timer) => timer.as_mut().await,
        None => futures::future::pending::<()>().await,
    }
}
