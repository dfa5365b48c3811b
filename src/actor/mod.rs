//! Entity actors.
//!
//! One actor per (name, kind). Notifications are admitted into a single
//! bounded mailbox and processed in order by the control loop, which updates
//! every channel's call record and then drives all channels concurrently.
//! A dormancy loop debounces hold and radio-off flicker, and an audio
//! pipeline forwards captured packets while at least one channel records.

mod dormancy;
pub mod transition;

pub use transition::{execute, hold_party, plan, Action};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Topology;
use crate::media::AudioPipeline;
use crate::protocol::{
    BriefState, CallState, EntityKey, Event, EventKind, FieldValue, GroupState, MediaState,
    RadioButtonState,
};
use crate::registry::Registry;
use crate::session::SessionState;
use dormancy::Dormancy;

/// Snapshot of an actor's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ActorStats {
    pub instance_id: Uuid,
    pub key: EntityKey,
    pub created_at: DateTime<Utc>,
    pub events_processed: u64,
    pub events_dropped: u64,
    pub forwarding_toggles: u64,
    pub packets_forwarded: u64,
    pub dormant: bool,
    pub blocked: bool,
    pub listen_port: u16,
}

#[derive(Debug, Default)]
struct Counters {
    events_processed: AtomicU64,
    events_dropped: AtomicU64,
    forwarding_toggles: AtomicU64,
    packets_forwarded: AtomicU64,
}

pub struct EntityActor {
    key: EntityKey,
    instance_id: Uuid,
    created_at: DateTime<Utc>,

    mailbox: mpsc::Sender<Event>,
    last_radio: watch::Sender<Option<Event>>,
    last_media: watch::Sender<Option<Event>>,
    forwarding: watch::Sender<bool>,
    listen_port: watch::Sender<u16>,

    dormant: AtomicBool,
    blocked: AtomicBool,
    done: CancellationToken,
    counters: Counters,
}

impl EntityActor {
    /// Create the actor and start its loops on the current runtime.
    pub(crate) fn spawn(key: EntityKey, registry: &Arc<Registry>) -> Arc<Self> {
        let settings = registry.settings();
        let (mailbox, inbox) = mpsc::channel(key.kind.mailbox_capacity(settings.mailbox_capacity));
        let (last_radio, _) = watch::channel(None);
        let (last_media, _) = watch::channel(None);
        let (forwarding, _) = watch::channel(false);
        let (listen_port, _) = watch::channel(0);

        let actor = Arc::new(Self {
            key,
            instance_id: Uuid::new_v4(),
            created_at: Utc::now(),
            mailbox,
            last_radio,
            last_media,
            forwarding,
            listen_port,
            dormant: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
            done: CancellationToken::new(),
            counters: Counters::default(),
        });

        let dormancy = Dormancy::new(actor.clone(), settings.dormancy_delay);
        let pipeline = AudioPipeline::new(actor.clone(), registry.clone());
        tokio::spawn(actor.clone().run(registry.clone(), inbox, dormancy, pipeline));
        actor
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn listen_port(&self) -> u16 {
        *self.listen_port.borrow()
    }

    /// Point the audio capture at a new local port. Zero and the current
    /// port are ignored.
    pub fn update_listen_port(&self, port: u16) {
        if port != 0 && port != self.listen_port() {
            self.listen_port.send_replace(port);
        }
    }

    pub fn stats(&self) -> ActorStats {
        ActorStats {
            instance_id: self.instance_id,
            key: self.key.clone(),
            created_at: self.created_at,
            events_processed: self.counters.events_processed.load(Ordering::Relaxed),
            events_dropped: self.counters.events_dropped.load(Ordering::Relaxed),
            forwarding_toggles: self.counters.forwarding_toggles.load(Ordering::Relaxed),
            packets_forwarded: self.counters.packets_forwarded.load(Ordering::Relaxed),
            dormant: self.is_dormant(),
            blocked: self.is_blocked(),
            listen_port: self.listen_port(),
        }
    }

    // Admission

    /// Non-blocking enqueue; a full mailbox drops the event.
    fn offer(&self, event: Event) -> bool {
        match self.mailbox.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("{} mailbox full, dropping {:?}", self.key, event.kind);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue, and stop admitting further notifications if the event ends
    /// the entity.
    fn offer_final(&self, event: Event) -> bool {
        let terminal = event.kind.is_terminal();
        let accepted = self.offer(event);
        if accepted && terminal {
            self.blocked.store(true, Ordering::Release);
        }
        accepted
    }

    pub fn handle_brief(&self, state: BriefState, fields: Vec<FieldValue>) {
        self.offer_final(Event::with_fields(EventKind::Brief(state), fields));
    }

    pub fn handle_group(&self, state: GroupState, fields: Vec<FieldValue>) {
        self.offer_final(Event::with_fields(EventKind::Group(state), fields));
    }

    pub fn handle_call(&self, state: CallState, fields: Vec<FieldValue>) {
        self.offer_final(Event::with_fields(EventKind::Call(state), fields));
    }

    pub fn handle_radio(&self, state: RadioButtonState, fields: Vec<FieldValue>) {
        let event = Event::with_fields(EventKind::Radio(state), fields);
        if state == RadioButtonState::Invalid {
            self.offer_final(event);
        } else if state.is_on() && !self.is_dormant() {
            self.offer(event);
        } else {
            self.last_radio.send_replace(Some(event));
        }
    }

    pub fn handle_media(&self, state: MediaState, fields: Vec<FieldValue>) {
        let event = Event::with_fields(EventKind::Media(state), fields);
        if state == MediaState::Active && !self.is_dormant() {
            self.offer(event);
        } else {
            self.last_media.send_replace(Some(event));
        }
    }

    /// Push the terminal event for this kind, as stop-all does. Returns
    /// `false` if the entity was already blocked or its mailbox was full.
    pub fn wind_down(&self) -> bool {
        if self.is_blocked() {
            return false;
        }
        self.offer_final(Event::new(EventKind::terminal_for(self.key.kind)))
    }

    // Loop plumbing

    pub(crate) fn subscribe_forwarding(&self) -> watch::Receiver<bool> {
        self.forwarding.subscribe()
    }

    pub(crate) fn subscribe_listen_port(&self) -> watch::Receiver<u16> {
        self.listen_port.subscribe()
    }

    pub(crate) fn subscribe_last_radio(&self) -> watch::Receiver<Option<Event>> {
        self.last_radio.subscribe()
    }

    pub(crate) fn subscribe_last_media(&self) -> watch::Receiver<Option<Event>> {
        self.last_media.subscribe()
    }

    pub(crate) fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    pub(crate) fn set_dormant(&self, dormant: bool) {
        self.dormant.store(dormant, Ordering::Release);
    }

    pub(crate) fn record_forwarded(&self, packets: u64) {
        self.counters
            .packets_forwarded
            .fetch_add(packets, Ordering::Relaxed);
    }

    /// Blocking enqueue used for replays; gives up once the entity is done.
    pub(crate) async fn deliver(&self, event: Event) {
        tokio::select! {
            _ = self.done.cancelled() => {}
            sent = self.mailbox.send(event) => {
                if sent.is_err() {
                    debug!("{} mailbox closed, replay dropped", self.key);
                }
            }
        }
    }

    fn set_forwarding(&self, on: bool) {
        self.counters
            .forwarding_toggles
            .fetch_add(1, Ordering::Relaxed);
        self.forwarding.send_replace(on);
    }

    // Control loop

    async fn run(
        self: Arc<Self>,
        registry: Arc<Registry>,
        mut inbox: mpsc::Receiver<Event>,
        dormancy: Dormancy,
        pipeline: AudioPipeline,
    ) {
        info!("Entity {} started ({})", self.key, self.instance_id);
        let dormancy = tokio::spawn(dormancy.run());
        let pipeline = tokio::spawn(pipeline.run());

        loop {
            tokio::select! {
                _ = self.done.cancelled() => break,
                event = inbox.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let terminal = event.kind.is_terminal();
                    self.process(&registry, event).await;
                    if terminal {
                        self.done.cancel();
                    }
                }
            }
        }

        if let Err(e) = dormancy.await {
            error!("{} dormancy loop failed: {}", self.key, e);
        }
        match pipeline.await {
            Ok(packets) => debug!("{} audio pipeline forwarded {} packets", self.key, packets),
            Err(e) => error!("{} audio pipeline failed: {}", self.key, e),
        }

        registry.release(&self).await;
        info!("Entity {} finished", self.key);
    }

    async fn process(self: &Arc<Self>, registry: &Arc<Registry>, event: Event) {
        self.counters.events_processed.fetch_add(1, Ordering::Relaxed);
        debug!("{} processing {:?}", self.key, event.kind);

        let topology = registry.topology();
        let channels: Vec<usize> = topology
            .channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| self.key.kind.records_on(channel.group))
            .map(|(index, _)| index)
            .collect();

        let updates = channels
            .iter()
            .map(|&index| self.apply_fields(registry, &topology, index, &event.fields));
        join_all(updates).await;

        let signal = Arc::new(AtomicBool::new(false));
        let mut workers = JoinSet::new();
        for index in channels {
            let actor = self.clone();
            let registry = registry.clone();
            let topology = topology.clone();
            let signal = signal.clone();
            let kind = event.kind;
            workers.spawn(async move {
                actor
                    .drive_channel(&registry, &topology, index, kind, &signal)
                    .await
            });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("{} channel worker failed: {}", self.key, e);
            }
        }
    }

    async fn apply_fields(
        &self,
        registry: &Registry,
        topology: &Topology,
        index: usize,
        fields: &[FieldValue],
    ) {
        let Some(config) = topology.channel(index) else {
            return;
        };
        let channel = self.key.channel(index);
        let session = registry.session(&channel, config, &topology.description);
        let state = session.lock().await.state();
        let kind = self.key.kind;
        registry.update_record(&channel, |record| {
            if matches!(state, SessionState::Null | SessionState::Disconnect) {
                record.reset_connection_ref();
            }
            record.apply_fields(fields, config.version, kind);
        });
    }

    async fn drive_channel(
        &self,
        registry: &Registry,
        topology: &Topology,
        index: usize,
        event: EventKind,
        signal: &AtomicBool,
    ) {
        let Some(config) = topology.channel(index) else {
            return;
        };
        let channel = self.key.channel(index);
        let session = registry.session(&channel, config, &topology.description);
        let mut session = session.lock().await;
        let mut record = registry.record(&channel);

        let (action, forwarding) = plan(self.key.kind, event, &session);
        if action != Action::Skip {
            debug!("{} {:?} -> {:?}", channel, event, action);
        }
        execute(action, &mut session, &mut record, registry.connector()).await;
        registry.store_record(&channel, record);
        drop(session);

        if let Some(on) = forwarding {
            if !signal.swap(true, Ordering::AcqRel) {
                self.set_forwarding(on);
            }
        }
    }
}
