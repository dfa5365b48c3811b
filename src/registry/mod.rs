//! Process-wide directory of entity actors, channel sessions and channel
//! records, plus the notification entry points, stop-all and reload.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::actor::{ActorStats, EntityActor};
use crate::config::{ChannelConfig, ConfigPaths, RuntimeSettings, SessionDescription, Topology};
use crate::crd::CallRecord;
use crate::protocol::{
    parse_fields, BriefState, CallState, ChannelKey, EntityKey, GroupState, MediaState,
    RadioButtonState, RecorderKind,
};
use crate::session::{Connector, Session};

/// Whether a reload is under way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReloadState {
    None,
    Normal,
}

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

pub struct Registry {
    actors: DashMap<EntityKey, Arc<EntityActor>>,
    sessions: DashMap<ChannelKey, SharedSession>,
    records: DashMap<ChannelKey, CallRecord>,

    topology: RwLock<Arc<Topology>>,
    pending: Mutex<Option<Topology>>,
    reload: RwLock<ReloadState>,

    connector: Arc<dyn Connector>,
    settings: RuntimeSettings,
}

impl Registry {
    pub fn new(
        topology: Topology,
        connector: Arc<dyn Connector>,
        settings: RuntimeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            actors: DashMap::new(),
            sessions: DashMap::new(),
            records: DashMap::new(),
            topology: RwLock::new(Arc::new(topology)),
            pending: Mutex::new(None),
            reload: RwLock::new(ReloadState::None),
            connector,
            settings,
        })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    /// Snapshot of the installed topology.
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.read().clone()
    }

    pub fn reload_state(&self) -> ReloadState {
        *self.reload.read()
    }

    fn set_reload(&self, state: ReloadState) {
        *self.reload.write() = state;
    }

    fn install(&self, topology: Topology) {
        info!("{}", topology);
        *self.topology.write() = Arc::new(topology);
    }

    // Actors

    /// Return the live actor for `key`, creating and starting one if there is
    /// none. Concurrent callers with the same key get the same actor.
    pub fn get_or_create(self: &Arc<Self>, key: EntityKey) -> Arc<EntityActor> {
        match self.actors.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let actor = EntityActor::spawn(entry.key().clone(), self);
                entry.insert(actor.clone());
                actor
            }
        }
    }

    pub fn actor(&self, key: &EntityKey) -> Option<Arc<EntityActor>> {
        self.actors.get(key).map(|actor| actor.clone())
    }

    pub fn stats(&self) -> Vec<ActorStats> {
        self.actors.iter().map(|actor| actor.stats()).collect()
    }

    /// Drop everything an entity left behind once its loops have finished.
    pub(crate) async fn release(&self, actor: &EntityActor) {
        let key = actor.key();
        let mut leftover = Vec::new();
        self.sessions.retain(|channel, session| {
            if &channel.entity == key {
                leftover.push(session.clone());
                false
            } else {
                true
            }
        });
        for session in leftover {
            let mut session = session.lock().await;
            if !session.is_closed() {
                warn!("{} still open at teardown, closing", session.key());
                session.close_by_err().await;
            }
        }
        self.records.retain(|channel, _| &channel.entity != key);
        self.actors
            .remove_if(key, |_, live| live.instance_id() == actor.instance_id());
    }

    // Sessions and records

    /// Session of a channel, created on first use.
    pub fn session(
        &self,
        channel: &ChannelKey,
        config: &ChannelConfig,
        description: &SessionDescription,
    ) -> SharedSession {
        self.sessions
            .entry(channel.clone())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(Session::new(
                    channel.clone(),
                    config.clone(),
                    description.clone(),
                )))
            })
            .clone()
    }

    pub fn sessions_of(&self, key: &EntityKey) -> Vec<SharedSession> {
        self.sessions
            .iter()
            .filter(|entry| &entry.key().entity == key)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// True if any session of the entity is currently forwarding audio.
    pub async fn any_forwarding(&self, key: &EntityKey) -> bool {
        for session in self.sessions_of(key) {
            if session.lock().await.is_forwarding() {
                return true;
            }
        }
        false
    }

    pub fn record(&self, channel: &ChannelKey) -> CallRecord {
        self.records
            .get(channel)
            .map(|record| record.clone())
            .unwrap_or_default()
    }

    pub fn store_record(&self, channel: &ChannelKey, record: CallRecord) {
        self.records.insert(channel.clone(), record);
    }

    /// Read-modify-write of a channel record under its shard lock.
    pub fn update_record<F>(&self, channel: &ChannelKey, update: F)
    where
        F: FnOnce(&mut CallRecord),
    {
        let mut record = self.records.entry(channel.clone()).or_default();
        update(record.value_mut());
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_drained(&self) -> bool {
        self.actors.is_empty() && self.sessions.is_empty() && self.records.is_empty()
    }

    // Notification entry points

    /// Admission gates shared by every notification: no reload in progress,
    /// a channel the kind can record on, and an entity that still accepts
    /// notifications.
    fn admit(self: &Arc<Self>, name: &str, kind: RecorderKind, listen_port: u16) -> Option<Arc<EntityActor>> {
        if self.reload_state() != ReloadState::None {
            debug!("Reload in progress, dropping notification for ({}, {})", name, kind);
            return None;
        }
        let topology = self.topology();
        let channels = match kind {
            RecorderKind::Ambient => 1,
            kind if kind.is_group() => topology.group_count(),
            _ => topology.non_group_count(),
        };
        if channels == 0 {
            debug!("No channel records {} entities, dropping notification", kind);
            return None;
        }

        let actor = self.get_or_create(EntityKey::new(name, kind));
        if actor.is_blocked() {
            debug!("{} is winding down, dropping notification", actor.key());
            return None;
        }
        actor.update_listen_port(listen_port);
        Some(actor)
    }

    pub fn on_brief_state(
        self: &Arc<Self>,
        name: &str,
        kind: RecorderKind,
        state: BriefState,
        values: &str,
        ids: &str,
        listen_port: u16,
    ) {
        if let Some(actor) = self.admit(name, kind, listen_port) {
            actor.handle_brief(state, parse_fields(values, ids));
        }
    }

    pub fn on_group_state(
        self: &Arc<Self>,
        name: &str,
        kind: RecorderKind,
        state: GroupState,
        values: &str,
        ids: &str,
        listen_port: u16,
    ) {
        if let Some(actor) = self.admit(name, kind, listen_port) {
            actor.handle_group(state, parse_fields(values, ids));
        }
    }

    pub fn on_radio_state(
        self: &Arc<Self>,
        name: &str,
        kind: RecorderKind,
        state: RadioButtonState,
        values: &str,
        ids: &str,
        listen_port: u16,
    ) {
        if let Some(actor) = self.admit(name, kind, listen_port) {
            actor.handle_radio(state, parse_fields(values, ids));
        }
    }

    pub fn on_call_state(
        self: &Arc<Self>,
        name: &str,
        kind: RecorderKind,
        state: CallState,
        values: &str,
        ids: &str,
        listen_port: u16,
    ) {
        if let Some(actor) = self.admit(name, kind, listen_port) {
            actor.handle_call(state, parse_fields(values, ids));
        }
    }

    pub fn on_call_media_state(
        self: &Arc<Self>,
        name: &str,
        kind: RecorderKind,
        state: MediaState,
        values: &str,
        ids: &str,
        listen_port: u16,
    ) {
        if let Some(actor) = self.admit(name, kind, listen_port) {
            actor.handle_media(state, parse_fields(values, ids));
        }
    }

    // Configuration, stop-all and reload

    /// Read the configuration sources. Without any readable source the
    /// current topology stays. During a reload the result is staged and
    /// installed once the entities have drained.
    pub async fn load_config(&self, paths: &ConfigPaths) -> bool {
        let Some(topology) = paths.load().await else {
            warn!("No configuration source readable, keeping the current topology");
            return false;
        };
        if self.reload_state() == ReloadState::Normal {
            debug!("Reload in progress, staging {} channel(s)", topology.channel_count());
            *self.pending.lock() = Some(topology);
        } else {
            self.install(topology);
        }
        true
    }

    /// Wind every live entity down with the terminal event of its kind and
    /// wait for the directories to empty. A staged topology is installed
    /// afterwards. Returns `false` if the wait timed out.
    pub async fn stop_all_calls(&self) -> bool {
        self.set_reload(ReloadState::Normal);

        let actors: Vec<Arc<EntityActor>> =
            self.actors.iter().map(|actor| actor.value().clone()).collect();
        for actor in actors {
            if actor.wind_down() {
                debug!("{} winding down", actor.key());
            }
        }

        let drained = self.wait_for_release().await;

        let pending = self.pending.lock().take();
        if let Some(topology) = pending {
            self.install(topology);
        }
        self.set_reload(ReloadState::None);
        drained
    }

    /// Stop everything, then install the configuration read from `paths`.
    pub async fn reload(&self, paths: &ConfigPaths) -> bool {
        info!("Reloading recorder configuration");
        self.set_reload(ReloadState::Normal);
        self.load_config(paths).await;
        self.stop_all_calls().await
    }

    async fn wait_for_release(&self) -> bool {
        let deadline = Instant::now() + self.settings.reload_timeout;
        loop {
            if self.is_drained() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Timed out waiting for entities to drain: {} actor(s), {} session(s), {} record(s) left",
                    self.actor_count(),
                    self.session_count(),
                    self.record_count()
                );
                return false;
            }
            sleep(self.settings.reload_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Codec, Ed137Version};
    use crate::crd::Operation;
    use crate::session::{MemoryConnector, SessionState};
    use crate::test_util::eventually;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn channel(address: &str, version: Ed137Version, group: bool) -> ChannelConfig {
        ChannelConfig {
            address: address.to_string(),
            version,
            group,
            ..ChannelConfig::default()
        }
    }

    fn registry(connector: &MemoryConnector, channels: Vec<ChannelConfig>) -> Arc<Registry> {
        registry_with(connector, channels, RuntimeSettings::default())
    }

    fn registry_with(
        connector: &MemoryConnector,
        channels: Vec<ChannelConfig>,
        settings: RuntimeSettings,
    ) -> Arc<Registry> {
        Registry::new(
            Topology::new(channels, Codec::Alaw),
            Arc::new(connector.clone()),
            settings,
        )
    }

    fn rec_paths(rec: &NamedTempFile) -> ConfigPaths {
        ConfigPaths {
            rec_cfg: rec.path().to_path_buf(),
            alt_rec_cfg: PathBuf::from("/nonexistent/rec.cfg"),
            device_system: PathBuf::from("/nonexistent/device_system.cfg"),
            alt_device_system: PathBuf::from("/nonexistent/alt/device_system.cfg"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_or_create_is_unique_per_key() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, Vec::new());
        let key = EntityKey::new("Op1", RecorderKind::Phone);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create(key).instance_id()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.actor_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_radio_tx_key_up_fans_out_and_signals_once() {
        let connector = MemoryConnector::new();
        let registry = registry(
            &connector,
            vec![
                channel("10.0.0.1:8554", Ed137Version::C, false),
                channel("10.0.0.2:8554", Ed137Version::C, false),
            ],
        );
        let key = EntityKey::new("A1", RecorderKind::RadioTx);

        registry.on_radio_state("A1", RecorderKind::RadioTx, RadioButtonState::TxOn, "Pos1", "0", 0);
        assert!(
            eventually(|| {
                (0..2).all(|index| connector.verb_names(&key.channel(index)).len() == 5)
                    && registry.actor(&key).map_or(false, |a| a.stats().forwarding_toggles == 1)
            })
            .await
        );

        for index in 0..2 {
            let channel = key.channel(index);
            assert_eq!(
                connector.verb_names(&channel),
                vec!["CONNECT", "START", "ANNOUNCE", "SET_PARAMETER", "RECORD"]
            );
            assert_eq!(registry.record(&channel).operation(Operation::Ptt).value, "1");
        }
        let actor = registry.actor(&key).unwrap();
        assert_eq!(actor.stats().forwarding_toggles, 1);
        assert!(registry.any_forwarding(&key).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_admission_gates() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, vec![channel("10.0.0.1:8554", Ed137Version::B, false)]);

        // no group channel configured
        registry.on_group_state("", RecorderKind::RadioGroup, GroupState::True, "", "", 0);
        assert_eq!(registry.actor_count(), 0);

        // ambient records everywhere
        registry.on_group_state("", RecorderKind::Ambient, GroupState::True, "Pos1", "0", 0);
        assert_eq!(registry.actor_count(), 1);

        registry.set_reload(ReloadState::Normal);
        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Incoming, "", "", 0);
        assert!(registry.actor(&EntityKey::new("Op1", RecorderKind::Phone)).is_none());
        registry.set_reload(ReloadState::None);

        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Incoming, "Pos1", "0", 41000);
        let actor = registry.actor(&EntityKey::new("Op1", RecorderKind::Phone)).unwrap();
        assert_eq!(actor.listen_port(), 41000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_entity_rejects_notifications() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, vec![channel("10.0.0.1:8554", Ed137Version::B, false)]);
        let key = EntityKey::new("Op1", RecorderKind::Phone);
        let channel = key.channel(0);

        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Incoming, "Pos1", "0", 0);
        assert!(eventually(|| connector.verb_names(&channel).len() == 3).await);
        let actor = registry.actor(&key).unwrap();

        // hold the session so the disconnect cannot finish tearing down
        let session = registry.sessions_of(&key).remove(0);
        let guard = session.lock().await;

        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Disconnected, "", "", 0);
        assert!(actor.is_blocked());
        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Incoming, "Pos1", "0", 0);
        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Confirmed, "", "", 0);

        let same = registry.actor(&key).unwrap();
        assert_eq!(same.instance_id(), actor.instance_id());
        assert_eq!(actor.stats().events_dropped, 0);
        drop(guard);

        assert!(eventually(|| registry.is_drained()).await);
        assert_eq!(actor.stats().events_processed, 2);
        let names = connector.verb_names(&channel);
        assert_eq!(names.iter().filter(|n| **n == "CONNECT").count(), 1);
        assert_eq!(names.last().copied(), Some("CLOSE"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_all_drains_then_reload_swaps_topology() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, vec![channel("10.0.0.1:8554", Ed137Version::B, false)]);
        let key = EntityKey::new("Op1", RecorderKind::Phone);

        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Incoming, "Pos1", "0", 0);
        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Confirmed, "", "", 0);
        assert!(eventually(|| connector.verb_names(&key.channel(0)).last() == Some(&"RECORD")).await);
        assert_eq!(
            registry.sessions_of(&key)[0].lock().await.state(),
            SessionState::Record
        );

        let mut rec = NamedTempFile::new().unwrap();
        writeln!(rec, "rec_ip = 10.2.2.1\nrec_ip = 10.2.2.2\nrec_port = 8554\nrec_port = 8554").unwrap();
        let paths = rec_paths(&rec);

        assert!(registry.reload(&paths).await);
        assert!(registry.is_drained());
        assert_eq!(registry.reload_state(), ReloadState::None);
        assert_eq!(registry.topology().channel_count(), 2);
        assert_eq!(registry.topology().channels[0].address, "10.2.2.1:8554");
        assert_eq!(
            connector.verb_names(&key.channel(0)).last().copied(),
            Some("CLOSE")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reload_times_out_but_installs_topology() {
        let connector = MemoryConnector::new();
        let settings = RuntimeSettings {
            reload_timeout: Duration::from_millis(200),
            reload_poll: Duration::from_millis(20),
            ..RuntimeSettings::default()
        };
        let registry = registry_with(
            &connector,
            vec![channel("10.0.0.1:8554", Ed137Version::B, false)],
            settings,
        );
        let key = EntityKey::new("Op1", RecorderKind::Phone);

        registry.on_call_state("Op1", RecorderKind::Phone, CallState::Incoming, "Pos1", "0", 0);
        assert!(eventually(|| connector.verb_names(&key.channel(0)).len() == 3).await);

        let mut rec = NamedTempFile::new().unwrap();
        writeln!(rec, "rec_ip = 10.4.4.1\nrec_ip = 10.4.4.2\nrec_port = 8554\nrec_port = 8554").unwrap();
        let paths = rec_paths(&rec);

        // a stuck session keeps the entity from draining
        let session = registry.sessions_of(&key).remove(0);
        let guard = session.lock().await;
        let started = Instant::now();
        assert!(!registry.reload(&paths).await);
        assert!(started.elapsed() >= Duration::from_millis(200));

        assert_eq!(registry.reload_state(), ReloadState::None);
        assert_eq!(registry.topology().channel_count(), 2);
        assert_eq!(registry.topology().channels[0].address, "10.4.4.1:8554");
        assert_eq!(registry.actor_count(), 1);
        assert!(registry.actor(&key).unwrap().is_blocked());

        drop(guard);
        assert!(eventually(|| registry.is_drained()).await);
        assert_eq!(
            connector.verb_names(&key.channel(0)).last().copied(),
            Some("CLOSE")
        );
    }

    #[tokio::test]
    async fn test_load_config_keeps_topology_without_sources() {
        let connector = MemoryConnector::new();
        let registry = registry(&connector, vec![channel("10.0.0.1:8554", Ed137Version::B, false)]);
        let paths = ConfigPaths {
            rec_cfg: PathBuf::from("/nonexistent/a"),
            alt_rec_cfg: PathBuf::from("/nonexistent/b"),
            device_system: PathBuf::from("/nonexistent/c"),
            alt_device_system: PathBuf::from("/nonexistent/d"),
        };
        assert!(!registry.load_config(&paths).await);
        assert_eq!(registry.topology().channel_count(), 1);

        // nothing live, nothing staged: stop-all returns at once and keeps it
        assert!(registry.stop_all_calls().await);
        assert_eq!(registry.topology().channel_count(), 1);
    }
}
