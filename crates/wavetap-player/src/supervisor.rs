//! Playback session supervision.
//!
//! One [`ProcessSupervisor`] owns at most one session at a time: a Player
//! process, a Sampler process and the worker thread that meters the Sampler's
//! PCM. All control calls (`start`/`stop`/`pause`/`resume`) happen on the
//! caller's thread; the worker only touches the Sampler slot, and only to
//! replace a Sampler that has exited.

use std::process::{Child, ChildStdout, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use wavetap_types::SessionState;

use crate::config::{CommandTemplate, SupervisorConfig};
use crate::error::{ProcessRole, Result, SupervisorError};
use crate::extractor::{ExtractorExit, ExtractorSettings, SampleExtractor, SamplerLink};
use crate::levels::LevelBuffer;
use crate::process::{self, SpawnRequest};
use crate::status::SessionSnapshot;

/// State shared between the controlling thread and one session's worker.
struct SessionShared {
    active: AtomicBool,
    paused: AtomicBool,
    /// Supervisor-wide generation counter.
    current_generation: Arc<AtomicU64>,
    generation: u64,
    url: String,
    token: String,
    header_name: String,
    sampler_template: CommandTemplate,
    sampler: Mutex<Option<Child>>,
    restarts: AtomicU64,
}

impl SessionShared {
    fn is_current(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self.current_generation.load(Ordering::SeqCst) == self.generation
    }

    fn lock_sampler(&self) -> MutexGuard<'_, Option<Child>> {
        self.sampler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self) -> SpawnRequest<'_> {
        SpawnRequest {
            url: &self.url,
            token: &self.token,
            header_name: &self.header_name,
        }
    }
}

/// Worker-side handle used by the extractor to reap and respawn the Sampler.
struct SessionLink {
    shared: Arc<SessionShared>,
}

impl SamplerLink for SessionLink {
    type Reader = ChildStdout;

    fn is_current(&self) -> bool {
        self.shared.is_current()
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        let mut slot = self.shared.lock_sampler();
        let child = slot.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                *slot = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "sampler wait failed");
                None
            }
        }
    }

    fn respawn(&mut self) -> Result<Option<ChildStdout>> {
        let mut slot = self.shared.lock_sampler();
        // Checked under the slot lock: `stop` clears `active` before it takes
        // the slot, so no sampler can be spawned behind its back.
        if !self.shared.is_current() {
            return Ok(None);
        }
        if let Some(mut stale) = slot.take() {
            let _ = stale.kill();
            let _ = stale.wait();
        }
        let (child, stdout) =
            process::spawn_sampler(&self.shared.sampler_template, &self.shared.request())?;
        if self.shared.paused.load(Ordering::SeqCst) {
            let _ = process::suspend(&child, ProcessRole::Sampler);
        }
        let restarts = self.shared.restarts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(pid = child.id(), restarts, "sampler respawned");
        *slot = Some(child);
        Ok(Some(stdout))
    }
}

struct Worker {
    join: JoinHandle<()>,
    done: Receiver<ExtractorExit>,
}

struct Session {
    shared: Arc<SessionShared>,
    player: Option<Child>,
    worker: Option<Worker>,
    /// `LevelBuffer::total_pushed` when the session began.
    levels_base: u64,
}

/// Owns playback sessions and their external processes.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    levels: Arc<LevelBuffer>,
    generation: Arc<AtomicU64>,
    state: SessionState,
    session: Option<Session>,
    /// Workers that outlived `worker_join_timeout`; joined once finished.
    parked: Vec<JoinHandle<()>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            levels: LevelBuffer::shared(),
            generation: Arc::new(AtomicU64::new(0)),
            state: SessionState::Idle,
            session: None,
            parked: Vec::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Shared level buffer, for readers on other threads.
    pub fn levels(&self) -> Arc<LevelBuffer> {
        self.levels.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.shared.active.load(Ordering::SeqCst))
    }

    pub fn get_recent_levels(&self, count: usize) -> Vec<f32> {
        self.levels.get_recent(count)
    }

    pub fn get_current_level(&self) -> f32 {
        self.levels.get_current()
    }

    /// Start a session; `false` on any failure (the cause is logged).
    pub fn start(&mut self, url: &str, token: &str) -> bool {
        match self.try_start(url, token) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "start failed");
                false
            }
        }
    }

    /// Start a session, reporting why it could not be started.
    ///
    /// A running session is stopped first. On error no session is left
    /// active and any process already spawned has been terminated.
    pub fn try_start(&mut self, url: &str, token: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(SupervisorError::InvalidRequest("url is empty".into()));
        }
        if token.trim().is_empty() {
            return Err(SupervisorError::InvalidRequest("token is empty".into()));
        }
        if self.session.is_some() {
            self.stop();
        }
        self.reap_parked();

        self.state = SessionState::Starting;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let request = SpawnRequest {
            url,
            token,
            header_name: &self.config.auth_header,
        };

        let mut player = match process::spawn_player(&self.config.player, &request) {
            Ok(child) => child,
            Err(e) => {
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        let (sampler, stdout) = match process::spawn_sampler(&self.config.sampler, &request) {
            Ok((child, stdout)) => (Some(child), Some(stdout)),
            Err(SupervisorError::Pipe(reason)) => {
                tracing::warn!(%reason, "sampler pipe unavailable; playing without levels");
                (None, None)
            }
            Err(e) => {
                process::terminate(
                    &mut player,
                    ProcessRole::Player,
                    self.config.stop_grace,
                    self.config.stop_poll,
                );
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        let shared = Arc::new(SessionShared {
            active: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            current_generation: self.generation.clone(),
            generation,
            url: url.to_owned(),
            token: token.to_owned(),
            header_name: self.config.auth_header.clone(),
            sampler_template: self.config.sampler.clone(),
            sampler: Mutex::new(sampler),
            restarts: AtomicU64::new(0),
        });

        self.levels.clear();
        let levels_base = self.levels.total_pushed();
        let player_pid = player.id();
        self.session = Some(Session {
            shared: shared.clone(),
            player: Some(player),
            worker: None,
            levels_base,
        });

        if let Some(stdout) = stdout {
            match self.spawn_worker(shared, stdout) {
                Ok(worker) => {
                    if let Some(session) = self.session.as_mut() {
                        session.worker = Some(worker);
                    }
                }
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
        }

        self.state = SessionState::Running;
        tracing::info!(url, generation, player_pid, "session started");
        Ok(())
    }

    fn spawn_worker(&self, shared: Arc<SessionShared>, stdout: ChildStdout) -> Result<Worker> {
        let (done_tx, done) = crossbeam_channel::bounded(1);
        let levels = self.levels.clone();
        let settings = ExtractorSettings {
            idle_poll: self.config.idle_poll,
            read_error_backoff: self.config.read_error_backoff,
            restart: self.config.restart.clone(),
        };
        let generation = shared.generation;
        let join = std::thread::Builder::new()
            .name(format!("wavetap-sampler-{generation}"))
            .spawn(move || {
                let link = SessionLink { shared };
                let exit = SampleExtractor::new(link, &levels, settings).run(stdout);
                tracing::debug!(generation, ?exit, "sampling worker finished");
                let _ = done_tx.send(exit);
            })
            .map_err(SupervisorError::Worker)?;
        Ok(Worker { join, done })
    }

    /// End the session, if any. Never blocks beyond the configured bounds.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.reap_parked();
            return;
        };
        self.state = SessionState::Stopping;
        let generation = session.shared.generation;
        session.shared.active.store(false, Ordering::SeqCst);

        let mut sampler = session.shared.lock_sampler().take();
        {
            let mut children: Vec<(ProcessRole, &mut Child)> = Vec::with_capacity(2);
            if let Some(player) = session.player.as_mut() {
                children.push((ProcessRole::Player, player));
            }
            if let Some(sampler) = sampler.as_mut() {
                children.push((ProcessRole::Sampler, sampler));
            }
            process::terminate_all(&mut children, self.config.stop_grace, self.config.stop_poll);
        }

        if let Some(worker) = session.worker.take() {
            self.join_worker(worker);
        }
        self.levels.clear();
        self.reap_parked();
        self.state = SessionState::Idle;
        tracing::info!(generation, "session stopped");
    }

    fn join_worker(&mut self, worker: Worker) {
        match worker.done.recv_timeout(self.config.worker_join_timeout) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join.join().is_err() {
                    tracing::warn!("sampling worker panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.config.worker_join_timeout.as_millis() as u64,
                    "sampling worker did not exit in time; parking it"
                );
                self.parked.push(worker.join);
            }
        }
    }

    /// Join parked workers that have since finished.
    fn reap_parked(&mut self) {
        if self.parked.is_empty() {
            return;
        }
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(JoinHandle::is_finished);
        for handle in finished {
            let _ = handle.join();
        }
        self.parked = pending;
    }

    /// Suspend both processes, Sampler first. `true` if already paused or if
    /// at least one process was signalled.
    pub fn pause(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match self.state {
            SessionState::Paused => return true,
            SessionState::Running => {}
            _ => return false,
        }
        // The flag and the signals change under the slot lock so a respawn
        // never observes one without the other.
        let slot = session.shared.lock_sampler();
        session.shared.paused.store(true, Ordering::SeqCst);

        let mut signalled = false;
        if let Some(sampler) = slot.as_ref() {
            match process::suspend(sampler, ProcessRole::Sampler) {
                Ok(()) => signalled = true,
                Err(e) => tracing::debug!(error = %e, "sampler pause failed"),
            }
        }
        if let Some(player) = session.player.as_ref() {
            match process::suspend(player, ProcessRole::Player) {
                Ok(()) => signalled = true,
                Err(e) => tracing::debug!(error = %e, "player pause failed"),
            }
        }
        if !signalled {
            session.shared.paused.store(false, Ordering::SeqCst);
        }
        drop(slot);

        if signalled {
            self.state = SessionState::Paused;
            tracing::info!("session paused");
        }
        signalled
    }

    /// Continue the Player (it was paused) and the Sampler (always, it may
    /// have been stopped independently). A running session is a no-op success.
    pub fn resume(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match self.state {
            SessionState::Running => return true,
            SessionState::Paused => {}
            _ => return false,
        }

        // Cleared before signalling, under the slot lock: a Sampler respawned
        // after this point is never suspended.
        let slot = session.shared.lock_sampler();
        session.shared.paused.store(false, Ordering::SeqCst);

        let mut signalled = false;
        if let Some(player) = session.player.as_ref() {
            match process::resume(player, ProcessRole::Player) {
                Ok(()) => signalled = true,
                Err(e) => tracing::debug!(error = %e, "player resume failed"),
            }
        }
        if let Some(sampler) = slot.as_ref() {
            match process::resume(sampler, ProcessRole::Sampler) {
                Ok(()) => signalled = true,
                Err(e) => tracing::debug!(error = %e, "sampler resume failed"),
            }
        }
        drop(slot);
        self.state = SessionState::Running;
        if signalled {
            tracing::info!("session resumed");
        }
        signalled
    }

    /// Reap the Player if it has exited. Returns whether it is still running.
    /// Playback ending does not stop the session.
    pub fn poll_player(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let Some(player) = session.player.as_mut() else {
            return false;
        };
        match player.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(%status, "player exited");
                session.player = None;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "player wait failed");
                true
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let current_level = self.levels.get_current();
        let generation = self.generation.load(Ordering::SeqCst);
        let Some(session) = self.session.as_ref() else {
            return SessionSnapshot {
                state: self.state,
                current_level,
                generation,
                ..SessionSnapshot::default()
            };
        };
        SessionSnapshot {
            state: self.state,
            url: Some(session.shared.url.clone()),
            player_pid: session.player.as_ref().map(Child::id),
            sampler_pid: session.shared.lock_sampler().as_ref().map(Child::id),
            sampler_restarts: session.shared.restarts.load(Ordering::SeqCst),
            levels_produced: self
                .levels
                .total_pushed()
                .saturating_sub(session.levels_base),
            current_level,
            generation,
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
        // Parked workers observe the cleared flag within one poll interval.
        for handle in self.parked.drain(..) {
            let _ = handle.join();
        }
    }
}
