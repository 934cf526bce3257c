//! Scripted in-memory page for exercising the loop without a browser.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use subnudge_core::{DiscoveryStrategy, Error, PageHost, PlaybackContext, Result};

pub(crate) const VIDEO: u32 = 1;

#[derive(Debug)]
pub(crate) struct FakeState {
    pub ready: bool,
    pub video_present: bool,
    /// `None` means the video element is detached.
    pub playback: Option<PlaybackContext>,
    /// Candidates per strategy name.
    pub candidates: HashMap<&'static str, Vec<u32>>,
    pub failing_probes: HashSet<&'static str>,
    pub callable: HashSet<u32>,
    /// What `getOption("captions", "track")` returns.
    pub track: Value,
    pub fail_get: bool,
    /// Number of upcoming `setOption` calls that throw.
    pub fail_sets: usize,
    /// Every value passed to `setOption`, in order.
    pub writes: Vec<Value>,
    pub styles: HashMap<String, String>,
    pub probes: Vec<&'static str>,
    pub playback_reads: usize,
    pub find_video_calls: usize,
    pub released: usize,
    /// Handles returned from `probe`, counted per returned candidate.
    pub issued: usize,
    pub discarded: Vec<u32>,
    pub discarded_videos: Vec<u32>,
}

impl FakeState {
    /// Candidates handed out and not yet discarded.
    pub fn live_handles(&self) -> usize {
        self.issued - self.discarded.len()
    }
}

pub(crate) struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    /// Ready page with a video playing at 1x, no player object anywhere.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                ready: true,
                video_present: true,
                playback: Some(PlaybackContext {
                    playback_rate: 1.0,
                    paused: false,
                    visible: true,
                }),
                candidates: HashMap::new(),
                failing_probes: HashSet::new(),
                callable: HashSet::new(),
                track: json!({}),
                fail_get: false,
                fail_sets: 0,
                writes: Vec::new(),
                styles: HashMap::new(),
                probes: Vec::new(),
                playback_reads: 0,
                find_video_calls: 0,
                released: 0,
                issued: 0,
                discarded: Vec::new(),
                discarded_videos: Vec::new(),
            }),
        }
    }

    /// Like `new`, with a callable player behind `#movie_player`.
    pub fn with_player(handle: u32) -> Self {
        let host = Self::new();
        host.update(|s| {
            s.candidates.insert("element_id", vec![handle]);
            s.callable.insert(handle);
        });
        host
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut *self.state());
    }

    pub fn set_playback(&self, rate: f64, paused: bool, visible: bool) {
        self.update(|s| {
            s.playback = Some(PlaybackContext {
                playback_rate: rate,
                paused,
                visible,
            })
        });
    }

    pub fn writes(&self) -> Vec<Value> {
        self.state().writes.clone()
    }
}

#[async_trait]
impl PageHost for FakeHost {
    type Video = u32;
    type Handle = u32;

    async fn is_ready(&self) -> Result<bool> {
        Ok(self.state().ready)
    }

    async fn find_video(&self, _selector: &str) -> Result<Option<u32>> {
        let mut s = self.state();
        s.find_video_calls += 1;
        Ok(s.video_present.then_some(VIDEO))
    }

    async fn playback(&self, _video: &u32) -> Result<Option<PlaybackContext>> {
        let mut s = self.state();
        s.playback_reads += 1;
        Ok(s.playback)
    }

    async fn probe(&self, strategy: &DiscoveryStrategy, _video: &u32) -> Result<Vec<u32>> {
        let mut s = self.state();
        let name = strategy.name();
        s.probes.push(name);
        if s.failing_probes.contains(name) {
            return Err(Error::Cdp(format!("{} blew up", name)));
        }
        let found = s.candidates.get(name).cloned().unwrap_or_default();
        s.issued += found.len();
        Ok(found)
    }

    async fn is_callable(&self, handle: &u32) -> Result<bool> {
        Ok(self.state().callable.contains(handle))
    }

    async fn get_option(&self, handle: &u32, namespace: &str, key: &str) -> Result<Value> {
        assert_eq!((namespace, key), ("captions", "track"));
        let s = self.state();
        if !s.callable.contains(handle) {
            return Err(Error::StaleReference(format!("handle {}", handle)));
        }
        if s.fail_get {
            return Err(Error::Host("getOption threw".to_string()));
        }
        Ok(s.track.clone())
    }

    async fn set_option(&self, handle: &u32, namespace: &str, key: &str, value: &Value) -> Result<()> {
        assert_eq!((namespace, key), ("captions", "track"));
        let mut s = self.state();
        if !s.callable.contains(handle) {
            return Err(Error::StaleReference(format!("handle {}", handle)));
        }
        if s.fail_sets > 0 {
            s.fail_sets -= 1;
            return Err(Error::Host("setOption threw".to_string()));
        }
        s.writes.push(value.clone());
        s.track = value.clone();
        Ok(())
    }

    async fn inject_style(&self, id: &str, css: &str) -> Result<()> {
        self.state().styles.insert(id.to_string(), css.to_string());
        Ok(())
    }

    async fn remove_style(&self, id: &str) -> Result<bool> {
        Ok(self.state().styles.remove(id).is_some())
    }

    async fn discard_handle(&self, handle: &u32) -> Result<()> {
        self.state().discarded.push(*handle);
        Ok(())
    }

    async fn discard_video(&self, video: &u32) -> Result<()> {
        self.state().discarded_videos.push(*video);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.state().released += 1;
        Ok(())
    }
}
