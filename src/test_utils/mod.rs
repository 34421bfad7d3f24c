//! Test utilities for lapse-relay
//!
//! This module provides a scripted in-memory remote sink and file helpers
//! for use across all test modules.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::cloud::{Health, RemoteSession, RemoteSink, RemoteTarget, SinkError};

/// Creates a small file inside `dir` and returns its path
pub fn create_temp_image(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Calls observed by a [`ScriptedSink`], in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Connect,
    EnsureDirectory(String),
    HealthCheck,
    Store(PathBuf),
}

/// Failures a [`ScriptedSink`] should produce.
///
/// Store attempts are numbered from 1 across the whole run.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Fail the first N stores of a path with a transfer error
    pub store_failures: HashMap<PathBuf, usize>,
    /// Report a stale session on the probe preceding these store attempts
    pub stale_health_before_store: HashSet<usize>,
    /// Fail these store attempts with a stale-session error
    pub stale_store: HashSet<usize>,
    /// Reject this connect call (1-based) with an authentication error
    pub failing_connect: Option<usize>,
    /// Fail with a local file error when the path does not exist
    pub require_local_files: bool,
}

#[derive(Default)]
struct ScriptState {
    script: Script,
    events: Vec<SinkEvent>,
    connects: usize,
    store_attempts: usize,
}

/// Remote sink that records every call and fails on cue.
#[derive(Clone, Default)]
pub struct ScriptedSink {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSink {
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script,
                ..Default::default()
            })),
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Every store attempt, successful or not
    pub fn stores(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Store(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }
}

impl RemoteSink for ScriptedSink {
    type Session = ScriptedSession;

    fn connect(&mut self, target: &RemoteTarget) -> Result<ScriptedSession, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(SinkEvent::Connect);
        state.connects += 1;

        if state.script.failing_connect == Some(state.connects) {
            return Err(SinkError::Auth {
                user: "pi".to_string(),
                host: target.host.clone(),
                reason: "scripted rejection".to_string(),
            });
        }

        Ok(ScriptedSession {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

impl RemoteSession for ScriptedSession {
    fn ensure_directory(&mut self, path: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(SinkEvent::EnsureDirectory(path.to_string()));
        Ok(())
    }

    fn store(&mut self, local_file: &Path) -> Result<u64, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(SinkEvent::Store(local_file.to_path_buf()));
        state.store_attempts += 1;
        let attempt = state.store_attempts;

        if state.script.require_local_files && !local_file.exists() {
            return Err(SinkError::LocalFile {
                path: local_file.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        if state.script.stale_store.remove(&attempt) {
            return Err(SinkError::Stale);
        }

        if let Some(remaining) = state.script.store_failures.get_mut(local_file) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::Transfer("scripted failure".to_string()));
            }
        }

        Ok(fs::metadata(local_file).map(|m| m.len()).unwrap_or(0))
    }

    fn health_check(&mut self) -> Result<Health, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(SinkEvent::HealthCheck);
        let next_attempt = state.store_attempts + 1;

        if state.script.stale_health_before_store.remove(&next_attempt) {
            Ok(Health::Stale)
        } else {
            Ok(Health::Healthy)
        }
    }
}
