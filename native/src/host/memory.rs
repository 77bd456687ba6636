// In-process project host: a flat list of audio tracks, a media pool and a
// transport cursor. Cloning shares the same state.

use super::commands::InsertRequest;
use super::interpreter::{HostError, ProjectHost};
use crate::sync::lock;
use std::sync::{Arc, Mutex};

/// Audio event placed by an `insert file` command.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedEvent {
    pub track: String,
    pub path: String,
    pub description: Option<String>,
    pub start: f64,
    pub end: Option<f64>,
    pub data_offset: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    BroughtToFront,
    Pasted,
    AddedToPool(String),
    Inserted(PlacedEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTrack {
    pub name: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryProject {
    pub path: Option<String>,
    /// `None` when the pool cannot be accessed.
    pub pool: Option<Vec<String>>,
    pub tracks: Vec<MemoryTrack>,
    /// Transport position, seconds.
    pub cursor: f64,
}

impl MemoryProject {
    /// Unsaved project with an empty pool and no tracks.
    pub fn new() -> Self {
        Self {
            pool: Some(Vec::new()),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_tracks(mut self, names: &[&str]) -> Self {
        self.tracks.extend(names.iter().map(|name| MemoryTrack {
            name: name.to_string(),
            selected: false,
        }));
        self
    }

    pub fn select_track(mut self, index: usize) -> Self {
        if let Some(track) = self.tracks.get_mut(index) {
            track.selected = true;
        }
        self
    }

    pub fn with_cursor(mut self, seconds: f64) -> Self {
        self.cursor = seconds;
        self
    }

    pub fn with_pool(mut self, paths: &[&str]) -> Self {
        self.pool = Some(paths.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn without_pool(mut self) -> Self {
        self.pool = None;
        self
    }

    /// The first selected track, then `offset` tracks further down.
    fn destination_track(&self, offset: u32) -> Option<&MemoryTrack> {
        let first = self.tracks.iter().position(|t| t.selected)?;
        self.tracks.get(first + offset as usize)
    }
}

#[derive(Debug)]
struct MemoryState {
    project: Option<MemoryProject>,
    events: Vec<HostEvent>,
    action_manager_available: bool,
    reject_pool_additions: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHost {
    /// Host with no open project.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                project: None,
                events: Vec::new(),
                action_manager_available: true,
                reject_pool_additions: false,
            })),
        }
    }

    pub fn with_project(project: MemoryProject) -> Self {
        let host = Self::new();
        host.set_project(Some(project));
        host
    }

    pub fn set_project(&self, project: Option<MemoryProject>) {
        lock(&self.state).project = project;
    }

    pub fn project(&self) -> Option<MemoryProject> {
        lock(&self.state).project.clone()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.state).events.clone()
    }

    pub fn set_action_manager_available(&self, available: bool) {
        lock(&self.state).action_manager_available = available;
    }

    pub fn reject_pool_additions(&self, reject: bool) {
        lock(&self.state).reject_pool_additions = reject;
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectHost for MemoryHost {
    fn has_active_project(&self) -> bool {
        lock(&self.state).project.is_some()
    }

    fn project_path(&self) -> Option<String> {
        lock(&self.state).project.as_ref()?.path.clone()
    }

    fn bring_to_front(&mut self) {
        let mut state = lock(&self.state);
        if state.project.is_some() {
            state.events.push(HostEvent::BroughtToFront);
        }
    }

    fn paste(&mut self) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        if !state.action_manager_available {
            return Err(HostError::ActionManagerUnavailable);
        }
        state.events.push(HostEvent::Pasted);
        Ok(())
    }

    fn pool_paths(&self) -> Result<Vec<String>, HostError> {
        let state = lock(&self.state);
        let project = state.project.as_ref().ok_or(HostError::NoActiveProject)?;
        project.pool.clone().ok_or(HostError::PoolUnavailable)
    }

    fn add_to_pool(&mut self, path: &str) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        if state.reject_pool_additions {
            return Err(HostError::PoolAddFailed);
        }
        let pool = state
            .project
            .as_mut()
            .ok_or(HostError::NoActiveProject)?
            .pool
            .as_mut()
            .ok_or(HostError::PoolUnavailable)?;
        pool.push(path.to_string());
        state.events.push(HostEvent::AddedToPool(path.to_string()));
        Ok(())
    }

    fn insert_file(&mut self, request: &InsertRequest) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        let project = state.project.as_mut().ok_or(HostError::NoActiveProject)?;

        let pool = project.pool.as_mut().ok_or(HostError::PoolUnavailable)?;
        if !pool.iter().any(|p| p.eq_ignore_ascii_case(&request.path)) {
            pool.push(request.path.clone());
        }

        let track = project
            .destination_track(request.track_offset)
            .ok_or(HostError::NoAudioTrack)?
            .name
            .clone();

        let start = project.cursor + request.cursor_offset;
        let placed = PlacedEvent {
            track,
            path: request.path.clone(),
            description: (!request.description.is_empty()).then(|| request.description.clone()),
            start,
            end: request.length.map(|length| start + length),
            data_offset: request.in_time,
        };
        state.events.push(HostEvent::Inserted(placed));
        Ok(())
    }
}
