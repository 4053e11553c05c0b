#[cfg(test)]
use std::collections::HashMap;
use std::fmt;
#[cfg(test)]
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;
#[cfg(test)]
use tracing::warn;

/// Logical destination for delivered message lines.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SinkId {
    /// Per-topic surface, keyed by topic name.
    Topic(String),
    /// The process-wide aggregated console surface.
    Console,
}

impl SinkId {
    pub fn surface_name(&self) -> &str {
        match self {
            SinkId::Topic(topic) => topic,
            SinkId::Console => "console",
        }
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.surface_name())
    }
}

/// External events about display surfaces, delivered to the control loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// The surface backing this sink was closed by external action.
    Closed(SinkId),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to create display surface '{0}'")]
    CreateFailed(String),
}

/// A persistent, named, append-only text surface.
pub trait Surface: Send {
    fn append_lines(&mut self, lines: &[String]);
    /// False once the surface was closed externally; a stale surface is
    /// recreated by the registry on next use.
    fn is_valid(&self) -> bool;
    fn clear(&mut self);
}

/// Creates display surfaces on demand.
pub trait SurfaceProvider: Send {
    fn create(&mut self, name: &str) -> Result<Box<dyn Surface>, SinkError>;
}

// --- Terminal-backed surfaces -----------------------------------------------

/// Surface provider for plain terminal operation.
///
/// Every surface prints its lines prefixed with the surface name; terminal
/// surfaces never close, so the held event sender only keeps the channel open.
#[derive(Debug)]
pub struct TerminalProvider {
    _events: mpsc::Sender<SinkEvent>,
}

impl TerminalProvider {
    pub fn new(events: mpsc::Sender<SinkEvent>) -> Self {
        Self { _events: events }
    }
}

impl SurfaceProvider for TerminalProvider {
    fn create(&mut self, name: &str) -> Result<Box<dyn Surface>, SinkError> {
        debug!("Creating terminal surface '{}'", name);
        Ok(Box::new(TerminalSurface {
            name: name.to_string(),
        }))
    }
}

struct TerminalSurface {
    name: String,
}

impl Surface for TerminalSurface {
    fn append_lines(&mut self, lines: &[String]) {
        for line in lines {
            println!("[{}] {}", self.name, line);
        }
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn clear(&mut self) {
        // Nothing scrollback-clearing to do for a plain terminal stream.
    }
}

// --- In-memory surfaces (test support) --------------------------------------

#[cfg(test)]
#[derive(Debug, Default)]
struct MemorySurfaceState {
    lines: Vec<String>,
    valid: bool,
    generation: u32,
}

/// Shared view of one memory surface, used to inspect output and to simulate
/// an external close.
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct MemorySurfaceHandle {
    state: Arc<Mutex<MemorySurfaceState>>,
}

#[cfg(test)]
impl MemorySurfaceHandle {
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().expect("surface state poisoned").lines.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().expect("surface state poisoned").valid
    }

    /// How many times this name has been (re)created by the provider.
    pub fn generation(&self) -> u32 {
        self.state.lock().expect("surface state poisoned").generation
    }
}

/// In-memory surface provider.
///
/// Clones share the same surfaces, so a cloned provider doubles as an
/// inspection handle. `close()` invalidates a surface and reports it on the
/// event channel exactly like an externally closed display would.
#[cfg(test)]
#[derive(Clone)]
pub struct MemoryProvider {
    surfaces: Arc<Mutex<HashMap<String, Arc<Mutex<MemorySurfaceState>>>>>,
    events: mpsc::Sender<SinkEvent>,
}

#[cfg(test)]
impl MemoryProvider {
    pub fn new(events: mpsc::Sender<SinkEvent>) -> Self {
        Self {
            surfaces: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Handle to the named surface, creating the bookkeeping slot if needed.
    pub fn handle(&self, name: &str) -> MemorySurfaceHandle {
        let state = self
            .surfaces
            .lock()
            .expect("provider state poisoned")
            .entry(name.to_string())
            .or_default()
            .clone();
        MemorySurfaceHandle { state }
    }

    /// Simulates the user closing the surface's display.
    pub fn close(&self, sink: &SinkId) {
        let handle = self.handle(sink.surface_name());
        handle.state.lock().expect("surface state poisoned").valid = false;
        if self.events.try_send(SinkEvent::Closed(sink.clone())).is_err() {
            warn!("Sink event channel full or closed, dropping close event");
        }
    }
}

#[cfg(test)]
impl SurfaceProvider for MemoryProvider {
    fn create(&mut self, name: &str) -> Result<Box<dyn Surface>, SinkError> {
        let handle = self.handle(name);
        {
            let mut state = handle.state.lock().expect("surface state poisoned");
            state.lines.clear();
            state.valid = true;
            state.generation += 1;
        }
        debug!("Created memory surface '{}'", name);
        Ok(Box::new(MemorySurface { handle }))
    }
}

#[cfg(test)]
struct MemorySurface {
    handle: MemorySurfaceHandle,
}

#[cfg(test)]
impl Surface for MemorySurface {
    fn append_lines(&mut self, lines: &[String]) {
        self.handle
            .state
            .lock()
            .expect("surface state poisoned")
            .lines
            .extend_from_slice(lines);
    }

    fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    fn clear(&mut self) {
        self.handle
            .state
            .lock()
            .expect("surface state poisoned")
            .lines
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_surface_records_appends_and_clear() {
        let (tx, _rx) = mpsc::channel(4);
        let mut provider = MemoryProvider::new(tx);
        let handle = provider.handle("t");

        let mut surface = provider.create("t").unwrap();
        surface.append_lines(&["a".to_string(), "b".to_string()]);
        assert_eq!(handle.lines(), vec!["a", "b"]);

        surface.clear();
        assert!(handle.lines().is_empty());
        assert!(surface.is_valid());
    }

    #[test]
    fn close_invalidates_and_emits_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let provider = MemoryProvider::new(tx);
        let sink = SinkId::Topic("t".to_string());

        provider.close(&sink);
        assert!(!provider.handle("t").is_valid());
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Closed(sink));
    }

    #[test]
    fn recreation_bumps_generation() {
        let (tx, _rx) = mpsc::channel(4);
        let mut provider = MemoryProvider::new(tx);
        provider.create("t").unwrap();
        provider.close(&SinkId::Topic("t".to_string()));
        provider.create("t").unwrap();
        assert_eq!(provider.handle("t").generation(), 2);
        assert!(provider.handle("t").is_valid());
    }
}
