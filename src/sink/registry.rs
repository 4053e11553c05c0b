use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::Local;
use tracing::{debug, info, warn};

use super::surface::{SinkError, SinkId, Surface, SurfaceProvider};

/// Owns the display surfaces lines are routed into.
///
/// Surfaces are created lazily on first use and reused while they stay valid; a
/// surface invalidated by external closure is transparently recreated on the
/// next lookup, so a stale surface never surfaces as a failure to callers.
pub struct SinkRegistry {
    surfaces: HashMap<SinkId, Box<dyn Surface>>,
    provider: Box<dyn SurfaceProvider>,
    console_enabled: bool,
}

impl SinkRegistry {
    pub fn new(provider: Box<dyn SurfaceProvider>, console_enabled: bool) -> Self {
        Self {
            surfaces: HashMap::new(),
            provider,
            console_enabled,
        }
    }

    /// Whether a surface for `sink` exists and has not been closed externally.
    pub fn is_live(&self, sink: &SinkId) -> bool {
        self.surfaces
            .get(sink)
            .map(|surface| surface.is_valid())
            .unwrap_or(false)
    }

    /// Returns the surface for `sink`, creating or recreating it as needed.
    ///
    /// Idempotent while the previously created surface remains valid.
    pub fn get_or_create(&mut self, sink: &SinkId) -> Result<&mut Box<dyn Surface>, SinkError> {
        if self.surfaces.contains_key(sink) && !self.is_live(sink) {
            info!("Surface '{}' was closed externally, recreating", sink);
            self.surfaces.remove(sink);
        }

        match self.surfaces.entry(sink.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let surface = self.provider.create(sink.surface_name())?;
                Ok(entry.insert(surface))
            }
        }
    }

    /// Eager append: creates the topic surface on demand.
    pub fn append(&mut self, sink: &SinkId, lines: &[String]) {
        match self.get_or_create(sink) {
            Ok(surface) => surface.append_lines(lines),
            Err(e) => warn!("Dropping {} line(s) for '{}': {}", lines.len(), sink, e),
        }
    }

    /// Best-effort append to the aggregated console, prefixed with time and
    /// origin topic. A no-op when console routing is disabled.
    pub fn append_console(&mut self, topic: &str, lines: &[String]) {
        if !self.console_enabled {
            return;
        }
        let stamped: Vec<String> = lines
            .iter()
            .map(|line| format_console_line(topic, line))
            .collect();
        self.append(&SinkId::Console, &stamped);
    }

    /// Drops the cached surface after an external close event. The next use
    /// recreates it through the provider.
    pub fn invalidate(&mut self, sink: &SinkId) {
        if self.surfaces.remove(sink).is_some() {
            debug!("Dropped closed surface '{}'", sink);
        }
    }

    /// Clears one surface's content, keeping the surface itself.
    pub fn clear(&mut self, sink: &SinkId) {
        if let Some(surface) = self.surfaces.get_mut(sink) {
            if surface.is_valid() {
                debug!("Clearing surface '{}'", sink);
                surface.clear();
            }
        }
    }

    /// Clears the content of every surface, keeping the surfaces themselves.
    pub fn clear_all(&mut self) {
        let sinks: Vec<SinkId> = self.surfaces.keys().cloned().collect();
        for sink in sinks {
            self.clear(&sink);
        }
    }
}

fn format_console_line(topic: &str, line: &str) -> String {
    format!("{} {}: {}", Local::now().format("%H:%M:%S"), topic, line)
}
