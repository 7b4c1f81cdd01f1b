//! Host context recorded for the fault path
//!
//! [`ContextRegistry`] is driven from the host's main thread. Scalar fields are copied into the
//! fixed buffers in [`crate::fault::state`] so the sidecar writer can print them, and the plugin
//! inventory is re-encoded into a [`blob`] whose memory is registered as always-included dump
//! memory.

pub mod blob;
pub mod steam_inf;

use crate::{
    errors::BlobError,
    fault::state::{self, ConsoleHistoryFn, MemoryRange, STATE},
};
use blob::PluginRecord;
use std::{
    collections::BTreeMap,
    path::Path,
    sync::Mutex,
};

/// Install directories used to classify modules
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostPaths {
    /// Root of the game content, `addons/` lives under it
    pub game_path: String,
    /// Root of the plugin framework, `extensions/` lives under it
    pub framework_path: String,
    /// Short name of the game directory, e.g. `tf`
    pub game_directory: String,
}

/// One registered blob and the range record pointing into it
struct BlobGeneration {
    _bytes: Box<[u8]>,
    range: Box<MemoryRange>,
}

impl BlobGeneration {
    fn new(bytes: Box<[u8]>) -> Self {
        let range = Box::new(MemoryRange {
            ptr: bytes.as_ptr() as usize,
            len: bytes.len(),
        });
        Self {
            _bytes: bytes,
            range,
        }
    }
}

#[derive(Default)]
struct Generations {
    live: Option<BlobGeneration>,
    /// Kept alive for one more swap in case a fault is still reading it
    retired: Option<BlobGeneration>,
}

/// Process context for crash reports
#[derive(Default)]
pub struct ContextRegistry {
    paths: HostPaths,
    framework_version: Option<String>,
    plugins: BTreeMap<usize, PluginRecord>,
    generations: Mutex<Generations>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_map(&self, map: &str) {
        state::with_write_lock(|| STATE.map.store(map));
    }

    pub fn set_game_path(&mut self, path: &str) {
        state::with_write_lock(|| STATE.game_path.store(path));
        self.paths.game_path = path.to_owned();
    }

    pub fn set_command_line(&self, command_line: &str) {
        state::with_write_lock(|| STATE.command_line.store(command_line));
    }

    pub fn set_framework_path(&mut self, path: &str) {
        state::with_write_lock(|| STATE.framework_path.store(path));
        self.paths.framework_path = path.to_owned();
    }

    pub fn set_game_directory(&mut self, directory: &str) {
        state::with_write_lock(|| STATE.game_directory.store(directory));
        self.paths.game_directory = directory.to_owned();
    }

    pub fn set_framework_version(&mut self, version: &str) {
        state::with_write_lock(|| STATE.framework_version.store(version));
        self.framework_version = Some(version.to_owned());
    }

    /// Reads `steam.inf` once and keeps its formatted contents for the sidecar
    pub fn load_steam_inf(&self, path: &Path) {
        let formatted = steam_inf::read_steam_inf(path);
        let stored = state::with_write_lock(|| STATE.steam_inf.store(&formatted));
        if stored < formatted.len() {
            log::debug!("steam.inf truncated to {stored} bytes");
        }
    }

    /// Sets or clears the host's console scroll-back reader
    pub fn set_console_reader(&self, reader: Option<ConsoleHistoryFn>) {
        state::set_console_reader(reader);
    }

    pub fn host_paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn framework_version(&self) -> Option<&str> {
        self.framework_version.as_deref()
    }

    pub fn plugins(&self) -> impl Iterator<Item = &PluginRecord> {
        self.plugins.values()
    }

    /// Records a loaded plugin and re-registers the inventory
    pub fn plugin_loaded(&mut self, plugin: PluginRecord) -> Result<(), BlobError> {
        self.plugins.insert(plugin.handle, plugin);
        self.serialize()
    }

    /// Forgets a plugin and re-registers the inventory
    pub fn plugin_unloaded(&mut self, handle: usize) -> Result<(), BlobError> {
        if self.plugins.remove(&handle).is_none() {
            log::debug!("unload of unknown plugin handle {handle:#x}");
        }
        self.serialize()
    }

    /// Rebuilds the plugin blob and registers it with the fault path
    ///
    /// The new range is published before the previous blob is retired, and a retired blob is
    /// only freed on the following call. An empty inventory deregisters the range.
    pub fn serialize(&self) -> Result<(), BlobError> {
        let next = blob::encode(self.plugins.values())?.map(BlobGeneration::new);

        let mut generations = match self.generations.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        };

        let ptr = next
            .as_ref()
            .map_or(std::ptr::null_mut(), |g| &*g.range as *const MemoryRange as *mut _);
        state::swap_app_memory(ptr);

        let previous = std::mem::replace(&mut generations.live, next);
        generations.retired = previous;

        log::debug!(
            "registered plugin context for {} plugins ({} bytes)",
            self.plugins.len(),
            generations.live.as_ref().map_or(0, |g| g.range.len)
        );
        Ok(())
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        let generations = match self.generations.get_mut() {
            Ok(generations) => generations,
            Err(e) => e.into_inner(),
        };
        if generations.live.is_some() {
            state::swap_app_memory(std::ptr::null_mut());
        }
    }
}
