//! Provenance classification of the binary modules referenced by a crash
//!
//! Classification is purely path based. A small table of install-directory prefixes is built
//! once per crash and every module's code file is matched against it.

use crate::context::HostPaths;
use std::fmt;

#[cfg(target_os = "windows")]
const SEPARATOR: char = '\\';
#[cfg(not(target_os = "windows"))]
const SEPARATOR: char = '/';

const CASE_INSENSITIVE: bool = cfg!(any(target_os = "windows", target_os = "macos"));

/// Name the stack walker gives the kernel-provided shared object
pub const VDSO_MODULE_NAME: &str = "linux-gate.so";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleClassification {
    Unknown,
    System,
    HostApplication,
    Addon,
    Extension,
}

impl ModuleClassification {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::System => "system",
            Self::HostApplication => "game",
            Self::Addon => "addon",
            Self::Extension => "extension",
        }
    }

    /// The lowest [`UploadTier`] that permits submissions for this class
    pub fn required_tier(self) -> Option<UploadTier> {
        match self {
            Self::Unknown => None,
            Self::System => Some(UploadTier(1)),
            Self::HostApplication => Some(UploadTier(2)),
            Self::Addon | Self::Extension => Some(UploadTier(3)),
        }
    }
}

impl fmt::Display for ModuleClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How far up the provenance ladder symbol and binary submissions may go
///
/// Tier 0 disables submissions, 1 allows system modules, 2 adds the host application and 3 adds
/// addons and extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UploadTier(u8);

impl UploadTier {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(3);

    pub fn new(level: i64) -> Self {
        Self(level.clamp(0, 3) as u8)
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn allows(self, class: ModuleClassification) -> bool {
        class.required_tier().is_some_and(|required| self >= required)
    }
}

impl Default for UploadTier {
    fn default() -> Self {
        Self::ALL
    }
}

/// Ordered prefix table used to classify module code files
#[derive(Clone, Debug)]
pub struct ClassificationTable {
    prefixes: Vec<(String, ModuleClassification)>,
}

impl ClassificationTable {
    /// Builds the table from the main module's code file and the host's install directories
    ///
    /// Entries are kept longest first, so the first matching prefix is also the most specific.
    pub fn new(main_module_code_file: Option<&str>, paths: &HostPaths) -> Self {
        let mut prefixes = Vec::with_capacity(3);

        if let Some(dir) = main_module_code_file.and_then(directory_of) {
            prefixes.push((dir.to_owned(), ModuleClassification::HostApplication));
        }
        if !paths.game_path.is_empty() {
            prefixes.push((subdirectory(&paths.game_path, "addons"), ModuleClassification::Addon));
        }
        if !paths.framework_path.is_empty() {
            prefixes.push((
                subdirectory(&paths.framework_path, "extensions"),
                ModuleClassification::Extension,
            ));
        }

        prefixes.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));
        Self { prefixes }
    }

    pub fn classify(&self, code_file: &str) -> ModuleClassification {
        if cfg!(any(target_os = "linux", target_os = "android")) && code_file == VDSO_MODULE_NAME {
            return ModuleClassification::System;
        }

        if !is_absolute(code_file) {
            return ModuleClassification::Unknown;
        }

        self.prefixes
            .iter()
            .find(|(prefix, _)| starts_with(code_file, prefix))
            .map_or(ModuleClassification::System, |(_, class)| *class)
    }
}

/// Whether a module path reported by a dump is absolute on the platform it came from
pub fn is_absolute(path: &str) -> bool {
    if cfg!(target_os = "windows") {
        let bytes = path.as_bytes();
        bytes.get(1) == Some(&b':') || path.starts_with("\\\\")
    } else {
        path.starts_with('/')
    }
}

/// Strips everything up to the last path separator of either flavor
pub fn file_name_of(path: &str) -> &str {
    path.rfind(['/', '\\']).map_or(path, |idx| &path[idx + 1..])
}

/// The directory part of `path`, including the trailing separator
fn directory_of(path: &str) -> Option<&str> {
    path.rfind(['/', '\\']).map(|idx| &path[..=idx])
}

fn subdirectory(root: &str, name: &str) -> String {
    let root = root.trim_end_matches(['/', '\\']);
    format!("{root}{SEPARATOR}{name}{SEPARATOR}")
}

fn starts_with(path: &str, prefix: &str) -> bool {
    let (path, prefix) = (path.as_bytes(), prefix.as_bytes());
    if path.len() < prefix.len() {
        return false;
    }
    let head = &path[..prefix.len()];
    if CASE_INSENSITIVE {
        head.eq_ignore_ascii_case(prefix)
    } else {
        head == prefix
    }
}
