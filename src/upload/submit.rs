//! Form submissions for crash bundles, module binaries and module symbols

use super::transport::{Form, Transport};
use crate::{
    CLIENT_VERSION,
    classify::is_absolute,
    config::UploadConfig,
    errors::{SubmitError, SymbolError, TransportError},
    negotiate::ModuleRecord,
};
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Fields every endpoint receives
pub fn identity_form(config: &UploadConfig, server_id: &str) -> Form {
    Form::new()
        .optional_text("UserID", config.account.as_deref())
        .text("ExtensionVersion", CLIENT_VERSION)
        .text("ServerID", server_id)
}

/// Strips the trailing line breaks servers like to append
pub fn trim_response(response: &str) -> &str {
    response.trim_end_matches(['\r', '\n'])
}

/// Directories searched for separate debug info of `path`: its own directory, a `.debug`
/// subdirectory of it and the mirror of it under `/usr/lib/debug`
pub fn debug_search_dirs(path: &Path) -> Vec<PathBuf> {
    let Some(dir) = path.parent() else {
        return Vec::new();
    };
    let relative = dir.strip_prefix("/").unwrap_or(dir);
    vec![
        dir.to_owned(),
        dir.join(".debug"),
        Path::new("/usr/lib/debug").join(relative),
    ]
}

/// Produces Breakpad text symbols for a module
pub trait SymbolDumper: Send + Sync {
    /// Dumps `path`, looking for separate debug info in `debug_dirs` when it is not empty
    fn dump(&self, path: &Path, debug_dirs: &[PathBuf]) -> Result<String, SymbolError>;
}

/// [`SymbolDumper`] that runs an external `dump_syms`
#[derive(Clone, Debug)]
pub struct DumpSymsCommand {
    program: PathBuf,
}

impl Default for DumpSymsCommand {
    fn default() -> Self {
        Self::new("dump_syms")
    }
}

impl DumpSymsCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SymbolDumper for DumpSymsCommand {
    fn dump(&self, path: &Path, debug_dirs: &[PathBuf]) -> Result<String, SymbolError> {
        let source = if debug_dirs.is_empty() {
            path.to_owned()
        } else {
            locate_debug_file(path, debug_dirs)?
        };

        let output = Command::new(&self.program)
            .arg(&source)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|error| SymbolError::Spawn {
                program: self.program.clone(),
                error,
            })?;
        if !output.status.success() {
            return Err(SymbolError::ToolFailed {
                program: self.program.clone(),
                status: output.status,
            });
        }
        Ok(String::from_utf8(output.stdout)?)
    }
}

/// Follows the module's `.gnu_debuglink` into `debug_dirs`
///
/// Modules without a debug link carry their own debug info and are returned as is. A candidate
/// whose build id differs from the module's is skipped.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn locate_debug_file(path: &Path, debug_dirs: &[PathBuf]) -> Result<PathBuf, SymbolError> {
    use crate::{errors::ModuleReaderError, linux::module_reader::ModuleReader};

    fn map(path: &Path) -> Result<memmap2::Mmap, SymbolError> {
        let file = std::fs::File::open(path).map_err(|e| SymbolError::Map(path.to_owned(), e))?;
        // SAFETY: the mapping is read-only and only lives for this lookup
        unsafe { memmap2::Mmap::map(&file) }.map_err(|e| SymbolError::Map(path.to_owned(), e))
    }

    let module = map(path)?;
    let reader = ModuleReader::new(&module[..])?;
    let link = match reader.debug_link() {
        Ok(link) => link,
        Err(ModuleReaderError::NoDebugLink | ModuleReaderError::NoSections) => {
            return Ok(path.to_owned());
        }
        Err(e) => return Err(e.into()),
    };
    let build_id = reader.build_id().ok();

    for dir in debug_dirs {
        let candidate = dir.join(&link);
        if candidate == path || !candidate.is_file() {
            continue;
        }
        let matches = match (&build_id, map(&candidate)) {
            (Some(expected), Ok(debug)) => ModuleReader::new(&debug[..])
                .and_then(|r| r.build_id())
                .map_or(true, |found| &found == expected),
            _ => true,
        };
        if matches {
            log::debug!("using {} for {}", candidate.display(), path.display());
            return Ok(candidate);
        }
        log::debug!("build id mismatch for {}", candidate.display());
    }
    Err(SymbolError::NoDebugFile(path.to_owned()))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn locate_debug_file(path: &Path, _debug_dirs: &[PathBuf]) -> Result<PathBuf, SymbolError> {
    Ok(path.to_owned())
}

/// Which parts of a crash go into the bundle
#[derive(Clone, Copy, Debug)]
pub struct Bundle<'a> {
    pub dump: Option<&'a Path>,
    pub metadata: Option<&'a Path>,
    pub token: Option<&'a str>,
}

pub struct Submitter<'a> {
    config: &'a UploadConfig,
    server_id: &'a str,
    game_directory: &'a str,
    transport: &'a dyn Transport,
    dumper: &'a dyn SymbolDumper,
    scratch_dir: &'a Path,
}

impl<'a> Submitter<'a> {
    pub fn new(
        config: &'a UploadConfig,
        server_id: &'a str,
        game_directory: &'a str,
        transport: &'a dyn Transport,
        dumper: &'a dyn SymbolDumper,
        scratch_dir: &'a Path,
    ) -> Self {
        Self {
            config,
            server_id,
            game_directory,
            transport,
            dumper,
            scratch_dir,
        }
    }

    fn form(&self, token: Option<&str>) -> Form {
        identity_form(self.config, self.server_id).optional_text("PresubmitToken", token)
    }

    /// Attaches the module's code file to a binary submission
    pub fn upload_binary(
        &self,
        module: &ModuleRecord,
        token: Option<&str>,
    ) -> Result<String, SubmitError> {
        if !is_absolute(&module.code_file) {
            return Err(SubmitError::NotAbsolute(module.code_file.clone()));
        }
        let form = self
            .form(token)
            .text("debug_identifier", module.debug_identifier.as_str())
            .text("code_identifier", module.code_identifier.as_str())
            .file("code_file", &module.code_file);

        let response = self.transport.post(&self.config.binary_url, &form)?;
        Ok(trim_response(&response).to_owned())
    }

    /// Dumps the module's symbols and submits them
    ///
    /// The first attempt searches for separate debug info, a failed attempt is retried once
    /// against the module alone.
    pub fn upload_symbols(
        &self,
        module: &ModuleRecord,
        token: Option<&str>,
    ) -> Result<String, SubmitError> {
        let (path, scratch) = self.symbol_source(module)?;
        let dumped = self.dump_symbols(&path);
        if let Some(scratch) = scratch {
            if let Err(e) = std::fs::remove_file(&scratch) {
                log::warn!("failed to remove {}: {e}", scratch.display());
            }
        }
        let symbols = dumped.map_err(|error| SubmitError::Symbols {
            path: module.debug_file.clone(),
            error,
        })?;

        let form = self.form(token).text("symbol_file", symbols);
        let response = self.transport.post(&self.config.symbol_url, &form)?;
        Ok(trim_response(&response).to_owned())
    }

    fn dump_symbols(&self, path: &Path) -> Result<String, SymbolError> {
        match self.dumper.dump(path, &debug_search_dirs(path)) {
            Ok(symbols) => Ok(symbols),
            Err(e) => {
                log::debug!("retrying {} without debug dirs: {e}", path.display());
                self.dumper.dump(path, &[])
            }
        }
    }

    /// The file to symbolize, plus a scratch copy to remove afterwards
    fn symbol_source(&self, module: &ModuleRecord) -> Result<(PathBuf, Option<PathBuf>), SubmitError> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if module.code_file == crate::classify::VDSO_MODULE_NAME {
            let path = crate::linux::vdso::extract_vdso(self.scratch_dir)?;
            return Ok((path.clone(), Some(path)));
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let _ = self.scratch_dir;

        if !is_absolute(&module.debug_file) {
            return Err(SubmitError::NotAbsolute(module.debug_file.clone()));
        }
        Ok((PathBuf::from(&module.debug_file), None))
    }

    /// Submits the crash bundle
    pub fn upload_bundle(&self, bundle: Bundle<'_>) -> Result<String, TransportError> {
        let mut form = self
            .form(bundle.token)
            .text("GameDirectory", self.game_directory);
        if let Some(dump) = bundle.dump {
            form = form.file("upload_file_minidump", dump);
        }
        if let Some(metadata) = bundle.metadata {
            form = form.file("upload_file_metadata", metadata);
        }
        let response = self.transport.post(&self.config.submit_url, &form)?;
        Ok(trim_response(&response).to_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, Form)>>);

    impl Transport for Recorder {
        fn post(&self, url: &str, form: &Form) -> Result<String, TransportError> {
            self.0.lock().unwrap().push((url.to_owned(), form.clone()));
            Ok("ok\r\n".to_owned())
        }
    }

    /// Fails whenever debug dirs are given
    #[derive(Default)]
    struct PickyDumper(Mutex<Vec<usize>>);

    impl SymbolDumper for PickyDumper {
        fn dump(&self, path: &Path, debug_dirs: &[PathBuf]) -> Result<String, SymbolError> {
            self.0.lock().unwrap().push(debug_dirs.len());
            if debug_dirs.is_empty() {
                Ok(format!("MODULE Linux x86_64 ABCD {}\n", path.display()))
            } else {
                Err(SymbolError::NoDebugFile(path.to_owned()))
            }
        }
    }

    fn module(path: &str) -> ModuleRecord {
        ModuleRecord {
            code_file: path.to_owned(),
            debug_file: path.to_owned(),
            debug_identifier: "ABCD".to_owned(),
            code_identifier: "dcba".to_owned(),
            base_address: 0,
        }
    }

    #[test]
    fn search_dirs() {
        assert_eq!(
            debug_search_dirs(Path::new("/srv/tf2/bin/engine.so")),
            [
                PathBuf::from("/srv/tf2/bin"),
                PathBuf::from("/srv/tf2/bin/.debug"),
                PathBuf::from("/usr/lib/debug/srv/tf2/bin"),
            ]
        );
    }

    #[test]
    fn trims_line_breaks_only() {
        assert_eq!(trim_response("CrashID=bp-1\r\n\n"), "CrashID=bp-1");
        assert_eq!(trim_response(" padded "), " padded ");
    }

    #[cfg(unix)]
    #[test]
    fn binary_and_symbol_forms() {
        let config = UploadConfig {
            account: Some("76561197987819599".to_owned()),
            ..Default::default()
        };
        let transport = Recorder::default();
        let dumper = PickyDumper::default();
        let scratch = tempfile::tempdir().unwrap();
        let submitter =
            Submitter::new(&config, "id", "tf", &transport, &dumper, scratch.path());

        let engine = module("/srv/tf2/bin/engine.so");
        assert_eq!(submitter.upload_binary(&engine, Some("tok")).unwrap(), "ok");
        assert_eq!(submitter.upload_symbols(&engine, None).unwrap(), "ok");
        assert_eq!(*dumper.0.lock().unwrap(), [3, 0]);

        let sent = transport.0.lock().unwrap();
        let (url, binary) = &sent[0];
        assert_eq!(url, &config.binary_url);
        assert_eq!(binary.text_value("UserID"), Some("76561197987819599"));
        assert_eq!(binary.text_value("PresubmitToken"), Some("tok"));
        assert_eq!(binary.text_value("debug_identifier"), Some("ABCD"));
        assert_eq!(binary.file_value("code_file"), Some(Path::new("/srv/tf2/bin/engine.so")));

        let (url, symbols) = &sent[1];
        assert_eq!(url, &config.symbol_url);
        assert_eq!(symbols.text_value("PresubmitToken"), None);
        assert!(symbols.text_value("symbol_file").unwrap().starts_with("MODULE Linux"));
    }

    #[test]
    fn relative_modules_are_refused() {
        let config = UploadConfig::default();
        let transport = Recorder::default();
        let dumper = PickyDumper::default();
        let scratch = tempfile::tempdir().unwrap();
        let submitter = Submitter::new(&config, "id", "tf", &transport, &dumper, scratch.path());

        let relative = module("engine.so");
        assert!(matches!(
            submitter.upload_binary(&relative, None),
            Err(SubmitError::NotAbsolute(_))
        ));
        assert!(matches!(
            submitter.upload_symbols(&relative, None),
            Err(SubmitError::NotAbsolute(_))
        ));
        assert!(transport.0.lock().unwrap().is_empty());
    }

    #[test]
    fn bundle_fields() {
        let config = UploadConfig::default();
        let transport = Recorder::default();
        let dumper = PickyDumper::default();
        let scratch = tempfile::tempdir().unwrap();
        let submitter = Submitter::new(&config, "id", "tf", &transport, &dumper, scratch.path());

        submitter
            .upload_bundle(Bundle {
                dump: None,
                metadata: Some(Path::new("/dumps/a.dmp.txt")),
                token: Some("tok123"),
            })
            .unwrap();

        let sent = transport.0.lock().unwrap();
        let (url, form) = &sent[0];
        assert_eq!(url, &config.submit_url);
        assert_eq!(form.text_value("GameDirectory"), Some("tf"));
        assert_eq!(form.text_value("PresubmitToken"), Some("tok123"));
        assert_eq!(form.text_value("UserID"), None);
        assert!(form.get("upload_file_minidump").is_none());
        assert_eq!(
            form.file_value("upload_file_metadata"),
            Some(Path::new("/dumps/a.dmp.txt"))
        );
    }
}
