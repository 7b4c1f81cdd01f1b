#![cfg(unix)]

use minidump_relay::{
    UploadConfig,
    classify::UploadTier,
    context::HostPaths,
    errors::{AnalyzeError, SymbolError, TransportError, WorkerError},
    negotiate::{CrashSummary, DumpAnalyzer, FrameRecord, ModuleRecord},
    upload::{Form, InlineExecutor, SymbolDumper, Transport, UploadListener, UploadWorker},
};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

const GAME: &str = "/srv/game/srcds_linux";
const SOURCEMOD: &str = "/srv/game/tf/addons/sourcemod/bin/sourcemod.so";
const LIBC: &str = "/lib/x86_64-linux-gnu/libc.so.6";

fn paths() -> HostPaths {
    HostPaths {
        game_path: "/srv/game/tf".to_owned(),
        framework_path: "/srv/game/tf/addons/sourcemod".to_owned(),
        game_directory: "tf".to_owned(),
    }
}

fn module(path: &str) -> ModuleRecord {
    ModuleRecord {
        code_file: path.to_owned(),
        debug_file: path.to_owned(),
        debug_identifier: "A1B2C3D4E5F60718293A4B5C6D7E8F900".to_owned(),
        code_identifier: "d4c3b2a1".to_owned(),
        base_address: 0,
    }
}

fn summary(modules: &[&str]) -> CrashSummary {
    CrashSummary {
        os: "Linux".to_owned(),
        cpu: "amd64".to_owned(),
        crashed: true,
        reason: "SIGSEGV / SEGV_MAPERR".to_owned(),
        modules: modules.iter().copied().map(module).collect(),
        frames: vec![FrameRecord {
            module_index: Some(0),
            offset: 0x1234,
        }],
        main_module: Some(0),
        ..Default::default()
    }
}

/// Returns the same summary for every dump and counts calls
#[derive(Clone)]
struct FixedAnalyzer {
    summary: Option<CrashSummary>,
    calls: Arc<AtomicUsize>,
}

impl FixedAnalyzer {
    fn new(summary: Option<CrashSummary>) -> Self {
        Self {
            summary,
            calls: Arc::default(),
        }
    }
}

impl DumpAnalyzer for FixedAnalyzer {
    fn analyze(&self, _dump: &Path) -> Result<CrashSummary, AnalyzeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.summary.clone().ok_or(AnalyzeError::MissingStack(0))
    }
}

/// Answers presubmits with `presubmit`, bundles with `bundle` and everything else with "ok"
#[derive(Clone)]
struct ScriptedServer {
    presubmit: String,
    bundle: Result<String, u16>,
    sent: Arc<Mutex<Vec<(String, Form)>>>,
}

impl ScriptedServer {
    fn new(presubmit: &str) -> Self {
        Self::with_bundle(presubmit, Ok("CrashID=bp-1\r\n".to_owned()))
    }

    fn with_bundle(presubmit: &str, bundle: Result<String, u16>) -> Self {
        Self {
            presubmit: presubmit.to_owned(),
            bundle,
            sent: Arc::default(),
        }
    }

    fn sent(&self) -> Vec<(String, Form)> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self, url: &str) -> Vec<Form> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == url)
            .map(|(_, form)| form)
            .collect()
    }

    fn presubmits(&self) -> usize {
        self.sent()
            .iter()
            .filter(|(_, form)| form.get("CrashSignature").is_some())
            .count()
    }

    fn bundles(&self) -> Vec<Form> {
        self.sent()
            .into_iter()
            .filter(|(_, form)| form.get("GameDirectory").is_some())
            .map(|(_, form)| form)
            .collect()
    }
}

impl Transport for ScriptedServer {
    fn post(&self, url: &str, form: &Form) -> Result<String, TransportError> {
        self.sent.lock().unwrap().push((url.to_owned(), form.clone()));
        if form.get("CrashSignature").is_some() {
            Ok(self.presubmit.clone())
        } else if form.get("GameDirectory").is_some() {
            self.bundle.clone().map_err(|code| TransportError::Status {
                message: "Internal Server Error".to_owned(),
                code,
            })
        } else {
            Ok("ok".to_owned())
        }
    }
}

struct FakeDumpSyms;

impl SymbolDumper for FakeDumpSyms {
    fn dump(&self, path: &Path, _debug_dirs: &[PathBuf]) -> Result<String, SymbolError> {
        Ok(format!("MODULE Linux x86_64 A1B2C3D4 {}\n", path.display()))
    }
}

struct DumpDir {
    dir: tempfile::TempDir,
}

impl DumpDir {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn add(&self, name: &str, with_sidecar: bool) -> PathBuf {
        let dump = self.path().join(name);
        std::fs::write(&dump, b"MDMP").unwrap();
        if with_sidecar {
            std::fs::write(
                self.path().join(format!("{name}.txt")),
                "-------- CONFIG BEGIN --------\nMap=ctf_2fort\n-------- CONFIG END --------\n",
            )
            .unwrap();
        }
        dump
    }

    fn entries(&self) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(self.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn worker(
    dir: &DumpDir,
    config: UploadConfig,
    server: &ScriptedServer,
    analyzer: &FixedAnalyzer,
) -> UploadWorker {
    UploadWorker::new(dir.path(), config, paths())
        .unwrap()
        .with_transport(server.clone())
        .with_analyzer(analyzer.clone())
        .with_symbol_dumper(FakeDumpSyms)
}

#[test]
fn server_declines() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = DumpDir::new();
    dir.add("crash.dmp", true);

    let server = ScriptedServer::new("N|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let report = worker(&dir, UploadConfig::default(), &server, &analyzer).run();

    assert_eq!((report.skipped, report.uploaded, report.failed), (1, 0, 0));
    assert_eq!(server.sent().len(), 1);
    assert_eq!(server.presubmits(), 1);
    assert_eq!(dir.entries(), ["server-id.txt"]);
}

#[test]
fn requested_binaries_and_token() {
    let dir = DumpDir::new();
    let dump = dir.add("crash.dmp", true);

    let config = UploadConfig::default();
    let server = ScriptedServer::new("Y|UU|tok123|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let worker = worker(&dir, config.clone(), &server, &analyzer);
    let results = worker.results();
    let report = worker.run();

    assert_eq!((report.skipped, report.uploaded, report.failed), (0, 1, 0));
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let binaries = server.sent_to(&config.binary_url);
    assert_eq!(binaries.len(), 2);
    assert_eq!(binaries[0].file_value("code_file"), Some(Path::new(GAME)));
    assert_eq!(binaries[1].file_value("code_file"), Some(Path::new(SOURCEMOD)));
    for form in &binaries {
        assert_eq!(form.text_value("PresubmitToken"), Some("tok123"));
    }
    assert!(server.sent_to(&config.symbol_url).is_empty());

    let bundles = server.bundles();
    assert_eq!(bundles.len(), 1);
    let bundle = &bundles[0];
    assert_eq!(bundle.text_value("PresubmitToken"), Some("tok123"));
    assert_eq!(bundle.text_value("GameDirectory"), Some("tf"));
    assert_eq!(bundle.file_value("upload_file_minidump"), Some(dump.as_path()));
    assert_eq!(
        bundle.file_value("upload_file_metadata"),
        Some(dir.path().join("crash.dmp.txt").as_path())
    );

    assert!(results.is_done());
    assert_eq!(results.uploaded_count(), 1);
    assert_eq!(results.response(0).unwrap(), "CrashID=bp-1");
    assert_eq!(dir.entries(), ["server-id.txt"]);
}

#[test]
fn short_presubmit_reply_still_uploads_bundle() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", false);

    let config = UploadConfig::default();
    let server = ScriptedServer::new("Y");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let report = worker(&dir, config.clone(), &server, &analyzer).run();

    assert_eq!((report.skipped, report.uploaded, report.failed), (0, 1, 0));
    assert!(server.sent_to(&config.binary_url).is_empty());
    assert!(server.sent_to(&config.symbol_url).is_empty());

    let bundles = server.bundles();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].text_value("PresubmitToken"), None);
    assert!(bundles[0].get("upload_file_metadata").is_none());

    assert!(matches!(
        report.errors.iter().next(),
        Some(WorkerError::Presubmit(..))
    ));
    assert_eq!(dir.entries(), ["server-id.txt"]);
}

#[test]
fn unreadable_dump_is_uploaded_anyway() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", true);

    let server = ScriptedServer::new("Y|UU|tok123|");
    let analyzer = FixedAnalyzer::new(None);
    let run_log = dir.path().join("upload.log");
    let report = worker(&dir, UploadConfig::default(), &server, &analyzer)
        .with_run_log(&run_log)
        .run();

    assert_eq!((report.skipped, report.uploaded, report.failed), (0, 1, 0));
    assert_eq!(server.presubmits(), 0);
    assert_eq!(server.bundles().len(), 1);

    let log = std::fs::read_to_string(&run_log).unwrap();
    assert_eq!(
        log,
        "Failed to locally process crash dump\nUploaded crash dump: CrashID=bp-1\n"
    );
}

#[test]
fn metadata_only() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", true);

    let server = ScriptedServer::new("M|--|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let report = worker(&dir, UploadConfig::default(), &server, &analyzer).run();

    assert_eq!(report.uploaded, 1);
    let bundles = server.bundles();
    assert!(bundles[0].get("upload_file_minidump").is_none());
    assert!(bundles[0].file_value("upload_file_metadata").is_some());
}

#[test]
fn metadata_only_without_module_flags() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", true);

    let server = ScriptedServer::new("M|\n");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let report = worker(&dir, UploadConfig::default(), &server, &analyzer).run();

    assert_eq!((report.skipped, report.uploaded, report.failed), (0, 1, 0));
    assert_eq!(server.presubmits(), 1);
    let bundles = server.bundles();
    assert_eq!(bundles.len(), 1);
    assert!(bundles[0].get("upload_file_minidump").is_none());
    assert!(bundles[0].get("PresubmitToken").is_none());
}

#[test]
fn failed_bundle_is_deleted_too() {
    let dir = DumpDir::new();
    dir.add("a.dmp", true);
    dir.add("b.dmp", false);

    let server = ScriptedServer::with_bundle("Y|--|", Err(500));
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let worker = worker(&dir, UploadConfig::default(), &server, &analyzer);
    let results = worker.results();
    let report = worker.run();

    assert_eq!((report.skipped, report.uploaded, report.failed), (0, 0, 2));
    assert_eq!(report.errors.len(), 2);
    assert!(
        report
            .errors
            .iter()
            .all(|e| matches!(e, WorkerError::Upload(_, TransportError::Status { code: 500, .. })))
    );
    assert_eq!(results.uploaded_count(), 0);
    assert_eq!(dir.entries(), ["server-id.txt"]);
}

#[test]
fn counters_cover_every_dump() {
    let dir = DumpDir::new();
    for name in ["1.dmp", "2.dmp", "3.dmp"] {
        dir.add(name, true);
    }
    std::fs::write(dir.path().join("notes.log"), "keep me").unwrap();

    let server = ScriptedServer::new("Y|--|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let report = worker(&dir, UploadConfig::default(), &server, &analyzer).run();

    assert_eq!(report.total(), 3);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(dir.entries(), ["notes.log", "server-id.txt"]);
}

#[test]
fn presubmit_disabled() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", true);

    let config = UploadConfig {
        presubmit: false,
        ..Default::default()
    };
    let server = ScriptedServer::new("N|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME])));
    let report = worker(&dir, config, &server, &analyzer).run();

    assert_eq!(report.uploaded, 1);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(server.sent().len(), 1);
    assert!(server.bundles()[0].file_value("upload_file_minidump").is_some());
}

#[test]
fn tier_and_binary_gate() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", false);

    let config = UploadConfig {
        upload_tier: UploadTier::new(1),
        ..Default::default()
    };
    let server = ScriptedServer::new("Y|UUU|t|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD, LIBC])));
    let run_log = dir.path().join("upload.log");
    worker(&dir, config.clone(), &server, &analyzer)
        .with_run_log(&run_log)
        .run();

    let binaries = server.sent_to(&config.binary_url);
    assert_eq!(binaries.len(), 1);
    assert_eq!(binaries[0].file_value("code_file"), Some(Path::new(LIBC)));

    let log = std::fs::read_to_string(&run_log).unwrap();
    similar_asserts::assert_eq!(
        log,
        format!(
            "Got a presubmit token from server: t\n\
             Classified module {GAME} as game\n\
             Classified module {SOURCEMOD} as addon\n\
             Classified module {LIBC} as system\n\
             Uploaded crash dump: CrashID=bp-1\n"
        )
    );

    let dir = DumpDir::new();
    dir.add("crash.dmp", false);
    let config = UploadConfig {
        binary_upload: false,
        ..Default::default()
    };
    let server = ScriptedServer::new("Y|UUU|t|");
    worker(&dir, config.clone(), &server, &analyzer).run();
    assert!(server.sent_to(&config.binary_url).is_empty());
    assert_eq!(server.bundles().len(), 1);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn requested_symbols() {
    let dir = DumpDir::new();
    dir.add("crash.dmp", false);

    let config = UploadConfig::default();
    let server = ScriptedServer::new("Y|Y-|tok|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let report = worker(&dir, config.clone(), &server, &analyzer).run();
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let symbols = server.sent_to(&config.symbol_url);
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].text_value("PresubmitToken"), Some("tok"));
    assert_eq!(
        symbols[0].text_value("symbol_file"),
        Some(format!("MODULE Linux x86_64 A1B2C3D4 {GAME}\n").as_str())
    );
    assert!(server.sent_to(&config.binary_url).is_empty());
}

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl UploadListener for Events {
    fn on_crash_uploaded(&self, index: usize, response: &str) {
        self.0.lock().unwrap().push(format!("{index}:{response}"));
    }

    fn on_done_uploading(&self) {
        self.0.lock().unwrap().push("done".to_owned());
    }
}

#[test]
fn listener_is_notified() {
    let dir = DumpDir::new();
    dir.add("a.dmp", false);
    dir.add("b.dmp", false);

    let server = ScriptedServer::new("Y|--|");
    let analyzer = FixedAnalyzer::new(Some(summary(&[GAME, SOURCEMOD])));
    let events = Arc::new(Events::default());
    let handle = worker(&dir, UploadConfig::default(), &server, &analyzer)
        .with_listener(Arc::new(InlineExecutor), events.clone())
        .spawn()
        .unwrap();

    let report = handle.join().unwrap();
    assert_eq!(report.uploaded, 2);
    assert_eq!(
        *events.0.lock().unwrap(),
        ["0:CrashID=bp-1", "1:CrashID=bp-1", "done"]
    );
}

#[test]
fn empty_directory() {
    let dir = DumpDir::new();
    let server = ScriptedServer::new("Y|--|");
    let analyzer = FixedAnalyzer::new(None);
    let worker = worker(&dir, UploadConfig::default(), &server, &analyzer);
    let results = worker.results();

    let report = worker.run();
    assert_eq!(report.total(), 0);
    assert!(server.sent().is_empty());
    assert!(results.is_done());
    assert!(dir.entries().is_empty());
}
