//! The background upload run
//!
//! One run scans the dump directory once and handles every dump in name order: negotiate,
//! submit requested modules, upload the bundle, delete. Every dump present at scan start is
//! deleted by the end of the run whatever happened to it.

use super::{
    results::{MainThreadExecutor, UploadListener, UploadResults},
    run_log::RunLog,
    server_id,
    submit::{Bundle, DumpSymsCommand, Submitter, SymbolDumper},
    transport::{ReqwestTransport, Transport},
};
use crate::{
    DUMP_EXTENSION, SIDECAR_EXTENSION,
    classify::ClassificationTable,
    config::UploadConfig,
    context::HostPaths,
    error_list::SoftErrorList,
    errors::{TransportError, WorkerError},
    negotiate::{
        CrashSummary, Decision, DumpAnalyzer, MinidumpAnalyzer, ModuleRequest, Negotiation,
        Negotiator, PresubmitDirective,
    },
};
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
};

/// Counters and soft errors of one run
///
/// `skipped + uploaded + failed` equals the number of dumps found at scan start.
#[derive(Debug, Default)]
pub struct RunReport {
    pub skipped: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub errors: SoftErrorList<WorkerError>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.skipped + self.uploaded + self.failed
    }
}

/// `<dump>.txt`
pub fn sidecar_path(dump: &Path) -> PathBuf {
    let mut path = OsString::from(dump.as_os_str());
    path.push(".");
    path.push(SIDECAR_EXTENSION);
    path.into()
}

pub struct UploadWorker {
    dump_dir: PathBuf,
    config: UploadConfig,
    paths: HostPaths,
    transport: Box<dyn Transport>,
    analyzer: Box<dyn DumpAnalyzer>,
    dumper: Box<dyn SymbolDumper>,
    results: UploadResults,
    listener: Option<(Arc<dyn MainThreadExecutor>, Arc<dyn UploadListener>)>,
    run_log: Option<PathBuf>,
}

impl UploadWorker {
    /// Creates a worker that talks to the configured endpoints over HTTP
    pub fn new(
        dump_dir: impl Into<PathBuf>,
        config: UploadConfig,
        paths: HostPaths,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            dump_dir: dump_dir.into(),
            config,
            paths,
            transport: Box::new(ReqwestTransport::new()?),
            analyzer: Box::new(MinidumpAnalyzer),
            dumper: Box::new(DumpSymsCommand::default()),
            results: UploadResults::default(),
            listener: None,
            run_log: None,
        })
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl DumpAnalyzer + 'static) -> Self {
        self.analyzer = Box::new(analyzer);
        self
    }

    pub fn with_symbol_dumper(mut self, dumper: impl SymbolDumper + 'static) -> Self {
        self.dumper = Box::new(dumper);
        self
    }

    /// Notifies `listener` through `executor` after every upload and once the run is over
    pub fn with_listener(
        mut self,
        executor: Arc<dyn MainThreadExecutor>,
        listener: Arc<dyn UploadListener>,
    ) -> Self {
        self.listener = Some((executor, listener));
        self
    }

    /// Appends a line per outcome to `path`
    pub fn with_run_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_log = Some(path.into());
        self
    }

    /// A handle that stays valid after the worker is moved onto its thread
    pub fn results(&self) -> UploadResults {
        self.results.clone()
    }

    /// Runs on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<RunReport>, WorkerError> {
        std::thread::Builder::new()
            .name("minidump-upload".to_owned())
            .spawn(move || self.run())
            .map_err(WorkerError::Spawn)
    }

    /// Processes every pending dump on the calling thread
    pub fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        let mut run_log = RunLog::open(self.run_log.as_deref());

        let dumps = match self.pending_dumps() {
            Ok(dumps) => dumps,
            Err(e) => {
                log::error!("{e}");
                report.errors.push(e);
                Vec::new()
            }
        };

        if !dumps.is_empty() {
            let server_id = match server_id::load_or_create(&self.dump_dir) {
                Ok(id) => id,
                Err(e) => {
                    let id = uuid::Uuid::new_v4().hyphenated().to_string();
                    log::error!("{e}, using {id} for this run only");
                    report.errors.push(e.into());
                    id
                }
            };

            for dump in &dumps {
                self.process(dump, &server_id, &mut run_log, &mut report);
            }
        }

        log::info!(
            "upload thread finished. ({} skipped, {} uploaded, {} failed)",
            report.skipped,
            report.uploaded,
            report.failed
        );
        if !report.errors.is_empty() {
            log::warn!("{:?}", report.errors);
        }

        self.results.finish();
        if let Some((executor, listener)) = &self.listener {
            let listener = Arc::clone(listener);
            executor.execute(Box::new(move || listener.on_done_uploading()));
        }
        report
    }

    fn pending_dumps(&self) -> Result<Vec<PathBuf>, WorkerError> {
        let entries = fs::read_dir(&self.dump_dir)
            .map_err(|e| WorkerError::ReadDir(self.dump_dir.clone(), e))?;

        let mut dumps: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == DUMP_EXTENSION) && path.is_file()
            })
            .collect();
        dumps.sort();
        Ok(dumps)
    }

    fn negotiate(&self, dump: &Path, server_id: &str) -> Negotiation {
        if !self.config.presubmit {
            return Negotiation {
                directive: PresubmitDirective::bare(Decision::UploadFull),
                summary: None,
                error: None,
            };
        }
        Negotiator::new(&self.config, server_id, &*self.transport, &*self.analyzer).negotiate(dump)
    }

    fn process(&self, dump: &Path, server_id: &str, run_log: &mut RunLog, report: &mut RunReport) {
        log::debug!("processing {}", dump.display());
        let Negotiation {
            directive,
            summary,
            error,
        } = self.negotiate(dump, server_id);
        if let Some(error) = error {
            report
                .errors
                .push(WorkerError::Presubmit(dump.to_owned(), error));
        }

        let token = directive.token.as_deref();
        if let Some(token) = token {
            log::info!("Got a presubmit token from server: {token}");
            run_log.line(format_args!("Got a presubmit token from server: {token}"));
        }

        let sidecar = sidecar_path(dump);
        let submitter = Submitter::new(
            &self.config,
            server_id,
            &self.paths.game_directory,
            &*self.transport,
            &*self.dumper,
            &self.dump_dir,
        );

        if directive.decision == Decision::DontUpload {
            log::info!("Skipped due to server request");
            run_log.line(format_args!("Skipped due to server request"));
            report.skipped += 1;
        } else {
            if directive.decision == Decision::LocalError {
                log::warn!("Failed to locally process crash dump");
                run_log.line(format_args!("Failed to locally process crash dump"));
            }
            if let Some(summary) = &summary {
                self.submit_modules(summary, &directive, &submitter, run_log, report);
            }

            let bundle = Bundle {
                dump: (directive.decision != Decision::UploadMetadataOnly).then_some(dump),
                metadata: sidecar.is_file().then_some(sidecar.as_path()),
                token,
            };
            match submitter.upload_bundle(bundle) {
                Ok(response) => {
                    log::info!("Uploaded crash dump: {response}");
                    run_log.line(format_args!("Uploaded crash dump: {response}"));
                    report.uploaded += 1;
                    self.notify_uploaded(response);
                }
                Err(e) => {
                    log::error!("Failed to upload crash dump: {e}");
                    run_log.line(format_args!("Failed to upload crash dump: {e}"));
                    report.failed += 1;
                    report.errors.push(WorkerError::Upload(dump.to_owned(), e));
                }
            }
        }

        self.delete(dump, report);
        self.delete(&sidecar, report);
    }

    /// Submits symbols then binaries for the modules the server asked about
    fn submit_modules(
        &self,
        summary: &CrashSummary,
        directive: &PresubmitDirective,
        submitter: &Submitter<'_>,
        run_log: &mut RunLog,
        report: &mut RunReport,
    ) {
        let table = ClassificationTable::new(
            summary.main_module().map(|module| module.code_file.as_str()),
            &self.paths,
        );
        let token = directive.token.as_deref();

        for (module, request) in summary.modules.iter().zip(&directive.module_requests) {
            if request.is_empty() {
                continue;
            }

            let class = table.classify(&module.code_file);
            log::info!("Classified module {} as {class}", module.code_file);
            run_log.line(format_args!(
                "Classified module {} as {class}",
                module.code_file
            ));
            if !self.config.upload_tier.allows(class) {
                log::debug!("upload tier excludes {}", module.code_file);
                continue;
            }

            if request.contains(ModuleRequest::SYMBOLS) {
                match submitter.upload_symbols(module, token) {
                    Ok(response) => log::info!("Symbol upload complete: {response}"),
                    Err(error) => {
                        log::warn!("Symbol upload failed for {}: {error}", module.code_file);
                        report.errors.push(WorkerError::Module {
                            module: module.code_file.clone(),
                            error,
                        });
                    }
                }
            }

            if request.contains(ModuleRequest::BINARY) && self.config.binary_upload {
                match submitter.upload_binary(module, token) {
                    Ok(response) => log::info!("Binary upload complete: {response}"),
                    Err(error) => {
                        log::warn!("Binary upload failed for {}: {error}", module.code_file);
                        report.errors.push(WorkerError::Module {
                            module: module.code_file.clone(),
                            error,
                        });
                    }
                }
            }
        }
    }

    fn notify_uploaded(&self, response: String) {
        let index = self.results.push(response.clone());
        if let Some((executor, listener)) = &self.listener {
            let listener = Arc::clone(listener);
            executor.execute(Box::new(move || listener.on_crash_uploaded(index, &response)));
        }
    }

    fn delete(&self, path: &Path, report: &mut RunReport) {
        let result = crate::fail_point_else!(
            ARTIFACT_DELETE,
            Err(io::Error::other("forced failure")),
            fs::remove_file(path)
        );
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                log::error!("failed to delete {}: {e}", path.display());
                report.errors.push(WorkerError::Delete(path.to_owned(), e));
            }
        }
    }
}
