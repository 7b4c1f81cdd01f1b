use std::{path::PathBuf, process::ExitStatus};
use thiserror::Error;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crate::linux::{auxv::AuxvError, vdso::VdsoError};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a fault interceptor is already installed in this process")]
    AlreadyInstalled,
    #[error("failed to create dump directory {0}")]
    CreateDumpDir(PathBuf, #[source] std::io::Error),
    #[error("dump path {0} does not fit in the fault-time buffer")]
    DumpPathTooLong(PathBuf),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[error("failed to attach the signal handlers")]
    Attach(#[from] crash_handler::Error),
    #[cfg(target_os = "windows")]
    #[error("failed to register the vectored exception handler")]
    VectoredHandler,
    #[error("fault capture is not supported on this platform")]
    UnsupportedPlatform,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid header magic {0:#x}")]
    BadMagic(u64),
    #[error("invalid tail magic {0:#x}")]
    BadTail(u64),
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u32),
    #[error("declared size {declared} does not match buffer length {actual}")]
    SizeMismatch { declared: u32, actual: usize },
    #[error("entry for {0} is larger than the blob format allows")]
    EntryTooLarge(String),
    #[error("malformed blob")]
    Scroll(#[from] scroll::Error),
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("failed to read minidump {0}")]
    Read(PathBuf, #[source] minidump::Error),
    #[error("failed to process minidump")]
    Process(#[from] minidump_processor::ProcessError),
    #[error("requesting thread {0} has no stack")]
    MissingStack(usize),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("response is too short ({0} bytes)")]
    TooShort(usize),
    #[error("unknown decision byte {0:?}")]
    UnknownDecision(char),
    #[error("expected '|' after the decision byte")]
    BadDelimiter,
}

#[derive(Debug, Error)]
pub enum NegotiateError {
    #[error("local analysis failed")]
    Analyze(#[from] AnalyzeError),
    #[error("presubmit request failed")]
    Transport(#[from] TransportError),
    #[error("malformed presubmit response")]
    Protocol(#[from] ProtocolError),
    #[error("server reported an error: {0}")]
    Remote(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to attach {0}")]
    Attach(PathBuf, #[source] std::io::Error),
    #[error("{message} ({code})")]
    Status { message: String, code: u16 },
    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("failed to map {0}")]
    Map(PathBuf, #[source] std::io::Error),
    #[error("no separate debug file for {0} in the search directories")]
    NoDebugFile(PathBuf),
    #[error("failed to run {program}")]
    Spawn {
        program: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    ToolFailed { program: PathBuf, status: ExitStatus },
    #[error("symbol output is not UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
    #[error("failed to read the ELF module")]
    ModuleReader(#[from] ModuleReaderError),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("module path {0:?} is not absolute")]
    NotAbsolute(String),
    #[error("failed to produce symbols for {path}")]
    Symbols {
        path: String,
        #[source]
        error: SymbolError,
    },
    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[error("failed to extract the VDSO image")]
    Vdso(#[from] VdsoError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ServerIdError {
    #[error("failed to read server id from {0}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("failed to persist server id to {0}")]
    Persist(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultsError {
    #[error("crash uploads are still in progress")]
    NotDone,
    #[error("invalid crash index {index} ({count} uploaded)")]
    InvalidIndex { index: usize, count: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid upload configuration")]
    Deserialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to read dump directory {0}")]
    ReadDir(PathBuf, #[source] std::io::Error),
    #[error("presubmit for {0} failed")]
    Presubmit(PathBuf, #[source] NegotiateError),
    #[error("submission for module {module} failed")]
    Module {
        module: String,
        #[source]
        error: SubmitError,
    },
    #[error("failed to upload {0}")]
    Upload(PathBuf, #[source] TransportError),
    #[error("failed to delete {0}")]
    Delete(PathBuf, #[source] std::io::Error),
    #[error("failed to load the server id")]
    ServerId(#[from] ServerIdError),
    #[error("failed to spawn the upload thread")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ModuleReaderError {
    #[error("failed to read module memory: {length} bytes at {offset}: {error}")]
    ReadModuleMemory {
        offset: u64,
        length: u64,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse ELF memory: {0}")]
    Parsing(#[from] goblin::error::Error),
    #[error("no build id notes in program headers")]
    NoProgramHeaderNote,
    #[error("no string table available to locate note sections")]
    NoStrTab,
    #[error("no build id note sections")]
    NoSectionNote,
    #[error("the ELF data contains no section headers")]
    NoSections,
    #[error("no .gnu_debuglink section")]
    NoDebugLink,
    #[error("the .gnu_debuglink section has no nul terminator")]
    DebugLinkNoNulByte,
    #[error("no build id found; program headers: {program_headers}, section: {section}")]
    NoBuildId {
        program_headers: Box<Self>,
        section: Box<Self>,
    },
}
