//! Background delivery of captured crashes

pub mod results;
pub mod run_log;
pub mod server_id;
pub mod submit;
pub mod transport;
pub mod worker;

pub use results::{InlineExecutor, MainThreadExecutor, UploadListener, UploadResults};
pub use submit::{DumpSymsCommand, Submitter, SymbolDumper};
pub use transport::{Form, FormValue, ReqwestTransport, Transport};
pub use worker::{RunReport, UploadWorker};
