//! Presubmit negotiation
//!
//! Before a crash is uploaded its signature is sent to the presubmit endpoint, which decides
//! whether the crash is wanted and which of its modules it is missing binaries or symbols for.

pub mod analyze;
pub mod fingerprint;
pub mod response;

pub use analyze::{DumpAnalyzer, MinidumpAnalyzer};
pub use fingerprint::{CrashFingerprint, CrashSummary, FrameRecord, ModuleRecord};
pub use response::{Decision, ModuleRequest, PresubmitDirective, parse_response};

use crate::{
    config::UploadConfig,
    errors::NegotiateError,
    upload::{submit::identity_form, transport::Transport},
};
use std::path::Path;

/// Whether this platform can turn modules into symbol files
pub const SYMBOLS_SUPPORTED: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// Outcome of negotiating one dump
#[derive(Debug)]
pub struct Negotiation {
    pub directive: PresubmitDirective,
    /// Present whenever the dump could be analyzed
    pub summary: Option<CrashSummary>,
    /// Why the directive is [`Decision::LocalError`] or [`Decision::RemoteError`]
    pub error: Option<NegotiateError>,
}

pub struct Negotiator<'a> {
    config: &'a UploadConfig,
    server_id: &'a str,
    transport: &'a dyn Transport,
    analyzer: &'a dyn DumpAnalyzer,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        config: &'a UploadConfig,
        server_id: &'a str,
        transport: &'a dyn Transport,
        analyzer: &'a dyn DumpAnalyzer,
    ) -> Self {
        Self {
            config,
            server_id,
            transport,
            analyzer,
        }
    }

    /// Analyzes `dump` and asks the server what to do with it
    ///
    /// Never touches the dump itself. Failures are folded into the directive's decision.
    pub fn negotiate(&self, dump: &Path) -> Negotiation {
        let summary = match self.analyzer.analyze(dump) {
            Ok(summary) => summary,
            Err(e) => {
                log::warn!("unable to analyze {}: {e}", dump.display());
                return Negotiation {
                    directive: PresubmitDirective::bare(Decision::LocalError),
                    summary: None,
                    error: Some(e.into()),
                };
            }
        };

        match self.request(&summary) {
            Ok(directive) => Negotiation {
                directive,
                summary: Some(summary),
                error: None,
            },
            Err(e) => {
                log::warn!("presubmit for {} failed: {e}", dump.display());
                Negotiation {
                    directive: PresubmitDirective::bare(Decision::RemoteError),
                    summary: Some(summary),
                    error: Some(e),
                }
            }
        }
    }

    /// Sends the signature of `summary` and parses the reply
    pub fn request(&self, summary: &CrashSummary) -> Result<PresubmitDirective, NegotiateError> {
        let signature = CrashFingerprint::compute(summary);
        log::debug!("crash signature: {signature}");

        let form = identity_form(self.config, self.server_id)
            .text("CrashSignature", signature.as_str());
        let body = self.transport.post(&self.config.submit_url, &form)?;
        parse_response(&body, summary.modules.len(), SYMBOLS_SUPPORTED)
    }
}
