//! Parsing of the presubmit endpoint's reply
//!
//! ```text
//! <decision>|<one flag per module>[|<token>|]
//! ```
//!
//! The decision is `Y` (upload everything), `N` (skip), `M` (metadata only) or `E` followed by
//! `|<reason>`. Module flags are `U` for "upload the binary", `Y` for "upload symbols" where
//! symbol extraction is supported, anything else for neither.

use crate::errors::{NegotiateError, ProtocolError};
use bitflags::bitflags;

bitflags! {
    /// What the server asked for a single module
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ModuleRequest: u8 {
        const BINARY = 1 << 0;
        const SYMBOLS = 1 << 1;
    }
}

/// The fate of one crash
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The dump could not be analyzed locally
    LocalError,
    /// The request failed or the server could not be understood
    RemoteError,
    DontUpload,
    UploadFull,
    UploadMetadataOnly,
}

/// A parsed reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresubmitDirective {
    pub decision: Decision,
    /// One entry per module sent, in the same order
    pub module_requests: Vec<ModuleRequest>,
    pub token: Option<String>,
}

impl PresubmitDirective {
    /// A directive that carries no module requests or token
    pub fn bare(decision: Decision) -> Self {
        Self {
            decision,
            module_requests: Vec::new(),
            token: None,
        }
    }
}

fn module_request(flag: u8, symbols_supported: bool) -> ModuleRequest {
    match flag {
        b'U' => ModuleRequest::BINARY,
        b'Y' if symbols_supported => ModuleRequest::SYMBOLS,
        _ => ModuleRequest::empty(),
    }
}

/// Parses `body` for a request that listed `module_count` modules
///
/// An `E` reply always comes back as [`NegotiateError::Remote`], whatever follows it.
pub fn parse_response(
    body: &str,
    module_count: usize,
    symbols_supported: bool,
) -> Result<PresubmitDirective, NegotiateError> {
    let body = body.trim_end_matches('\n');
    let bytes = body.as_bytes();
    if bytes.len() < 2 {
        return Err(ProtocolError::TooShort(bytes.len()).into());
    }

    let decision = match bytes[0] {
        b'E' => {
            let reason = body.split_once('|').map_or("", |(_, reason)| reason);
            return Err(NegotiateError::Remote(reason.to_owned()));
        }
        b'Y' => Decision::UploadFull,
        b'N' => Decision::DontUpload,
        b'M' => Decision::UploadMetadataOnly,
        other => return Err(ProtocolError::UnknownDecision(char::from(other)).into()),
    };

    if bytes[1] != b'|' {
        return Err(ProtocolError::BadDelimiter.into());
    }

    let flags = &bytes[2..];
    if flags.len() < module_count {
        log::warn!(
            "presubmit reply has {} module flags for {module_count} modules",
            flags.len()
        );
        return Ok(PresubmitDirective {
            decision,
            module_requests: vec![ModuleRequest::empty(); module_count],
            token: None,
        });
    }

    let module_requests = flags[..module_count]
        .iter()
        .map(|flag| module_request(*flag, symbols_supported))
        .collect();

    let token = match body.get(2 + module_count..) {
        Some(rest) if rest.starts_with('|') => {
            let token = rest[1..].split('|').next().unwrap_or_default();
            (!token.is_empty()).then(|| token.to_owned())
        }
        _ => None,
    };

    Ok(PresubmitDirective {
        decision,
        module_requests,
        token,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn protocol_error(body: &str, modules: usize) -> ProtocolError {
        match parse_response(body, modules, true) {
            Err(NegotiateError::Protocol(e)) => e,
            other => panic!("expected a protocol error, got {other:?}"),
        }
    }

    #[test]
    fn skip_without_modules() {
        assert_eq!(
            parse_response("N|", 0, true).unwrap(),
            PresubmitDirective::bare(Decision::DontUpload)
        );
    }

    #[test]
    fn module_flags_and_token() {
        let directive = parse_response("Y|UU|tok123|\n", 2, true).unwrap();
        assert_eq!(directive.decision, Decision::UploadFull);
        assert_eq!(
            directive.module_requests,
            [ModuleRequest::BINARY, ModuleRequest::BINARY]
        );
        assert_eq!(directive.token.as_deref(), Some("tok123"));

        let directive = parse_response("M|YU-|abc", 3, true).unwrap();
        assert_eq!(directive.decision, Decision::UploadMetadataOnly);
        assert_eq!(
            directive.module_requests,
            [
                ModuleRequest::SYMBOLS,
                ModuleRequest::BINARY,
                ModuleRequest::empty()
            ]
        );
        assert_eq!(directive.token.as_deref(), Some("abc"));
    }

    #[test]
    fn symbol_requests_need_support() {
        let directive = parse_response("Y|YU", 2, false).unwrap();
        assert_eq!(
            directive.module_requests,
            [ModuleRequest::empty(), ModuleRequest::BINARY]
        );
        assert_eq!(directive.token, None);
    }

    #[test]
    fn extra_flags_are_ignored() {
        let directive = parse_response("Y|UUU", 2, true).unwrap();
        assert_eq!(directive.module_requests.len(), 2);
        assert_eq!(directive.token, None);
    }

    #[test]
    fn server_errors() {
        match parse_response("E|rate limited", 5, true) {
            Err(NegotiateError::Remote(reason)) => assert_eq!(reason, "rate limited"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_replies() {
        assert!(matches!(protocol_error("", 0), ProtocolError::TooShort(0)));
        assert!(matches!(protocol_error("Y", 0), ProtocolError::TooShort(1)));
        assert!(matches!(
            protocol_error("<html>", 0),
            ProtocolError::UnknownDecision('<')
        ));
        assert!(matches!(protocol_error("YU", 0), ProtocolError::BadDelimiter));
    }

    #[test]
    fn short_flag_lists_keep_the_decision() {
        let directive = parse_response("N|", 2, true).unwrap();
        assert_eq!(directive.decision, Decision::DontUpload);
        assert_eq!(
            directive.module_requests,
            [ModuleRequest::empty(), ModuleRequest::empty()]
        );
        assert_eq!(directive.token, None);

        let directive = parse_response("M|UU", 3, true).unwrap();
        assert_eq!(directive.decision, Decision::UploadMetadataOnly);
        assert_eq!(directive.module_requests, [ModuleRequest::empty(); 3]);

        // Flags are positional, a delimiter in a flag slot asks for nothing
        let directive = parse_response("Y|U|tok|", 2, true).unwrap();
        assert_eq!(
            directive.module_requests,
            [ModuleRequest::BINARY, ModuleRequest::empty()]
        );
        assert_eq!(directive.token, None);
    }

    #[test]
    fn carriage_returns_are_flags() {
        // Only the trailing newline is stripped, a CR stays in the flag list
        let directive = parse_response("Y|U\r\n", 2, true).unwrap();
        assert_eq!(
            directive.module_requests,
            [ModuleRequest::BINARY, ModuleRequest::empty()]
        );

        let directive = parse_response("M|\r", 0, true).unwrap();
        assert_eq!(directive.decision, Decision::UploadMetadataOnly);
        assert!(directive.module_requests.is_empty());
    }
}
