//! Multipart form submission

use crate::errors::TransportError;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    /// Attached from disk when the form is sent
    File(PathBuf),
}

/// An ordered multipart form
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Form {
    fields: Vec<(String, FormValue)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((name.to_owned(), FormValue::Text(value.into())));
        self
    }

    pub fn file(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.fields
            .push((name.to_owned(), FormValue::File(path.into())));
        self
    }

    /// Adds `value` as a text field only when present
    pub fn optional_text(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.text(name, value),
            None => self,
        }
    }

    pub fn fields(&self) -> &[(String, FormValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.fields
            .iter()
            .find_map(|(field, value)| (field == name).then_some(value))
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FormValue::Text(text) => Some(text),
            FormValue::File(_) => None,
        }
    }

    pub fn file_value(&self, name: &str) -> Option<&Path> {
        match self.get(name)? {
            FormValue::File(path) => Some(path),
            FormValue::Text(_) => None,
        }
    }
}

/// Posts forms to the remote endpoints
pub trait Transport: Send + Sync {
    /// Sends `form` to `url` and returns the response body
    fn post(&self, url: &str, form: &Form) -> Result<String, TransportError>;
}

/// [`Transport`] over a blocking `reqwest` client
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("minidump-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn post(&self, url: &str, form: &Form) -> Result<String, TransportError> {
        let mut multipart = reqwest::blocking::multipart::Form::new();
        for (name, value) in form.fields() {
            multipart = match value {
                FormValue::Text(text) => multipart.text(name.clone(), text.clone()),
                FormValue::File(path) => multipart
                    .file(name.clone(), path)
                    .map_err(|e| TransportError::Attach(path.clone(), e))?,
            };
        }

        let response = self.client.post(url).multipart(multipart).send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            return Err(TransportError::Status {
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_owned(),
                code: status.as_u16(),
            });
        }
        log::trace!("{url} replied with {} bytes", body.len());
        Ok(body)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[test]
    fn posts_text_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("crash.dmp");
        std::fs::write(&dump, b"MDMP").unwrap();

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/submit")
                .body_contains("name=\"ServerID\"")
                .body_contains("filename=\"crash.dmp\"");
            then.status(200).body("Y|\n");
        });

        let form = Form::new()
            .text("ServerID", "0d4d5b8e-7e1a-4c1e-9a55-4f1c2f2b3c4d")
            .file("upload_file_minidump", &dump);
        let transport = ReqwestTransport::new().unwrap();
        let body = transport.post(&server.url("/submit"), &form).unwrap();

        mock.assert();
        assert_eq!(body, "Y|\n");
    }

    #[test]
    fn http_errors_carry_the_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/symbols/submit");
            then.status(503).body("down");
        });

        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .post(&server.url("/symbols/submit"), &Form::new().text("a", "b"))
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { code: 503, .. }));
        assert_eq!(err.to_string(), "Service Unavailable (503)");
    }

    #[test]
    fn missing_attachment() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .post(
                "http://127.0.0.1:9/unused",
                &Form::new().file("code_file", "/nonexistent/libfoo.so"),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Attach(..)));
    }

    #[test]
    fn form_lookup() {
        let form = Form::new()
            .optional_text("UserID", None)
            .text("ExtensionVersion", "1.0")
            .file("code_file", "/lib/libc.so.6");
        assert_eq!(form.fields().len(), 2);
        assert_eq!(form.text_value("ExtensionVersion"), Some("1.0"));
        assert_eq!(form.file_value("code_file"), Some(Path::new("/lib/libc.so.6")));
        assert_eq!(form.text_value("code_file"), None);
    }
}
