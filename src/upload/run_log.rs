//! Optional plain-text record of one upload run

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{LineWriter, Write},
    path::Path,
};

pub struct RunLog {
    out: Option<LineWriter<File>>,
}

impl RunLog {
    /// Opens `path` for appending, or returns a log that drops every line
    pub fn open(path: Option<&Path>) -> Self {
        let out = path.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(LineWriter::new(file)),
                Err(e) => {
                    log::error!("failed to open upload log {}: {e}", path.display());
                    None
                }
            }
        });
        Self { out }
    }

    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        let Some(out) = &mut self.out else {
            return;
        };
        if let Err(e) = writeln!(out, "{args}") {
            log::warn!("failed to write upload log: {e}");
            self.out = None;
        }
    }
}
