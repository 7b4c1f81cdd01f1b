//! The per-install server identifier
//!
//! Lives in `<dump dir>/server-id.txt` as a lowercase hyphenated UUID v4. A missing or malformed
//! file is replaced with a fresh id.

use crate::errors::ServerIdError;
use std::{fs, io, path::Path};

pub const SERVER_ID_FILE: &str = "server-id.txt";
pub const SERVER_ID_LEN: usize = 36;

fn is_valid(id: &str) -> bool {
    id.len() == SERVER_ID_LEN && uuid::Uuid::try_parse(id).is_ok()
}

/// Returns the stored id, generating and persisting one if needed
///
/// A generated id that cannot be written is still returned so the current run can use it; the
/// write failure is logged.
pub fn load_or_create(dump_dir: &Path) -> Result<String, ServerIdError> {
    let path = dump_dir.join(SERVER_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let id = contents.trim();
            if is_valid(id) {
                return Ok(id.to_owned());
            }
            log::warn!("ignoring malformed server id in {}", path.display());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ServerIdError::Read(path, e)),
    }

    let id = uuid::Uuid::new_v4().hyphenated().to_string();
    if let Err(e) = persist(&path, &id) {
        log::error!("{e}, using {id} for this run only");
    } else {
        log::info!("generated server id {id}");
    }
    Ok(id)
}

fn persist(path: &Path, id: &str) -> Result<(), ServerIdError> {
    crate::fail_point!(
        SERVER_ID_PERSIST,
        ServerIdError::Persist(path.to_owned(), io::Error::other("forced failure"))
    );
    fs::write(path, id).map_err(|e| ServerIdError::Persist(path.to_owned(), e))
}
