//! Conversion of the host's `steam.inf` into sidecar lines

use std::{io::Read, path::Path};

/// Most of `steam.inf` that is ever read
pub const MAX_STEAM_INF: usize = 1023;

/// Turns `steam.inf` contents into `\nSteam_<key>=<value>` lines
///
/// `//` comments, carriage returns and blank lines are dropped.
pub fn format_steam_inf(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len() + 64);
    for line in contents.lines() {
        let line = line.find("//").map_or(line, |idx| &line[..idx]);
        let line = line.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }
        out.push_str("\nSteam_");
        out.push_str(line);
    }
    out
}

/// Reads and formats `steam.inf`, returning an empty string when it is unavailable
pub fn read_steam_inf(path: &Path) -> String {
    let mut buf = Vec::with_capacity(MAX_STEAM_INF);
    match std::fs::File::open(path).and_then(|f| f.take(MAX_STEAM_INF as u64).read_to_end(&mut buf)) {
        Ok(_) => format_steam_inf(&String::from_utf8_lossy(&buf)),
        Err(e) => {
            log::debug!("no steam.inf at {}: {e}", path.display());
            String::new()
        }
    }
}
