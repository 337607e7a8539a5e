use std::fs;
use tracing::warn;

const OS_RELEASE: &str = "/etc/os-release";

/// Host distribution id from /etc/os-release (e.g. "debian"), or "unknown".
pub fn detect_os() -> String {
    match fs::read_to_string(OS_RELEASE) {
        Ok(s) => parse_os_id(&s).unwrap_or_else(|| "unknown".to_string()),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("read {OS_RELEASE}: {e}");
            }
            "unknown".to_string()
        }
    }
}

fn parse_os_id(s: &str) -> Option<String> {
    // os-release: KEY=value lines, values optionally quoted.
    for line in s.lines() {
        let Some((k, v)) = line.trim().split_once('=') else { continue };
        if k.trim() == "ID" {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}
