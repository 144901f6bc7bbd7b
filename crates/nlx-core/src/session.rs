//! Session identity and time helpers.

/// Current wall-clock time as epoch milliseconds.
///
/// Context and turn timestamps use this everywhere so persisted payloads
/// compare with plain integer ordering.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Derive the default per-user, per-machine session id: `user@host`.
///
/// Callers that want several independent conversations on one machine append
/// a `:suffix` themselves (e.g. `alice@box:work`).
pub fn default_session_id() -> String {
    format!("{}@{}", username(), hostname())
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_string())
}

#[cfg(unix)]
fn hostname() -> String {
    // gethostname(2) — no extra crate needed, libc is already a workspace dep.
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
