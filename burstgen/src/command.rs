//! Process setup shared by every run: logging and the capabilities AF_XDP needs.

use std::io;

use caps::{CapSet, Capability};

/// Initializes `env_logger`, logging at `info` unless `RUST_LOG` says otherwise.
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Makes sure every capability in `required` is effective, raising it from the
/// permitted set when the binary was granted it with `setcap`.
pub fn setup(required: &[Capability]) -> io::Result<()> {
    for &cap in required {
        if caps::has_cap(None, CapSet::Effective, cap).map_err(io::Error::other)? {
            continue;
        }
        if !caps::has_cap(None, CapSet::Permitted, cap).map_err(io::Error::other)? {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{cap} is required: run as root or grant it with setcap"),
            ));
        }
        caps::raise(None, CapSet::Effective, cap)
            .map_err(|e| io::Error::other(format!("Failed to raise {cap}: {e}")))?;
        log::debug!("raised {cap}");
    }
    Ok(())
}
