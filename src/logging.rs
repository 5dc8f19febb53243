//! Logging setup.
//!
//! The crate logs through the `log` facade; binaries and tests that want
//! output call [`init`] once. Respects `RUST_LOG` overrides.

use std::io::Write;

/// Initialize env_logger with a timestamped format at the given default
/// level. Safe to call more than once; later calls are no-ops.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
