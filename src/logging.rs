// SPDX-License-Identifier: MIT

//! Tracing setup for the launcher and the TA host processes it starts.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How log output is filtered and formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// A full `EnvFilter` directive string.
    pub filter: String,
    pub json: bool,
}

impl LogConfig {
    /// Build from `RUST_LOG` (full filter), `TEE_LOG` (level only) and
    /// `LOG_FORMAT`, looked up through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let filter = match lookup("RUST_LOG") {
            Some(f) if !f.is_empty() => f,
            _ => {
                let level = match lookup("TEE_LOG").as_deref() {
                    Some("trace") => "trace",
                    Some("debug") => "debug",
                    Some("warn") | Some("warning") => "warn",
                    Some("error") => "error",
                    _ => "info",
                };
                format!("tee_launcher={level},tee_launcher::comm=warn")
            }
        };
        let json = lookup("LOG_FORMAT").as_deref() == Some("json");
        LogConfig { filter, json }
    }
}

/// Install the global subscriber, writing to stderr.  Later calls are no-ops.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
