//! exclusive-lock command line configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default redis connection string
    pub static DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
    /// Default delay between claim attempts with `--wait`
    pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "exclusive-lock-worker";
    /// default log level. Can use this argument or EXCLUSIVE_LOCK_LOG env var
    pub const DEFAULT_LOG: &str = "info";
    /// log as "json", "pretty" or "standard" (unstructured)
    pub const DEFAULT_LOG_FORMAT: &str = "standard";

    use std::time::Duration;

    pub use clap::Parser;
    use exclusive_lock::{LockOptions, config::DEFAULT_KEY_PREFIX};
    use serde_json::Value;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(
        author,
        name = "exclusive-lock",
        bin_name = "exclusive-lock",
        about,
        long_about = None
    )]
    /// Hold an exclusive lock on a named resource, optionally running a
    /// command while it is held. Loads `.env` from the working dir as well
    pub struct Config {
        /// name of the resource to lock
        #[clap(short, long, env = "EXCLUSIVE_LOCK_NAME", value_parser)]
        pub name: String,
        /// key-space prefix for the lock key
        #[clap(long, env = "EXCLUSIVE_LOCK_PREFIX", value_parser, default_value = DEFAULT_KEY_PREFIX)]
        pub key_prefix: String,
        /// redis server holding the lock
        #[clap(long, env = "REDIS_URL", value_parser, default_value = DEFAULT_REDIS_URL)]
        pub redis_url: String,
        /// lock expiry in ms, must be given with --renewal-interval-ms
        #[clap(long, env = "EXCLUSIVE_LOCK_TTL_MS", value_parser)]
        pub ttl_ms: Option<u64>,
        /// renewal period in ms, must be given with --ttl-ms
        #[clap(long, env = "EXCLUSIVE_LOCK_RENEWAL_INTERVAL_MS", value_parser)]
        pub renewal_interval_ms: Option<u64>,
        /// contents stored with the lock. Parsed as JSON, otherwise stored as
        /// a string
        #[clap(long, env = "EXCLUSIVE_LOCK_CONTENTS", value_parser)]
        pub contents: Option<String>,
        /// keep retrying until the lock is free instead of exiting
        #[clap(short, long, env = "EXCLUSIVE_LOCK_WAIT", value_parser)]
        pub wait: bool,
        /// delay between claim attempts with --wait
        #[clap(long, env = "EXCLUSIVE_LOCK_RETRY_INTERVAL_MS", value_parser, default_value_t = DEFAULT_RETRY_INTERVAL_MS)]
        pub retry_interval_ms: u64,
        /// number of tokio worker threads, defaults to num logical CPUs
        #[clap(long, env = "EXCLUSIVE_LOCK_THREADS", value_parser)]
        pub threads: Option<usize>,
        /// Worker thread name
        #[clap(long, env = "EXCLUSIVE_LOCK_THREAD_NAME", value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env = "EXCLUSIVE_LOCK_LOG", value_parser, default_value = DEFAULT_LOG)]
        pub log: String,
        /// log output format
        #[clap(
            long,
            env = "LOG_FORMAT",
            value_parser = ["standard", "json", "pretty"],
            default_value = DEFAULT_LOG_FORMAT
        )]
        pub log_format: String,
        /// command to run while the lock is held, given after `--`
        #[clap(last = true)]
        pub command: Vec<String>,
    }

    impl Config {
        pub fn retry_interval(&self) -> Duration {
            Duration::from_millis(self.retry_interval_ms)
        }

        /// Lock options for this invocation. Validation happens when the lock
        /// is built.
        pub fn lock_options(&self) -> LockOptions {
            let mut options = LockOptions::new(&self.name).key_prefix(&self.key_prefix);
            options.ttl_ms = self.ttl_ms;
            options.renewal_interval_ms = self.renewal_interval_ms;
            if let Some(raw) = &self.contents {
                options = options.contents(parse_contents(raw));
            }
            options
        }
    }

    fn parse_contents(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// Installed logging setup
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber
        pub fn parse(log: &str, log_frmt: &str) -> Result<Self> {
            let filter = EnvFilter::try_new(log).or_else(|_| EnvFilter::try_new("info"))?;

            match log_frmt {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self {
                log_frmt: log_frmt.to_owned(),
            })
        }
    }
}
