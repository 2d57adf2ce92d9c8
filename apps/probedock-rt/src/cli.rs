use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Settings;
use crate::model::TestResult;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "probedock-rt",
    about = "Talk to a local Probe Dock RT agent",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "HOST",
        help = "Agent host (defaults to the config file, then 127.0.0.1)"
    )]
    pub host: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "PORT",
        help = "Agent port (defaults to the config file, then 1337)"
    )]
    pub port: Option<u16>,

    #[arg(
        long = "connect-timeout-ms",
        global = true,
        value_name = "MS",
        help = "Bound on the initial connection attempt"
    )]
    pub connect_timeout_ms: Option<u64>,

    #[arg(
        long = "linger-ms",
        global = true,
        default_value_t = 250,
        value_name = "MS",
        help = "Time left for queued events to reach the agent before exiting"
    )]
    pub linger_ms: u64,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Command-line values win over the config file and environment, which
    /// [`Settings::load`] has already applied.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(host) = &self.host {
            settings.endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.endpoint.port = port;
        }
        if let Some(ms) = self.connect_timeout_ms {
            settings.connect_timeout = Duration::from_millis(ms);
        }
        if let Command::Filters(args) = &self.command {
            if let Some(ms) = args.timeout_ms {
                settings.filters_timeout = Duration::from_millis(ms);
            }
        }
        settings
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "PROBEDOCK_RT_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "PROBEDOCK_RT_LOG_FILE",
        help = "Write logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check whether the agent accepts connections
    Status,
    /// Print the filters currently defined in the agent
    Filters(FiltersArgs),
    /// Announce the start of a test run
    Start(RunArgs),
    /// Announce the end of a test run
    End(EndArgs),
    /// Report a single test result
    Result(ResultArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct FiltersArgs {
    #[arg(long, help = "Print the filters as a JSON array")]
    pub json: bool,

    #[arg(long = "timeout-ms", value_name = "MS", help = "How long to wait for the agent's answer")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, value_name = "NAME", help = "Project name")]
    pub project: String,

    #[arg(long = "project-version", value_name = "VERSION", help = "Project version")]
    pub project_version: String,

    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EndArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long, value_name = "MS", default_value_t = 0, help = "Duration of the whole run")]
    pub duration: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ResultArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long, value_name = "NAME", help = "Test name")]
    pub name: String,

    #[arg(long, help = "Report the test as failed")]
    pub failed: bool,

    #[arg(long, help = "Report the test as inactive")]
    pub inactive: bool,

    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub duration: u64,

    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,

    #[arg(long, value_name = "FINGERPRINT")]
    pub fingerprint: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub message: Option<String>,

    #[arg(long = "test-category", value_name = "CATEGORY", help = "Category of this test; --category is the fallback")]
    pub test_category: Option<String>,

    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    #[arg(long = "ticket", value_name = "TICKET")]
    pub tickets: Vec<String>,

    #[arg(long = "data", value_name = "KEY=VALUE", value_parser = parse_data)]
    pub data: Vec<(String, String)>,
}

impl ResultArgs {
    pub fn to_result(&self) -> TestResult {
        let mut result = TestResult::new(self.name.clone(), !self.failed, self.duration);
        result.active = !self.inactive;
        result.key = self.key.clone();
        result.fingerprint = self.fingerprint.clone();
        result.message = self.message.clone();
        result.category = self.test_category.clone();
        result.tags = self.tags.iter().cloned().collect();
        result.tickets = self.tickets.iter().cloned().collect();
        result.data = self.data.iter().cloned().collect();
        result
    }
}

fn parse_data(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::try_parse_from([
            "probedock-rt",
            "--host",
            "10.1.1.1",
            "--port",
            "4100",
            "filters",
            "--timeout-ms",
            "300",
        ])
        .expect("parse");
        let settings = cli.apply(Settings::default());
        assert_eq!(settings.url(), "http://10.1.1.1:4100");
        assert_eq!(settings.filters_timeout, Duration::from_millis(300));
    }

    #[test]
    fn agent_address_is_left_to_the_settings_layer() {
        let command = Cli::command();
        for id in ["host", "port"] {
            let arg = command
                .get_arguments()
                .find(|arg| arg.get_id().as_str() == id)
                .expect("argument");
            assert!(arg.get_env().is_none(), "--{id} reads the environment");
        }

        let cli = Cli::try_parse_from(["probedock-rt", "status"]).expect("parse");
        let resolved = Settings {
            endpoint: crate::config::Endpoint::new("agent.local", 4200),
            ..Settings::default()
        };
        assert_eq!(cli.apply(resolved).url(), "http://agent.local:4200");
    }

    #[test]
    fn result_flags_build_a_test_result() {
        let cli = Cli::try_parse_from([
            "probedock-rt",
            "result",
            "--project",
            "api",
            "--project-version",
            "1.0",
            "--name",
            "logs in",
            "--failed",
            "--tag",
            "auth",
            "--data",
            "os=linux",
        ])
        .expect("parse");
        let Command::Result(args) = cli.command else {
            panic!("expected the result command");
        };
        let result = args.to_result();
        assert!(!result.passed);
        assert!(result.active);
        assert!(result.tags.contains("auth"));
        assert_eq!(result.data.get("os").map(String::as_str), Some("linux"));
    }

    #[test]
    fn data_requires_a_key() {
        assert!(parse_data("=x").is_err());
        assert!(parse_data("novalue").is_err());
        assert_eq!(parse_data("a=b=c"), Ok(("a".into(), "b=c".into())));
    }
}
