//! # apnwire
//!
//! Command line front end: send one notification, or stream rejected
//! device tokens from the feedback service.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use apnwire::config::{self, ClientConfig};
use apnwire::transport::Endpoint;
use apnwire::{ApnClient, ClientEvent, Environment, EventKind, SendOptions};
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Legacy binary push-notification client.
#[derive(Parser, Debug)]
#[command(name = "apnwire", about = "Legacy binary push-notification client")]
struct Cli {
    /// Config file (defaults to `~/.apnwire/config.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// `sandbox` or `production` (overrides the config file).
    #[arg(long, global = true)]
    environment: Option<Environment>,

    /// Gateway `host:port` override.
    #[arg(long, global = true)]
    gateway: Option<Endpoint>,

    /// Feedback `host:port` override.
    #[arg(long, global = true)]
    feedback: Option<Endpoint>,

    /// PEM certificate path.
    #[arg(long, global = true)]
    cert: Option<String>,

    /// PEM private key path.
    #[arg(long, global = true)]
    key: Option<String>,

    /// Minimum log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a single notification and wait until it is written.
    Send {
        /// Device token as hex; whitespace is ignored.
        #[arg(long)]
        token: String,

        /// Alert text.
        #[arg(long)]
        alert: String,

        /// Badge number.
        #[arg(long)]
        badge: Option<u32>,

        /// Sound name.
        #[arg(long)]
        sound: Option<String>,

        /// Extra top-level payload keys as a JSON object.
        #[arg(long)]
        custom: Option<String>,

        /// Give up after this many seconds.
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Print rejected device tokens as JSON lines until interrupted.
    Feedback {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig> {
        let path = self.config.clone().unwrap_or_else(config::config_path);
        let mut config = config::load_config_from_path(&path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?;

        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(gateway) = &self.gateway {
            config.gateway = Some(gateway.clone());
        }
        if let Some(feedback) = &self.feedback {
            config.feedback = Some(feedback.clone());
        }
        if let Some(cert) = &self.cert {
            config.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.key {
            config.key_path = Some(key.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(&cli.log_level);

    let config = cli.client_config()?;
    let client = ApnClient::with_tcp(&config, &Handle::current());

    let result = match cli.command {
        Command::Send {
            token,
            alert,
            badge,
            sound,
            custom,
            timeout_secs,
        } => {
            let options = build_options(badge, sound, custom.as_deref())?;
            send(&client, &token, &alert, options, Duration::from_secs(timeout_secs)).await
        }
        Command::Feedback { duration_secs } => {
            feedback(&client, duration_secs.map(Duration::from_secs)).await
        }
    };

    client.shutdown();
    result
}

fn build_options(badge: Option<u32>, sound: Option<String>, custom: Option<&str>) -> Result<SendOptions> {
    let mut options = match custom {
        Some(raw) => {
            let value = serde_json::from_str(raw).context("--custom is not valid JSON")?;
            SendOptions::from_value(value)?
        }
        None => SendOptions::default(),
    };
    if let Some(badge) = badge {
        options = options.with_badge(badge);
    }
    if let Some(sound) = sound {
        options = options.with_sound(sound);
    }
    Ok(options)
}

fn errors_of(client: &ApnClient) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = client.on(EventKind::Error, move |event| {
        if let ClientEvent::Error(err) = event {
            let _ = tx.send(err.to_string());
        }
    });
    rx
}

async fn send(client: &ApnClient, token: &str, alert: &str, options: SendOptions, timeout: Duration) -> Result<()> {
    let mut errors = errors_of(client);
    let delivery = client.send(token, alert, options)?;

    tokio::select! {
        done = delivery => {
            done?;
            info!("notification written");
            println!("sent");
            Ok(())
        }
        Some(err) = errors.recv() => bail!("{err}"),
        () = tokio::time::sleep(timeout) => bail!("timed out after {}s", timeout.as_secs()),
    }
}

async fn feedback(client: &ApnClient, duration: Option<Duration>) -> Result<()> {
    let (tx, mut records) = mpsc::unbounded_channel();
    let _ = client.on(EventKind::Feedback, move |event| {
        if let ClientEvent::Feedback(report) = event {
            let _ = tx.send(report.clone());
        }
    });
    let mut errors = errors_of(client);
    client.start_feedback_listener();

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(report) = records.recv() => {
                println!("{}", serde_json::to_string(&report)?);
            }
            Some(err) = errors.recv() => warn!(error = %err, "feedback channel error"),
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("interrupted");
                return Ok(());
            }
            () = &mut deadline => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_send() {
        let cli = Cli::try_parse_from([
            "apnwire",
            "--environment",
            "production",
            "send",
            "--token",
            "ab",
            "--alert",
            "hi",
            "--badge",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.environment, Some(Environment::Production));
        assert!(matches!(cli.command, Command::Send { badge: Some(4), .. }));
    }

    #[test]
    fn cli_parses_feedback_with_endpoint() {
        let cli = Cli::try_parse_from(["apnwire", "feedback", "--feedback", "127.0.0.1:12196"]).unwrap();
        assert_eq!(cli.feedback, Some(Endpoint::new("127.0.0.1", 12196)));
        assert!(matches!(cli.command, Command::Feedback { duration_secs: None }));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"environment": "production", "certPath": "/file.pem"}"#).unwrap();
        let cli = Cli::try_parse_from([
            "apnwire",
            "--config",
            path.to_str().unwrap(),
            "--cert",
            "/flag.pem",
            "feedback",
        ])
        .unwrap();
        let config = cli.client_config().unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.cert_path.as_deref(), Some("/flag.pem"));
    }

    #[test]
    fn options_merge_custom_and_flags() {
        let options = build_options(Some(2), Some("ping".into()), Some(r#"{"badge": 9, "k": 1}"#)).unwrap();
        assert_eq!(options.badge, 2);
        assert_eq!(options.sound.as_deref(), Some("ping"));
        assert_eq!(options.custom["k"], 1);
    }

    #[test]
    fn invalid_custom_json_rejected() {
        assert!(build_options(None, None, Some("{oops")).is_err());
    }
}
