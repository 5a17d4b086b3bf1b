//! CLI entry point: `rfmlink <send|receive> [--config <path>]`
//!
//! Exits non-zero when the radio cannot be initialized; a SIGINT is observed
//! cooperatively between loop iterations and leads to a clean zero exit.

use std::env;
use std::fs;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rfmlink::core::{Error, RadioConfig, Result};
use rfmlink::link::{Receiver, Sender};
use rfmlink::radio::{Rfm69Driver, Session};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Send,
    Receive,
}

fn parse_args<I>(args: I) -> Option<(Role, Option<String>)>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut role = None;
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "send" if role.is_none() => role = Some(Role::Send),
            "receive" if role.is_none() => role = Some(Role::Receive),
            "--config" => config_path = Some(args.next()?),
            _ => return None,
        }
    }
    role.map(|r| (r, config_path))
}

fn load_config(path: Option<&str>) -> Result<RadioConfig> {
    let config: RadioConfig = match path {
        Some(p) => serde_json::from_str(&fs::read_to_string(p)?)
            .map_err(|e| Error::config(format!("cannot parse {}: {}", p, e)))?,
        None => RadioConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn install_sigint() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGINT, &action) }.map_err(|e| Error::Io(e.into()))?;
    Ok(())
}

fn run_sender(config: RadioConfig) -> Result<()> {
    let driver = Rfm69Driver::open(&config)?;
    let session = Session::open(driver, config)?;
    Sender::new(session).run(&SHUTDOWN)
}

fn run_receiver(mut config: RadioConfig) -> Result<()> {
    // Replies are transmitted unconfirmed; the receiver never waits for an
    // acknowledgment of its own acknowledgment
    config.ack_enabled = false;
    let driver = Rfm69Driver::open(&config)?;
    let session = Session::open(driver, config)?;
    Receiver::new(session).run(&SHUTDOWN)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (role, config_path) = match parse_args(env::args().skip(1)) {
        Some(parsed) => parsed,
        None => {
            eprintln!("Usage: rfmlink <send|receive> [--config <path>]");
            process::exit(2);
        }
    };

    let result = load_config(config_path.as_deref()).and_then(|config| {
        install_sigint()?;
        match role {
            Role::Send => run_sender(config),
            Role::Receive => run_receiver(config),
        }
    });

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
    info!("clean shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_role_argument() {
        assert_eq!(parse_args(args(&["send"])), Some((Role::Send, None)));
        assert_eq!(parse_args(args(&["receive"])), Some((Role::Receive, None)));
    }

    #[test]
    fn test_parse_config_flag() {
        assert_eq!(
            parse_args(args(&["send", "--config", "link.json"])),
            Some((Role::Send, Some("link.json".to_string())))
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_args(args(&[])), None);
        assert_eq!(parse_args(args(&["transmit"])), None);
        assert_eq!(parse_args(args(&["send", "receive"])), None);
        assert_eq!(parse_args(args(&["send", "--config"])), None);
    }

    #[test]
    fn test_load_default_config() {
        let config = load_config(None).unwrap();
        assert_eq!(config.frequency_mhz, 433.0);
    }

    #[test]
    fn test_load_missing_config_file_fails() {
        assert!(load_config(Some("/nonexistent/link.json")).is_err());
    }
}
