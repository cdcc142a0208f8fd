//! Line-oriented bridge between the local terminal and a relay.

use anyhow::Context;
use termrelay_client::{RelayConfig, RelayError, SessionState, StateChange, TerminalRelay, Update};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub struct AttachOptions {
    pub path: String,
    pub session: Option<String>,
    pub size: Option<(u16, u16)>,
}

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Input(String),
    Extend,
    Reconnect,
    Resize(u16, u16),
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let Some(command) = line.strip_prefix(':') else {
            return Ok(Command::Input(format!("{line}\n")));
        };
        let mut words = command.split_whitespace();
        match (words.next(), words.next(), words.next(), words.next()) {
            (Some("extend"), None, ..) => Ok(Command::Extend),
            (Some("reconnect"), None, ..) => Ok(Command::Reconnect),
            (Some("quit" | "q"), None, ..) => Ok(Command::Quit),
            (Some("resize"), Some(rows), Some(cols), None) => {
                let rows = rows.parse().map_err(|_| format!("bad row count: {rows}"))?;
                let cols = cols.parse().map_err(|_| format!("bad column count: {cols}"))?;
                Ok(Command::Resize(rows, cols))
            }
            (Some("resize"), ..) => Err("usage: :resize ROWS COLS".to_string()),
            _ => Err(format!("unknown command: :{command}")),
        }
    }
}

pub async fn run(config: RelayConfig, options: AttachOptions) -> anyhow::Result<()> {
    config.validate()?;
    let mut relay = TerminalRelay::new(config);
    relay
        .open(&options.path)
        .await
        .with_context(|| format!("opening {}", options.path))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = relay.next_update() => match update {
                Some(Update::Output(data)) => {
                    stdout.write_all(data.as_bytes()).await?;
                    stdout.flush().await?;
                }
                Some(Update::State(change)) => {
                    report(&change);
                    let opened = change.from == SessionState::Connecting
                        && change.to == SessionState::Connected;
                    if opened {
                        setup(&mut relay, &options);
                    }
                }
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match Command::parse(&line) {
                    Ok(command) => execute(&mut relay, command).await,
                    Err(message) => eprintln!("[termrelay] {message}"),
                },
                None => {
                    stdin_open = false;
                    relay.close();
                }
            },
            _ = tokio::signal::ctrl_c() => relay.close(),
        }
    }

    Ok(())
}

fn setup(relay: &mut TerminalRelay, options: &AttachOptions) {
    if let Some(session) = &options.session {
        if let Err(e) = relay.bind(session.clone()) {
            tracing::warn!(error = %e, "bind failed");
        }
    }
    if let Some((rows, cols)) = options.size {
        if let Err(e) = relay.resize(rows, cols) {
            tracing::warn!(error = %e, "initial resize failed");
        }
    }
}

async fn execute(relay: &mut TerminalRelay, command: Command) {
    let result = match command {
        Command::Input(data) => relay.send_input(data),
        Command::Resize(rows, cols) => relay.resize(rows, cols),
        Command::Extend => relay.extend_session(),
        Command::Reconnect => relay.reconnect().await,
        Command::Quit => {
            relay.close();
            Ok(())
        }
    };
    match result {
        Ok(()) => {}
        Err(RelayError::NotConnected) => {
            eprintln!("[termrelay] not connected ({})", relay.state());
        }
        Err(e) => eprintln!("[termrelay] {e}"),
    }
}

fn report(change: &StateChange) {
    let hint = match change.to {
        SessionState::Expiring => " - type :extend to keep the session",
        SessionState::ConnectionLost => " - type :reconnect to try again",
        SessionState::Expired => " - type :reconnect for a new session or :quit",
        _ => "",
    };
    match &change.reason {
        Some(reason) => eprintln!("[termrelay] {} ({reason}){hint}", change.to),
        None => eprintln!("[termrelay] {}{hint}", change.to),
    }
}
