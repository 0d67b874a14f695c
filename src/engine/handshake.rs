use std::time::{Duration, Instant};

use log::{debug, info, warn};
use vampirc_uci::{parse_one, UciMessage, UciOptionConfig};

use super::session::EngineSession;
use super::types::{deadline_after, remaining_until, BridgeError, BridgeResult};

/// What the engine announced during `uci`
#[derive(Debug, Clone, Default)]
pub struct EngineIdentity {
    pub name: String,
    pub author: String,
    pub options: Vec<UciOptionConfig>,
}

impl EngineIdentity {
    pub fn has_option(&self, option_name: &str) -> bool {
        self.options.iter().any(|opt| option_name_of(opt) == option_name)
    }
}

fn option_name_of(opt: &UciOptionConfig) -> &str {
    match opt {
        UciOptionConfig::Check { name, .. } => name,
        UciOptionConfig::Spin { name, .. } => name,
        UciOptionConfig::Combo { name, .. } => name,
        UciOptionConfig::Button { name } => name,
        UciOptionConfig::String { name, .. } => name,
    }
}

/// Run `uci` → `uciok` then `isready` → `readyok` on a started session.
///
/// Lines that are not part of the handshake are skipped. The whole exchange
/// shares one `timeout` budget.
///
/// # Errors
///
/// - `BridgeError::NotRunning` if the engine is not running, or exits mid-handshake
/// - `BridgeError::Timeout` if either reply does not arrive in time
pub fn uci_handshake(session: &EngineSession, timeout: Duration) -> BridgeResult<EngineIdentity> {
    if !session.is_running() {
        return Err(BridgeError::NotRunning);
    }
    let deadline = deadline_after(timeout);
    let mut identity = EngineIdentity::default();

    debug!("Requesting UCI configuration");
    session.send("uci");
    loop {
        let line = next_line(session, deadline)?;
        match parse_one(&line) {
            UciMessage::Id { name, author } => {
                if let Some(name) = name {
                    debug!("Engine name: {}", name);
                    identity.name = name;
                }
                if let Some(author) = author {
                    identity.author = author;
                }
            }
            UciMessage::Option(opt) => {
                debug!("Engine option: {:?}", opt);
                identity.options.push(opt);
            }
            UciMessage::UciOk => break,
            _ => {}
        }
    }

    session.send("isready");
    loop {
        if let UciMessage::ReadyOk = parse_one(&next_line(session, deadline)?) {
            break;
        }
    }

    if identity.name.is_empty() {
        identity.name = session.engine_name().to_string();
    }
    info!(
        "UCI handshake complete: name={}, options={}",
        identity.name,
        identity.options.len()
    );
    Ok(identity)
}

fn next_line(session: &EngineSession, deadline: Option<Instant>) -> BridgeResult<String> {
    match session.receive(remaining_until(deadline)) {
        Some(line) => Ok(line),
        None if !session.is_running() => {
            warn!("Engine exited during the UCI handshake");
            Err(BridgeError::NotRunning)
        }
        None => {
            warn!("UCI handshake timed out");
            Err(BridgeError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::SessionConfig;
    use crate::engine::embedded::tests::scripted;
    use crate::engine::embedded::EmbeddedTransport;

    fn session() -> EngineSession {
        EngineSession::with_transport(
            SessionConfig::default(),
            Box::new(EmbeddedTransport::new(scripted())),
        )
    }

    #[test]
    fn test_handshake_collects_identity() {
        let session = session();
        session.start().unwrap();
        let identity = uci_handshake(&session, Duration::from_secs(5)).unwrap();
        assert_eq!(identity.name, "Scripted");
        assert_eq!(identity.author, "Tests");
        assert!(identity.has_option("Threads"));
        assert!(!identity.has_option("MultiPV"));
        // nothing left over for the caller
        assert_eq!(session.receive(Duration::from_millis(50)), None);
    }

    #[test]
    fn test_handshake_requires_running_engine() {
        let session = session();
        assert!(matches!(
            uci_handshake(&session, Duration::from_millis(100)),
            Err(BridgeError::NotRunning)
        ));
    }

    #[test]
    fn test_handshake_reports_dead_engine() {
        let session = session();
        session.start().unwrap();
        session.send("panic");
        let result = uci_handshake(&session, Duration::from_secs(5));
        assert!(matches!(result, Err(BridgeError::NotRunning)));
    }

    #[test]
    fn test_handshake_without_deadline() {
        let session = session();
        session.start().unwrap();
        let identity = uci_handshake(&session, Duration::MAX).unwrap();
        assert_eq!(identity.name, "Scripted");
    }

    #[cfg(unix)]
    #[test]
    fn test_handshake_without_deadline_ends_when_engine_exits() {
        use crate::engine::process::tests::script_transport;

        let dir = tempfile::tempdir().unwrap();
        let quitter = "read -r line; echo \"id name Quitter\"; exit 0\n";
        let session = EngineSession::with_transport(
            SessionConfig::default(),
            Box::new(script_transport(&dir, quitter)),
        );
        session.start().unwrap();
        let result = uci_handshake(&session, Duration::MAX);
        assert!(matches!(result, Err(BridgeError::NotRunning)));
        session.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_handshake_times_out_on_silent_engine() {
        use crate::engine::process::tests::script_transport;

        let dir = tempfile::tempdir().unwrap();
        let silent = "while IFS= read -r line; do [ \"$line\" = quit ] && exit 0; done\n";
        let session = EngineSession::with_transport(
            SessionConfig::default(),
            Box::new(script_transport(&dir, silent)),
        );
        session.start().unwrap();
        let start = Instant::now();
        let result = uci_handshake(&session, Duration::from_millis(200));
        assert!(matches!(result, Err(BridgeError::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(2));
        session.stop();
    }
}
