//! Line-oriented console
//!
//! Each input line is one [`ConsoleCommand`]. Manager events are rendered
//! as single lines by [`describe_event`].

use anyhow::{bail, Context};
use tail_control::ManagerEvent;
use tail_protocol::DeviceId;

/// Help text listing every console command
pub const HELP: &str = "\
Commands:
  discover                  start scanning for devices
  stop                      stop scanning
  connect [id]              connect to a device (default: first known)
  disconnect [id]           disconnect a device (default: all)
  queue <cmd> [id...]       queue a command or pause:<secs> (default: all)
  cancel <entry>            remove a queued entry
  run <cmd>                 send a command right away, bypassing the queue
  send <text>               send a raw line to every connected device
  finish <id> <cmd>         make a simulated device report the end of a command
  fake on|off               toggle fake-tail mode
  name <id> <name>          set a display name
  names clear               drop every display name
  commands                  list the catalog
  devices                   list known devices
  status                    show the manager state
  save                      write settings to disk
  help                      show this text
  quit                      exit";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Discover,
    StopDiscovery,
    Connect(Option<DeviceId>),
    Disconnect(Option<DeviceId>),
    Queue {
        command: String,
        devices: Vec<DeviceId>,
    },
    Cancel(u64),
    Run(String),
    Send(String),
    Finish {
        device: DeviceId,
        command: String,
    },
    Fake(bool),
    Name {
        device: DeviceId,
        name: String,
    },
    ClearNames,
    Commands,
    Devices,
    Status,
    Save,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse a console line; `Ok(None)` for blank lines
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "discover" | "scan" => ConsoleCommand::Discover,
            "stop" => ConsoleCommand::StopDiscovery,
            "connect" => ConsoleCommand::Connect(args.next().map(DeviceId::from)),
            "disconnect" => ConsoleCommand::Disconnect(args.next().map(DeviceId::from)),
            "queue" | "q" => {
                let Some(command) = args.next() else {
                    bail!("usage: queue <cmd> [id...]");
                };
                ConsoleCommand::Queue {
                    command: command.to_string(),
                    devices: args.map(DeviceId::from).collect(),
                }
            }
            "cancel" => {
                let entry = args.next().context("usage: cancel <entry>")?;
                let entry = entry
                    .parse()
                    .with_context(|| format!("not a queue entry id: {}", entry))?;
                ConsoleCommand::Cancel(entry)
            }
            "run" => ConsoleCommand::Run(args.next().context("usage: run <cmd>")?.to_string()),
            "send" => {
                if rest.is_empty() {
                    bail!("usage: send <text>");
                }
                ConsoleCommand::Send(rest.to_string())
            }
            "finish" => match (args.next(), args.next()) {
                (Some(device), Some(command)) => ConsoleCommand::Finish {
                    device: DeviceId::from(device),
                    command: command.to_string(),
                },
                _ => bail!("usage: finish <id> <cmd>"),
            },
            "fake" => match args.next() {
                Some("on") => ConsoleCommand::Fake(true),
                Some("off") => ConsoleCommand::Fake(false),
                _ => bail!("usage: fake on|off"),
            },
            "name" => {
                let device = args.next().context("usage: name <id> <name>")?;
                let name = args.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    bail!("usage: name <id> <name>");
                }
                ConsoleCommand::Name {
                    device: DeviceId::from(device),
                    name,
                }
            }
            "names" => match args.next() {
                Some("clear") => ConsoleCommand::ClearNames,
                _ => bail!("usage: names clear"),
            },
            "commands" | "catalog" => ConsoleCommand::Commands,
            "devices" => ConsoleCommand::Devices,
            "status" => ConsoleCommand::Status,
            "save" => ConsoleCommand::Save,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => bail!("unknown command: {} (try 'help')", other),
        };
        Ok(Some(cmd))
    }
}

/// Render an event as one console line, or None for chatter
pub fn describe_event(event: &ManagerEvent) -> Option<String> {
    let line = match event {
        ManagerEvent::CommandChanged(Some(cmd)) => format!("current command: {}", cmd.command),
        ManagerEvent::CommandChanged(None) => "current command cleared".to_string(),
        ManagerEvent::CommandStateChanged {
            key, is_running, ..
        } => {
            // Availability flips are implied by the running change
            if !*is_running {
                return None;
            }
            format!("{} running", key.command)
        }
        ManagerEvent::FailSafeTriggered { key } => {
            format!("{} never reported its end, released", key.command)
        }
        ManagerEvent::CatalogChanged { count } => format!("catalog: {} command(s)", count),
        ManagerEvent::QueueCountChanged(n) => format!("queue: {}", n),
        ManagerEvent::DeviceCountChanged(n) => format!("devices: {}", n),
        ManagerEvent::DiscoveryRunningChanged(true) => "discovery started".to_string(),
        ManagerEvent::DiscoveryRunningChanged(false) => "discovery finished".to_string(),
        ManagerEvent::AdapterStateChanged(state) => format!("adapter: {}", state.name()),
        ManagerEvent::ConnectedChanged(true) => "connected".to_string(),
        ManagerEvent::ConnectedChanged(false) => "not connected".to_string(),
        ManagerEvent::DeviceConnected(id) => format!("{} connected", id),
        ManagerEvent::DeviceMessage { .. } => event.message_text()?,
        ManagerEvent::FakeTailModeChanged(on) => {
            format!("fake-tail mode {}", if *on { "on" } else { "off" })
        }
        ManagerEvent::DeviceNamesCleared => "device names cleared".to_string(),
        ManagerEvent::Error { source, message } => format!("error [{}]: {}", source, message),
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tail_control::AdapterState;
    use tail_protocol::CommandKey;

    fn parse(line: &str) -> ConsoleCommand {
        ConsoleCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_optional_device() {
        assert_eq!(parse("connect"), ConsoleCommand::Connect(None));
        assert_eq!(
            parse("disconnect T1"),
            ConsoleCommand::Disconnect(Some(DeviceId::from("T1")))
        );
    }

    #[test]
    fn test_queue_targets() {
        assert_eq!(
            parse("queue pause:3 T1 T2"),
            ConsoleCommand::Queue {
                command: "pause:3".into(),
                devices: vec![DeviceId::from("T1"), DeviceId::from("T2")],
            }
        );
        assert_eq!(
            parse("Q EARA"),
            ConsoleCommand::Queue {
                command: "EARA".into(),
                devices: vec![],
            }
        );
    }

    #[test]
    fn test_send_keeps_whole_text() {
        assert_eq!(
            parse("send  VER  please "),
            ConsoleCommand::Send("VER  please".into())
        );
    }

    #[test]
    fn test_name_with_spaces() {
        assert_eq!(
            parse("name AA:BB Left ear"),
            ConsoleCommand::Name {
                device: DeviceId::from("AA:BB"),
                name: "Left ear".into(),
            }
        );
    }

    #[test]
    fn test_usage_errors() {
        for line in ["queue", "cancel", "cancel x", "fake maybe", "name T1", "finish T1", "bogus"] {
            assert!(ConsoleCommand::parse(line).is_err(), "{}", line);
        }
    }

    #[test]
    fn test_describe() {
        let key = CommandKey::new("ears", "Ears A", "EARA");
        assert_eq!(
            describe_event(&ManagerEvent::FailSafeTriggered { key: key.clone() }).as_deref(),
            Some("EARA never reported its end, released")
        );
        assert_eq!(
            describe_event(&ManagerEvent::CommandStateChanged {
                key,
                is_running: false,
                is_available: true,
            }),
            None
        );
        assert_eq!(
            describe_event(&ManagerEvent::AdapterStateChanged(AdapterState::NoAdapter)).as_deref(),
            Some("adapter: No adapter")
        );
        assert_eq!(
            describe_event(&ManagerEvent::DeviceMessage {
                id: DeviceId::from("T1"),
                text: "VER 1.2".into(),
            })
            .as_deref(),
            Some("T1 says:\nVER 1.2")
        );
    }
}
