//! Operator console for a running query service.

use crate::array::ArrayId;
use crate::coordinator::Coordinator;
use crate::core::{ArrayError, Result};
use std::fmt::Write;

const DEFAULT_STOP_REASON: &str = "Operator requested shutdown";

pub const HELP: &str = "\
commands:
  list nodes          unassigned nodes in claim order
  list arrays         active arrays
  reports             core timeout reports received
  dissolve <array-id> remove an array and release its members
  stop [reason]       terminate every node and stop the query service
  help                this text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    ListNodes,
    ListArrays,
    Reports,
    Dissolve(ArrayId),
    Stop(String),
    Help,
}

impl ConsoleCommand {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "list" => match words.next().map(str::to_ascii_lowercase).as_deref() {
                Some("nodes") => Self::ListNodes,
                Some("arrays") => Self::ListArrays,
                _ => return Err(usage("list nodes | list arrays")),
            },
            "reports" => Self::Reports,
            "dissolve" => {
                let id = words.next().ok_or_else(|| usage("dissolve <array-id>"))?;
                Self::Dissolve(id.parse()?)
            }
            "stop" => {
                let reason = words.collect::<Vec<_>>().join(" ");
                if reason.is_empty() {
                    Self::Stop(DEFAULT_STOP_REASON.to_string())
                } else {
                    Self::Stop(reason)
                }
            }
            "help" | "?" => Self::Help,
            other => return Err(usage(&format!("unknown command '{}', try help", other))),
        };
        Ok(Some(command))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

fn usage(text: &str) -> ArrayError {
    ArrayError::Protocol(format!("usage: {}", text))
}

/// Runs `command` and renders its outcome as text.
pub async fn execute(coordinator: &Coordinator, command: ConsoleCommand) -> String {
    let mut out = String::new();
    match command {
        ConsoleCommand::ListNodes => {
            let nodes = coordinator.unassigned_nodes().await;
            let _ = writeln!(out, "{} unassigned node(s)", nodes.len());
            for node in nodes {
                let _ = writeln!(out, "  {}", node.label());
            }
        }
        ConsoleCommand::ListArrays => {
            let arrays = coordinator.active_arrays().await;
            let _ = writeln!(out, "{} active array(s)", arrays.len());
            for array in arrays {
                let _ = writeln!(out, "  {} (formed {})", array, array.formed_at().to_rfc3339());
            }
        }
        ConsoleCommand::Reports => {
            let reports = coordinator.core_timeout_reports().await;
            let _ = writeln!(out, "{} core timeout report(s)", reports.len());
            for report in reports {
                let _ = writeln!(out, "  {}", report);
            }
        }
        ConsoleCommand::Dissolve(id) => {
            match coordinator.remove_array(&id, "Dissolved by operator").await {
                Some(array) => {
                    let _ = writeln!(out, "dissolved {}", array);
                }
                None => {
                    let _ = writeln!(out, "no active array {}", id);
                }
            }
        }
        ConsoleCommand::Stop(reason) => {
            let report = coordinator.stop_all(&reason).await;
            let _ = writeln!(
                out,
                "stopped: {} node(s) terminated, {} unreachable",
                report.terminated, report.unreachable
            );
        }
        ConsoleCommand::Help => {
            let _ = writeln!(out, "{}", HELP);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("list nodes").unwrap(), Some(ConsoleCommand::ListNodes));
        assert_eq!(ConsoleCommand::parse("  LIST Arrays ").unwrap(), Some(ConsoleCommand::ListArrays));
        assert_eq!(ConsoleCommand::parse("reports").unwrap(), Some(ConsoleCommand::Reports));
        assert_eq!(ConsoleCommand::parse("?").unwrap(), Some(ConsoleCommand::Help));
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_stop_reason() {
        assert_eq!(
            ConsoleCommand::parse("stop").unwrap(),
            Some(ConsoleCommand::Stop(DEFAULT_STOP_REASON.to_string()))
        );
        let stop = ConsoleCommand::parse("stop  maintenance window ").unwrap().unwrap();
        assert_eq!(stop, ConsoleCommand::Stop("maintenance window".to_string()));
        assert!(stop.is_stop());
    }

    #[test]
    fn test_parse_dissolve() {
        let id = ArrayId::new();
        assert_eq!(
            ConsoleCommand::parse(&format!("dissolve {}", id)).unwrap(),
            Some(ConsoleCommand::Dissolve(id))
        );
        assert!(ConsoleCommand::parse("dissolve").is_err());
        assert!(ConsoleCommand::parse("dissolve not-a-uuid").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(ConsoleCommand::parse("list").is_err());
        assert!(ConsoleCommand::parse("list shards").is_err());
        assert!(ConsoleCommand::parse("form").is_err());
    }
}
