//! Topic scheme: everything lives under `devices/{organization}/{device}/`.

pub fn telemetry_topic(organization: &str, device: &str) -> String {
    format!("devices/{organization}/{device}/telemetry")
}

pub fn status_topic(organization: &str, device: &str) -> String {
    format!("devices/{organization}/{device}/status")
}

pub fn alert_topic(organization: &str, device: &str) -> String {
    format!("devices/{organization}/{device}/alert")
}

pub fn commands_topic(organization: &str, device: &str) -> String {
    format!("devices/{organization}/{device}/commands")
}

pub fn config_topic(organization: &str, device: &str) -> String {
    format!("devices/{organization}/{device}/config")
}

pub fn command_response_topic(organization: &str, device: &str) -> String {
    format!("devices/{organization}/{device}/command_response")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Commands,
    Config,
}

/// Classifies an inbound topic. Anything that is not a four-segment
/// `devices/{organization}/{device}/{kind}` path with a known kind is
/// ignored by the caller.
pub fn parse_inbound(topic: &str) -> Option<InboundKind> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() != 4 {
        return None;
    }

    match segments[3] {
        "commands" => Some(InboundKind::Commands),
        "config" => Some(InboundKind::Config),
        _ => None,
    }
}
