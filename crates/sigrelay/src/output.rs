use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sigrelay_wire::pretty_id;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One line of command output: something that happened to a session.
#[derive(Serialize, Debug, Clone)]
pub struct SessionEvent {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: String,
}

impl SessionEvent {
    pub fn new(kind: &'static str, code: &str) -> Self {
        Self {
            kind,
            code: code.to_string(),
            peer_id: None,
            channel: None,
            detail: None,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn peer(mut self, id: &str) -> Self {
        self.peer_id = Some(id.to_string());
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub fn print_event(event: &SessionEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Pretty => println!("{}", pretty_line(event)),
        OutputFormat::Table => print_table(event),
    }
}

fn print_table(event: &SessionEvent) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["EVENT", "CODE", "PEER", "CHANNEL", "DETAIL"])
        .add_row(vec![
            event.kind.to_string(),
            event.code.clone(),
            event.peer_id.as_deref().map(pretty_id).unwrap_or_default(),
            event.channel.clone().unwrap_or_default(),
            event.detail.clone().unwrap_or_default(),
        ]);
    println!("{table}");
}

fn pretty_line(event: &SessionEvent) -> String {
    let mut line = event.kind.to_string();
    if !event.code.is_empty() {
        line.push_str(&format!(" code={}", event.code));
    }
    if let Some(peer) = &event.peer_id {
        line.push_str(&format!(" peer={}", pretty_id(peer)));
    }
    if let Some(channel) = &event.channel {
        line.push_str(&format!(" channel={channel}"));
    }
    if let Some(detail) = &event.detail {
        line.push_str(&format!(" {detail}"));
    }
    line
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
