//! Line-oriented terminal presentation.
//!
//! Turns successive snapshots into printable lines and parses the commands
//! typed on stdin.

use crate::session::{AppSnapshot, SessionStats};

/// A command typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    Start,
    Stop,
    Connect,
    Disconnect,
    Stats,
    Help,
    Quit,
}

pub const HELP: &str = "commands: start | stop | connect | disconnect | stats | help | quit";

pub fn parse_command(line: &str) -> Option<TerminalCommand> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "start" | "listen" => TerminalCommand::Start,
        "stop" => TerminalCommand::Stop,
        "connect" | "reconnect" => TerminalCommand::Connect,
        "disconnect" => TerminalCommand::Disconnect,
        "stats" => TerminalCommand::Stats,
        "help" | "?" => TerminalCommand::Help,
        "quit" | "exit" | "q" => TerminalCommand::Quit,
        _ => return None,
    };
    Some(command)
}

/// Lines describing what changed between two snapshots
pub fn describe_changes(prev: &AppSnapshot, next: &AppSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.connection_label != next.connection_label {
        lines.push(format!("[connection] {}", next.connection_label));
    }
    if prev.mode != next.mode {
        lines.push(format!("[mic] {:?}", next.mode).to_lowercase());
    }
    if prev.status.speech_status != next.status.speech_status {
        if let Some(status) = &next.status.speech_status {
            lines.push(format!("[speech] {}", status));
        }
    }
    if prev.status.processing_status != next.status.processing_status {
        if let Some(status) = &next.status.processing_status {
            lines.push(format!("[processing] {}", status));
        }
    }
    if prev.turn.transcript != next.turn.transcript {
        if let Some(transcript) = &next.turn.transcript {
            lines.push(format!("You: {}", transcript));
        }
    }
    if prev.turn.assistant_reply != next.turn.assistant_reply {
        if let Some(reply) = &next.turn.assistant_reply {
            lines.push(format!("Assistant: {}", reply));
        }
    }
    if prev.turn.audio != next.turn.audio {
        if let Some(audio) = &next.turn.audio {
            let duration = audio
                .info
                .map(|info| format!(", {:.1}s", info.duration_secs))
                .unwrap_or_default();
            lines.push(format!("[audio] {} ({} bytes{})", audio.uri, audio.byte_len, duration));
        }
    }
    if prev.last_error != next.last_error {
        if let Some(error) = &next.last_error {
            lines.push(format!("[error] {}", error));
        }
    }

    lines
}

pub fn format_stats(stats: &SessionStats) -> String {
    format!(
        "{} | listening: {} | frames sent: {} dropped: {} ({} bytes) | turns: {} | malformed: {} unknown: {} service errors: {}",
        stats.connection.label(),
        stats.listening,
        stats.frames_sent,
        stats.frames_dropped,
        stats.bytes_sent,
        stats.turns_completed,
        stats.malformed_frames,
        stats.unknown_events,
        stats.service_errors
    )
}
