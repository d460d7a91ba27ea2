//! Terminal notifications and sound alerts for waiting sessions.
//!
//! Emits terminal escape codes (BEL, OSC 9, OSC 777, OSC 99) and plays
//! a system sound when a session starts waiting for input.

use std::io::{self, Write};
use std::process::Command;
use std::sync::Mutex;

/// One "waiting for input" alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub session_id: String,
    pub session_name: String,
}

impl Alert {
    pub fn title(&self) -> String {
        format!("ClaudeHub: {}", truncate_preview(&self.session_name, 60))
    }

    pub fn message(&self) -> String {
        "Waiting for your input".to_string()
    }
}

/// Where alerts end up
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &Alert);
}

/// Writes notification escape codes to stdout and optionally plays a sound
#[derive(Debug, Clone)]
pub struct TerminalAlertSink {
    play_sound: bool,
}

impl TerminalAlertSink {
    pub fn new(play_sound: bool) -> Self {
        Self { play_sound }
    }
}

impl Default for TerminalAlertSink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AlertSink for TerminalAlertSink {
    fn alert(&self, alert: &Alert) {
        let mut stdout = io::stdout();
        let _ = write_terminal_notifications(&mut stdout, &alert.title(), &alert.message());
        if self.play_sound {
            play_waiting_sound();
        }
    }
}

/// Records alerts in memory
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }
}

impl AlertSink for RecordingAlertSink {
    fn alert(&self, alert: &Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}

/// Write notification escape codes understood by common terminals.
///
/// - BEL (`\x07`) - Universal terminal bell
/// - OSC 9 (iTerm2) - Desktop notification
/// - OSC 777 (Konsole/VTE/Gnome Terminal) - Desktop notification
/// - OSC 99 (kitty) - Desktop notification
pub fn write_terminal_notifications(
    out: &mut impl Write,
    title: &str,
    message: &str,
) -> io::Result<()> {
    out.write_all(b"\x07")?;

    // ESC ] 9 ; message BEL
    write!(out, "\x1b]9;{}\x07", escape_osc(message))?;

    // ESC ] 777 ; notify ; title ; message BEL
    write!(
        out,
        "\x1b]777;notify;{};{}\x07",
        escape_osc(title),
        escape_osc(message)
    )?;

    // ESC ] 99 ; i=1:d=0:p=body ; message ST (d=0: we play our own sound)
    write!(
        out,
        "\x1b]99;i=1:d=0:p=title;{}\x1b\\\x1b]99;i=1:d=0:p=body;{}\x1b\\",
        escape_osc(title),
        escape_osc(message)
    )?;

    out.flush()
}

/// Escapes special characters for OSC sequences
fn escape_osc(s: &str) -> String {
    // OSC sequences are terminated by BEL or ST
    s.replace('\x07', "")
        .replace('\x1b', "")
        .replace('\n', " ")
        .replace('\r', "")
}

/// Plays the waiting sound in a detached player process
pub fn play_waiting_sound() {
    #[cfg(target_os = "macos")]
    {
        let _ = Command::new("afplay")
            .arg("/System/Library/Sounds/Funk.aiff")
            .arg("-v")
            .arg("0.5")
            .spawn();
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/share/sounds/freedesktop/stereo/message-new-instant.oga",
            "/usr/share/sounds/gnome/default/alerts/drip.ogg",
        ];
        let sound_file = candidates
            .into_iter()
            .find(|path| std::path::Path::new(path).exists());

        if let Some(path) = sound_file {
            // paplay (PulseAudio) first, then aplay (ALSA)
            if Command::new("paplay").arg(path).spawn().is_err() {
                let _ = Command::new("aplay").arg("-q").arg(path).spawn();
            }
        }
    }
}

/// First line of `text`, cut to at most `max_chars` characters
fn truncate_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let kept: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_osc_removes_control_chars() {
        assert_eq!(escape_osc("hello\x07world"), "helloworld");
        assert_eq!(escape_osc("test\x1b[0m"), "test[0m");
        assert_eq!(escape_osc("line1\nline2"), "line1 line2");
    }

    #[test]
    fn notifications_cover_all_terminal_flavors() {
        let mut out = Vec::new();
        write_terminal_notifications(&mut out, "ClaudeHub: fix\x07", "Waiting").unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with('\x07'));
        assert!(text.contains("\x1b]9;Waiting\x07"));
        assert!(text.contains("\x1b]777;notify;ClaudeHub: fix;Waiting\x07"));
        assert!(text.contains("\x1b]99;i=1:d=0:p=body;Waiting\x1b\\"));
    }

    #[test]
    fn truncate_preview_is_char_safe() {
        let long_text = "é".repeat(100);
        let truncated = truncate_preview(&long_text, 60);
        assert_eq!(truncated.chars().count(), 60);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_preview_takes_first_line() {
        assert_eq!(truncate_preview("first line\nsecond line", 80), "first line");
    }

    #[test]
    fn alert_title_names_the_session() {
        let alert = Alert {
            session_id: "s1".into(),
            session_name: "Fix checkout".into(),
        };
        assert_eq!(alert.title(), "ClaudeHub: Fix checkout");
    }
}
