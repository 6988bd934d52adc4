//! Console capability consumed by the client engine.
//!
//! The engine only needs "show a line" and "ask for a line"; everything
//! about how a terminal renders is behind this trait. Tests substitute a
//! scripted implementation.

use std::io::Write;

use async_trait::async_trait;
use crossterm::{
    event::{Event, KeyCode, KeyEventKind, KeyModifiers},
    style::Stylize,
    terminal,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Stdin},
    sync::Mutex,
};

/// Line-oriented user interaction.
#[async_trait]
pub trait Console: Send + Sync {
    /// Show one line of ordinary output.
    fn display_line(&self, text: &str);

    /// Show one line of emphasized output (headers, status).
    fn display_emphasis_line(&self, text: &str);

    /// Prompt for a line of input.
    ///
    /// Returns `Ok(None)` on end-of-input. With `masked` set the typed
    /// characters are not echoed (passphrases).
    ///
    /// # Errors
    ///
    /// I/O failure on the underlying terminal.
    async fn read_line(&self, prompt: &str, masked: bool) -> std::io::Result<Option<String>>;
}

/// Console over the process's stdin/stdout.
pub struct TerminalConsole {
    input: Mutex<BufReader<Stdin>>,
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalConsole {
    /// Wrap the process's standard streams.
    pub fn new() -> Self {
        Self { input: Mutex::new(BufReader::new(tokio::io::stdin())) }
    }

    fn print_prompt(prompt: &str) -> std::io::Result<()> {
        let mut out = std::io::stdout();
        write!(out, "{prompt}")?;
        out.flush()
    }
}

#[async_trait]
impl Console for TerminalConsole {
    fn display_line(&self, text: &str) {
        println!("{text}");
    }

    fn display_emphasis_line(&self, text: &str) {
        println!("{}", text.bold());
    }

    async fn read_line(&self, prompt: &str, masked: bool) -> std::io::Result<Option<String>> {
        Self::print_prompt(prompt)?;

        if masked {
            // Raw-mode key events; nothing is echoed.
            let line = tokio::task::spawn_blocking(read_masked_line)
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
            println!();
            return Ok(line);
        }

        let mut input = self.input.lock().await;
        let mut line = String::new();
        let read = input.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// Collect one line of key events with the terminal in raw mode.
fn read_masked_line() -> std::io::Result<Option<String>> {
    terminal::enable_raw_mode()?;
    let result = collect_masked_keys();
    terminal::disable_raw_mode()?;
    result
}

fn collect_masked_keys() -> std::io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        let Event::Key(key) = crossterm::event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(Some(line)),
            KeyCode::Backspace => {
                line.pop();
            }
            KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(None);
            }
            KeyCode::Char(c) => line.push(c),
            _ => {}
        }
    }
}
