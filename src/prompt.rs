//! Operator interaction used while unlocking packages
//!
//! The host never reads the terminal directly; it asks a [`SecretPrompt`].

use std::io::{self, BufRead, Write};
use zeroize::Zeroizing;

use crate::crypto::SecretBuffer;

/// Password and yes/no prompts
pub trait SecretPrompt: Send {
    /// Read a password; an empty buffer means the user entered nothing
    fn prompt_password(&mut self, message: &str) -> io::Result<SecretBuffer>;

    /// Ask a yes/no question
    fn confirm(&mut self, message: &str) -> io::Result<bool>;
}

/// Line-based prompt over stdin/stderr
///
/// Input is echoed; terminals that need hidden input should provide their own
/// [`SecretPrompt`].
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    fn read_line(message: &str) -> io::Result<Zeroizing<String>> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", message)?;
        stderr.flush()?;
        let mut line = Zeroizing::new(String::new());
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(line)
    }
}

impl SecretPrompt for ConsolePrompt {
    fn prompt_password(&mut self, message: &str) -> io::Result<SecretBuffer> {
        let line = Self::read_line(message)?;
        Ok(SecretBuffer::from_str_copy(line.trim_end_matches(['\r', '\n'])))
    }

    fn confirm(&mut self, message: &str) -> io::Result<bool> {
        loop {
            let line = Self::read_line(&format!("{} [y/n] ", message))?;
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }
}

/// Prompt that answers from a fixed script
///
/// Passwords and confirmations are consumed in order; running out of either
/// is reported as an I/O error.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    passwords: std::collections::VecDeque<String>,
    confirmations: std::collections::VecDeque<bool>,
    pub messages: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<P, S>(passwords: P, confirmations: impl IntoIterator<Item = bool>) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passwords: passwords.into_iter().map(Into::into).collect(),
            confirmations: confirmations.into_iter().collect(),
            messages: Vec::new(),
        }
    }
}

impl SecretPrompt for ScriptedPrompt {
    fn prompt_password(&mut self, message: &str) -> io::Result<SecretBuffer> {
        self.messages.push(message.to_string());
        self.passwords
            .pop_front()
            .map(|p| SecretBuffer::from_str_copy(&p))
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted password left"))
    }

    fn confirm(&mut self, message: &str) -> io::Result<bool> {
        self.messages.push(message.to_string());
        self.confirmations
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left"))
    }
}
