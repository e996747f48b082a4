//! User interaction: prompts, progress and warnings.

use crate::error::{ReplicationCliError, Result, ReturnCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Source of answers to prompts.
pub trait Prompter: Send + Sync {
    /// Show `prompt` and read one line; `None` at end of input.
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>>;

    /// Read a secret. Defaults to [`Prompter::read_line`].
    fn read_password(&self, prompt: &str) -> io::Result<Option<String>> {
        self.read_line(prompt)
    }
}

/// Prompts on stdout, answers from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Answers prepared in advance; records every prompt shown.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self.answers.lock().pop_front())
    }
}

impl<P: Prompter + ?Sized> Prompter for Arc<P> {
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        (**self).read_line(prompt)
    }

    fn read_password(&self, prompt: &str) -> io::Result<Option<String>> {
        (**self).read_password(prompt)
    }
}

/// In-memory output stream shared with the test that inspects it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type Sink = Mutex<Box<dyn Write + Send>>;

/// Everything the user sees.
pub struct Console {
    interactive: bool,
    quiet: bool,
    prompter: Box<dyn Prompter>,
    out: Sink,
    err: Sink,
}

fn cancelled(e: io::Error) -> ReplicationCliError {
    ReplicationCliError::with_source(ReturnCode::UserCancelled, "cannot read the answer", e)
}

impl Console {
    /// Prompts on the terminal, output on stdout and stderr.
    pub fn new(interactive: bool, quiet: bool) -> Self {
        Self::with_io(
            interactive,
            quiet,
            Box::new(StdinPrompter),
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    pub fn with_io(
        interactive: bool,
        quiet: bool,
        prompter: Box<dyn Prompter>,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            interactive,
            quiet,
            prompter,
            out: Mutex::new(out),
            err: Mutex::new(err),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn write(sink: &Sink, msg: &str) {
        let mut sink = sink.lock();
        // Nothing sensible to do when the terminal is gone.
        let _ = writeln!(sink, "{}", msg);
        let _ = sink.flush();
    }

    /// Informational message, hidden by `--quiet`.
    pub fn println(&self, msg: &str) {
        if !self.quiet {
            Self::write(&self.out, msg);
        }
    }

    /// Requested output such as a status table, shown even when quiet.
    pub fn print_output(&self, msg: &str) {
        Self::write(&self.out, msg);
    }

    pub fn warn(&self, msg: &str) {
        Self::write(&self.err, &format!("Warning: {}", msg));
    }

    pub fn error(&self, msg: &str) {
        Self::write(&self.err, msg);
    }

    /// Yes/no question. Non-interactive sessions take `default`.
    pub fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        if !self.interactive {
            return Ok(default);
        }
        let hint = if default { "yes" } else { "no" };
        loop {
            let answer = self
                .prompter
                .read_line(&format!("{} (yes / no) [{}]: ", question, hint))
                .map_err(cancelled)?
                .ok_or_else(|| ReplicationCliError::new(ReturnCode::UserCancelled, "no answer was given"))?;
            match answer.trim().to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => Self::write(&self.out, "Please answer yes or no."),
            }
        }
    }

    /// Free-form question. Fails in non-interactive sessions unless there is a default.
    pub fn ask(&self, question: &str, default: Option<&str>) -> Result<String> {
        if !self.interactive {
            return default.map(str::to_string).ok_or_else(|| {
                ReplicationCliError::new(
                    ReturnCode::NonInteractiveAborted,
                    format!("a value is required in non-interactive mode: {}", question),
                )
            });
        }
        let prompt = match default {
            Some(d) => format!("{} [{}]: ", question, d),
            None => format!("{}: ", question),
        };
        loop {
            let answer = self
                .prompter
                .read_line(&prompt)
                .map_err(cancelled)?
                .ok_or_else(|| ReplicationCliError::new(ReturnCode::UserCancelled, "no answer was given"))?;
            let answer = answer.trim();
            match (answer.is_empty(), default) {
                (false, _) => return Ok(answer.to_string()),
                (true, Some(d)) => return Ok(d.to_string()),
                (true, None) => {}
            }
        }
    }

    pub fn ask_password(&self, prompt: &str) -> Result<String> {
        if !self.interactive {
            return Err(ReplicationCliError::new(
                ReturnCode::NonInteractiveAborted,
                format!("a password is required in non-interactive mode: {}", prompt),
            ));
        }
        self.prompter
            .read_password(&format!("{}: ", prompt))
            .map_err(cancelled)?
            .ok_or_else(|| ReplicationCliError::new(ReturnCode::UserCancelled, "no password was given"))
    }
}
