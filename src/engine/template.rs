//! Command templates with positional slots filled from a job's payload.
//!
//! `{}` takes the next payload item, `{N}` takes item `N`; `{{` and `}}` are literal braces.
//! The two slot styles cannot be mixed in one template. No shell escaping is applied to payload
//! items: callers are responsible for the safety of the paths they substitute.

use std::process::Command;

use crate::error::{PipelineError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Lit(String),
    Slot(usize),
}

/// A parsed command template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl CommandTemplate {
    /// Parse `template`. Unbalanced braces and mixed `{}`/`{N}` slots are configuration errors.
    pub fn parse(template: &str) -> Result<Self> {
        if template.trim().is_empty() {
            return Err(PipelineError::config("command template is empty"));
        }
        let mut pieces = Vec::new();
        let mut lit = String::new();
        let mut auto = 0_usize;
        let (mut saw_auto, mut saw_explicit) = (false, false);
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    lit.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    lit.push('}');
                }
                '{' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            _ => {
                                return Err(PipelineError::config(format!(
                                    "malformed slot in command template `{template}`"
                                )));
                            }
                        }
                    }
                    let index = if digits.is_empty() {
                        saw_auto = true;
                        auto += 1;
                        auto - 1
                    } else {
                        saw_explicit = true;
                        digits.parse::<usize>().map_err(|_| {
                            PipelineError::config(format!("slot index too large in `{template}`"))
                        })?
                    };
                    if !lit.is_empty() {
                        pieces.push(Piece::Lit(std::mem::take(&mut lit)));
                    }
                    pieces.push(Piece::Slot(index));
                }
                '}' => {
                    return Err(PipelineError::config(format!(
                        "unmatched `}}` in command template `{template}`"
                    )));
                }
                _ => lit.push(c),
            }
        }
        if saw_auto && saw_explicit {
            return Err(PipelineError::config(format!(
                "command template `{template}` mixes `{{}}` and `{{N}}` slots"
            )));
        }
        if !lit.is_empty() {
            pieces.push(Piece::Lit(lit));
        }
        Ok(Self {
            source: template.to_string(),
            pieces,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of payload items the template needs (highest slot index + 1).
    pub fn arity(&self) -> usize {
        self.pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Slot(i) => Some(i + 1),
                Piece::Lit(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Fill the slots from `payload`. Fails when the payload is shorter than [`Self::arity`].
    pub fn render(&self, payload: &[String]) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Lit(s) => out.push_str(s),
                Piece::Slot(i) => {
                    let value = payload.get(*i).ok_or_else(|| {
                        PipelineError::config(format!(
                            "command template `{}` needs {} payload item(s), job has {}",
                            self.source,
                            self.arity(),
                            payload.len()
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Build a [`Command`] that runs `cmd` through the platform shell.
pub fn shell_command(cmd: &str) -> Command {
    #[cfg(windows)]
    {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    }
    #[cfg(not(windows))]
    {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// Quote a program path so the platform shell reads it as one word.
pub fn quote_program(program: &str) -> String {
    if cfg!(windows) {
        format!("\"{program}\"")
    } else {
        format!("'{}'", program.replace('\'', r"'\''"))
    }
}
