//! Construction of remote shell command lines.
//!
//! A [`RemoteCommand`] can only be assembled from `&'static str` fragments
//! written in this crate and from dynamic values that pass through
//! `shell_escape`. Raw caller-controlled strings therefore never reach the
//! remote shell unquoted.

use shell_escape::escape;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteCommand {
    line: String,
}

impl RemoteCommand {
    pub fn new(program: &'static str) -> Self {
        Self {
            line: program.to_string(),
        }
    }

    /// Appends a trusted literal such as a subcommand, flag or redirection
    pub fn fragment(mut self, literal: &'static str) -> Self {
        self.push_raw(literal);
        self
    }

    /// Appends a dynamic value, quoted for the remote shell
    pub fn arg(mut self, value: impl AsRef<str>) -> Self {
        let quoted = quote(value.as_ref());
        self.push_raw(&quoted);
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// `flag value` with the value quoted
    pub fn opt(self, flag: &'static str, value: impl AsRef<str>) -> Self {
        self.fragment(flag).arg(value)
    }

    /// `self || fallback`
    pub fn or_else(mut self, fallback: RemoteCommand) -> Self {
        self.push_raw("||");
        self.push_raw(&fallback.line);
        self
    }

    /// `self >/dev/null 2>&1`
    pub fn quiet(self) -> Self {
        self.fragment(">/dev/null 2>&1")
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    fn push_raw(&mut self, piece: &str) {
        self.line.push(' ');
        self.line.push_str(piece);
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}
