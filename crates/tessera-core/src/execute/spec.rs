//! Execution control spec strings.
//!
//! A spec is a comma separated chain of entries, tried in order. Each entry
//! is written in one of three forms:
//!
//! - `name`
//! - `name(key=value, key=value)` or, without a name, `(key=value)`
//! - `name:key(value)key(value)`

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One entry of a spec chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecEntry {
    /// `None` for the nameless `(key=value)` form.
    pub name: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl SpecEntry {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            params: BTreeMap::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn param_bool(&self, backend: &str, key: &str, default: bool) -> Result<bool> {
        match self.param(key) {
            None => Ok(default),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(invalid(backend, key, format!("expected true or false, got '{other}'"))),
        }
    }

    pub fn param_u64(&self, backend: &str, key: &str, default: u64) -> Result<u64> {
        match self.param(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| invalid(backend, key, format!("expected a number, got '{v}'"))),
        }
    }
}

fn invalid(backend: &str, key: &str, message: String) -> Error {
    Error::InvalidParameter {
        backend: backend.to_string(),
        key: key.to_string(),
        message,
    }
}

/// A parsed spec chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSpec {
    pub entries: Vec<SpecEntry>,
}

impl ExecutionSpec {
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text).spec()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for ExecutionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ExecutionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if let Some(name) = &entry.name {
                f.write_str(name)?;
            }
            if entry.name.is_none() || !entry.params.is_empty() {
                let params: Vec<_> = entry.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "({})", params.join(","))?;
            }
        }
        Ok(())
    }
}

struct Parser<'a> {
    chars: Vec<(usize, char)>,
    pos: usize,
    text: &'a str,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().collect(),
            pos: 0,
            text,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.text.len(), |&(i, _)| i)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::SpecSyntax {
            position: self.offset(),
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek().filter(|&c| is_word_char(c)) {
            out.push(c);
            self.pos += 1;
        }
        out
    }

    /// Raw text up to (not including) one of `stops`, trimmed.
    fn value(&mut self, stops: &[char]) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek().filter(|c| !stops.contains(c)) {
            out.push(c);
            self.pos += 1;
        }
        out.trim().to_string()
    }

    fn spec(mut self) -> Result<ExecutionSpec> {
        let mut entries = Vec::new();
        self.skip_ws();
        if self.peek().is_none() {
            return Ok(ExecutionSpec { entries });
        }
        loop {
            entries.push(self.entry()?);
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
        }
        Ok(ExecutionSpec { entries })
    }

    fn entry(&mut self) -> Result<SpecEntry> {
        self.skip_ws();
        let name = self.word();
        self.skip_ws();
        let mut entry = SpecEntry {
            name: (!name.is_empty()).then_some(name),
            params: BTreeMap::new(),
        };
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.paren_params(&mut entry)?;
            }
            Some(':') => {
                if entry.name.is_none() {
                    return Err(self.error("expected a name before ':'"));
                }
                self.pos += 1;
                self.colon_params(&mut entry)?;
            }
            _ if entry.name.is_none() => return Err(self.error("expected an execution control name")),
            _ => {}
        }
        Ok(entry)
    }

    fn paren_params(&mut self, entry: &mut SpecEntry) -> Result<()> {
        self.skip_ws();
        if self.eat(')') {
            return Ok(());
        }
        loop {
            self.skip_ws();
            let key = self.word();
            if key.is_empty() {
                return Err(self.error("expected a parameter name"));
            }
            self.skip_ws();
            if !self.eat('=') {
                return Err(self.error(format!("expected '=' after '{key}'")));
            }
            let value = self.value(&[',', ')']);
            entry.params.insert(key, value);
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => return Err(self.error("unclosed '('")),
            }
        }
    }

    fn colon_params(&mut self, entry: &mut SpecEntry) -> Result<()> {
        loop {
            self.skip_ws();
            if matches!(self.peek(), None | Some(',')) && !entry.params.is_empty() {
                return Ok(());
            }
            let key = self.word();
            if key.is_empty() {
                return Err(self.error("expected a parameter name"));
            }
            if !self.eat('(') {
                return Err(self.error(format!("expected '(' after '{key}'")));
            }
            let value = self.value(&[')']);
            if !self.eat(')') {
                return Err(self.error("unclosed '('"));
            }
            entry.params.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Vec<SpecEntry> {
        ExecutionSpec::parse(s).unwrap().entries
    }

    #[test]
    fn test_name_only() {
        let entries = parse("direct");
        assert_eq!(entries, vec![SpecEntry::named("direct")]);
    }

    #[test]
    fn test_paren_form() {
        let entries = parse("remote(launch=false, port=4000)");
        assert_eq!(entries[0].name.as_deref(), Some("remote"));
        assert_eq!(entries[0].param("launch"), Some("false"));
        assert_eq!(entries[0].param("port"), Some("4000"));
    }

    #[test]
    fn test_colon_form() {
        let entries = parse("remote:launch(true)timeout(200)");
        assert_eq!(entries[0].param("launch"), Some("true"));
        assert_eq!(entries[0].param("timeout"), Some("200"));
    }

    #[test]
    fn test_chain_and_nameless() {
        let entries = parse("remote(timeout=10), (x=1), direct");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].name, None);
        assert_eq!(entries[1].param("x"), Some("1"));
        assert_eq!(entries[2], SpecEntry::named("direct"));
    }

    #[test]
    fn test_empty_spec() {
        assert!(ExecutionSpec::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "jdi:launch(true)$",
            "remote(launch=true",
            "remote(launch)",
            ":launch(true)",
            "direct remote",
            "remote:",
            ",",
        ] {
            assert!(
                matches!(ExecutionSpec::parse(bad), Err(Error::SpecSyntax { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn test_typed_params() {
        let entry = &parse("remote(launch=yes,timeout=12)")[0];
        assert!(matches!(
            entry.param_bool("remote", "launch", true),
            Err(Error::InvalidParameter { .. })
        ));
        assert_eq!(entry.param_u64("remote", "timeout", 0).unwrap(), 12);
        assert_eq!(entry.param_u64("remote", "port", 7).unwrap(), 7);
    }

    #[test]
    fn test_display_round_trips() {
        let spec = ExecutionSpec::parse("remote:launch(false), direct").unwrap();
        assert_eq!(spec.to_string(), "remote(launch=false),direct");
        assert_eq!(ExecutionSpec::parse(&spec.to_string()).unwrap(), spec);
    }
}
