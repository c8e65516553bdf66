use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Address of a node inside a document tree.
///
/// Textual form: `endings.end_02`, `data[3].stat.f.day`, `["key.with.dots"][0]`.
/// The empty string addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn parse(text: &str) -> Result<Self, CoreError> {
        Parser::new(text).parse().map_err(|reason| CoreError::InvalidPath {
            path: text.to_string(),
            reason,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.push_key(key);
        child
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut child = self.clone();
        child.push_index(index);
        child
    }

    pub fn push_key(&mut self, key: impl Into<String>) {
        self.segments.push(Segment::Key(key.into()));
    }

    pub fn push_index(&mut self, index: usize) {
        self.segments.push(Segment::Index(index));
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// Splits into the parent segments and the final segment.
    pub fn split_last(&self) -> Option<(&[Segment], &Segment)> {
        self.segments
            .split_last()
            .map(|(last, parents)| (parents, last))
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Vec<Segment>> for FieldPath {
    fn from(segments: Vec<Segment>) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) if is_plain_key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                Segment::Key(key) => {
                    f.write_str("[\"")?;
                    for ch in key.chars() {
                        if ch == '"' || ch == '\\' {
                            f.write_str("\\")?;
                        }
                        write!(f, "{ch}")?;
                    }
                    f.write_str("\"]")?;
                }
            }
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| matches!(c, '.' | '[' | ']' | '"' | '\\') || c.is_whitespace())
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    segments: Vec<Segment>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            segments: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<FieldPath, String> {
        if self.chars.peek().is_none() {
            return Ok(FieldPath::root());
        }

        // A path may open with a bracket; otherwise it opens with a bare key.
        let mut expect_key = !matches!(self.chars.peek(), Some((_, '[')));
        loop {
            if expect_key {
                self.bare_key()?;
            }
            match self.chars.next() {
                None => return Ok(FieldPath::new(self.segments)),
                Some((_, '.')) => {
                    if self.chars.peek().is_none() {
                        return Err("path ends with '.'".to_string());
                    }
                    expect_key = true;
                }
                Some((_, '[')) => {
                    self.bracket()?;
                    expect_key = false;
                }
                Some((pos, ch)) => return Err(format!("unexpected {ch:?} at offset {pos}")),
            }
        }
    }

    fn bare_key(&mut self) -> Result<(), String> {
        let mut key = String::new();
        while let Some(&(pos, ch)) = self.chars.peek() {
            match ch {
                '.' | '[' => break,
                ']' | '"' | '\\' => return Err(format!("unexpected {ch:?} at offset {pos}")),
                _ => {
                    key.push(ch);
                    self.chars.next();
                }
            }
        }
        if key.is_empty() {
            return Err("empty key segment".to_string());
        }
        self.segments.push(Segment::Key(key));
        Ok(())
    }

    fn bracket(&mut self) -> Result<(), String> {
        match self.chars.peek() {
            Some((_, '"')) => {
                self.chars.next();
                let key = self.quoted()?;
                self.segments.push(Segment::Key(key));
            }
            _ => {
                let mut digits = String::new();
                while let Some(&(_, ch)) = self.chars.peek() {
                    if ch == ']' {
                        break;
                    }
                    digits.push(ch);
                    self.chars.next();
                }
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| format!("invalid index {digits:?}"))?;
                self.segments.push(Segment::Index(index));
            }
        }
        match self.chars.next() {
            Some((_, ']')) => Ok(()),
            _ => Err("unterminated '['".to_string()),
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        let mut key = String::new();
        loop {
            match self.chars.next() {
                None => return Err("unterminated quoted key".to_string()),
                Some((_, '"')) => return Ok(key),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, ch)) => key.push(ch),
                    None => return Err("unterminated quoted key".to_string()),
                },
                Some((_, ch)) => key.push(ch),
            }
        }
    }
}
