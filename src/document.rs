//! In-memory hosts file.
//!
//! The text is split on `\n` and each piece is classified as either a block
//! entry or an opaque line. A `\r` in front of a line break is kept as a
//! per-line flag, so files with CRLF, LF or a mix of both parse to the same
//! entries and serialize back byte for byte. A file that ends with a line
//! break parses to a final empty line, so `parse(serialize(d)) == d` holds for
//! every document and the final-newline convention of the input survives
//! edits. Opaque lines are never rewritten. The only edit applied to them is
//! the collapse of blank-line runs, and only by
//! [`HostsDocument::with_entries_added`].

use crate::entry;
use crate::AppError;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Entry(String),
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    kind: Kind,
    /// The break after this line is `\r\n`. Always false on the last line.
    crlf: bool,
}

impl Line {
    fn classify(text: &str, crlf: bool) -> Self {
        let kind = match entry::try_parse(text) {
            Some(name) => Kind::Entry(name.to_string()),
            None => Kind::Opaque(text.to_string()),
        };
        Self { kind, crlf }
    }

    fn entry(name: &str, crlf: bool) -> Self {
        Self {
            kind: Kind::Entry(name.to_string()),
            crlf,
        }
    }

    fn blocked_name(&self) -> Option<&str> {
        match &self.kind {
            Kind::Entry(name) => Some(name),
            Kind::Opaque(_) => None,
        }
    }

    fn is_blank(&self) -> bool {
        matches!(&self.kind, Kind::Opaque(text) if text.trim().is_empty())
    }

    fn is_empty(&self) -> bool {
        matches!(&self.kind, Kind::Opaque(text) if text.is_empty())
    }

    fn write_to(&self, out: &mut String) {
        match &self.kind {
            Kind::Entry(name) => out.push_str(&entry::render(name)),
            Kind::Opaque(text) => out.push_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsDocument {
    lines: Vec<Line>,
}

impl HostsDocument {
    pub fn parse(raw: &str) -> Self {
        let pieces: Vec<&str> = raw.split('\n').collect();
        let last = pieces.len() - 1;

        let lines: Vec<Line> = pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| match piece.strip_suffix('\r') {
                Some(text) if i < last => Line::classify(text, true),
                _ => Line::classify(piece, false),
            })
            .collect();

        Self { lines }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            line.write_to(&mut out);
            if i < last {
                out.push_str(if line.crlf { "\r\n" } else { "\n" });
            }
        }
        out
    }

    /// Every blocked name in file order. Duplicates are reported as found.
    pub fn list_blocked_targets(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|line| line.blocked_name().map(str::to_string))
            .collect()
    }

    /// Add one entry for each name that is not already blocked.
    ///
    /// Blank-line runs are collapsed first. New entries go after the last
    /// content line, ahead of the final line break if the file has one.
    pub fn with_entries_added<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, AppError> {
        for name in names {
            entry::validate(name.as_ref())?;
        }

        let mut doc = self.normalized();
        let crlf = doc.uses_crlf();
        let mut present: HashSet<String> = doc.list_blocked_targets().into_iter().collect();

        let mut fresh = Vec::new();
        for name in names {
            let name = name.as_ref();
            if present.insert(name.to_string()) {
                fresh.push(Line::entry(name, crlf));
            }
        }
        if fresh.is_empty() {
            return Ok(doc);
        }

        let at = doc.body_len();
        if at == doc.lines.len() {
            // No final line break: the old last line now needs one.
            if let Some(prev) = doc.lines.last_mut() {
                prev.crlf = crlf;
            }
        }
        doc.lines.splice(at..at, fresh);
        doc.settle();
        Ok(doc)
    }

    /// Drop every entry whose name is in `names`. Unknown names are ignored.
    pub fn with_entries_removed<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let doomed: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        let lines = self
            .lines
            .iter()
            .filter(|line| !line.blocked_name().is_some_and(|name| doomed.contains(name)))
            .cloned()
            .collect();
        let mut doc = Self { lines };
        doc.settle();
        doc
    }

    /// Collapse every run of two or more blank lines to its first line.
    /// The empty piece after a final line break is not a blank line.
    pub fn normalized(&self) -> Self {
        let body = self.body_len();
        let mut lines = Vec::with_capacity(self.lines.len());
        let mut prev_blank = false;

        for line in &self.lines[..body] {
            let blank = line.is_blank();
            if !(blank && prev_blank) {
                lines.push(line.clone());
            }
            prev_blank = blank;
        }
        lines.extend_from_slice(&self.lines[body..]);

        Self { lines }
    }

    /// Number of lines before the empty piece left by a final line break.
    fn body_len(&self) -> usize {
        match self.lines.last() {
            Some(line) if line.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        }
    }

    /// Lines this document adds end in CRLF when its first line does.
    fn uses_crlf(&self) -> bool {
        self.lines.first().is_some_and(|line| line.crlf)
    }

    /// The last line never carries a line break of its own.
    fn settle(&mut self) {
        if let Some(last) = self.lines.last_mut() {
            last.crlf = false;
        }
    }
}
