//! Ordered identifier input.
//!
//! Identifiers are read line by line; blank lines are skipped and do not count
//! towards offsets or totals.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Boxed stream of identifiers. An `Err` item means the input became
/// unreadable mid-stream.
pub type IdentifierStream = Box<dyn Iterator<Item = io::Result<String>> + Send>;

/// Restartable, ordered identifier input.
pub trait IdentifierSource: Send + Sync {
    /// Number of identifiers in one full pass.
    fn total(&self) -> io::Result<usize>;

    /// Stream every identifier after the first `offset`.
    fn stream_from(&self, offset: usize) -> io::Result<IdentifierStream>;
}

/// Newline-delimited identifier file.
#[derive(Debug, Clone)]
pub struct FileIdentifierSource {
    path: PathBuf,
}

impl FileIdentifierSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blank lines, trimmed. Bytes that are not UTF-8 are replaced
    /// rather than failing the read, so such a line still occupies its slot
    /// and is later rejected as malformed.
    fn lines(&self) -> io::Result<IdentifierStream> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(Box::new(reader.split(b'\n').filter_map(|line| match line {
            Ok(bytes) => {
                let line = String::from_utf8_lossy(&bytes);
                let trimmed = line.trim();
                (!trimmed.is_empty()).then(|| Ok(trimmed.to_string()))
            }
            Err(err) => Some(Err(err)),
        })))
    }
}

impl IdentifierSource for FileIdentifierSource {
    fn total(&self) -> io::Result<usize> {
        let mut count = 0;
        for line in self.lines()? {
            line?;
            count += 1;
        }
        Ok(count)
    }

    fn stream_from(&self, offset: usize) -> io::Result<IdentifierStream> {
        Ok(Box::new(self.lines()?.skip(offset)))
    }
}

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._]+$").expect("invalid identifier regex"));

/// Whether `identifier` only uses characters the remote service accepts.
pub fn is_well_formed(identifier: &str) -> bool {
    IDENTIFIER_RE.is_match(identifier)
}

/// Pull up to `size` identifiers off the stream. An empty chunk means the
/// stream is exhausted.
pub fn next_chunk(stream: &mut IdentifierStream, size: usize) -> io::Result<Vec<String>> {
    let mut chunk = Vec::with_capacity(size);
    while chunk.len() < size {
        match stream.next() {
            Some(identifier) => chunk.push(identifier?),
            None => break,
        }
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn source_with(contents: &str) -> (tempfile::TempDir, FileIdentifierSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identifiers.txt");
        fs::write(&path, contents).unwrap();
        (dir, FileIdentifierSource::new(path))
    }

    #[test]
    fn totals_ignore_blank_lines() {
        let (_dir, source) = source_with("alpha\n\n  beta \n\t\ngamma");
        assert_eq!(source.total().unwrap(), 3);
    }

    #[test]
    fn stream_skips_prefix() {
        let (_dir, source) = source_with("alpha\nbeta\n\ngamma\ndelta\n");
        let rest: Vec<String> = source
            .stream_from(2)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(rest, vec!["gamma", "delta"]);
    }

    #[test]
    fn chunks_until_exhausted() {
        let (_dir, source) = source_with("a\nb\nc\nd\ne\n");
        let mut stream = source.stream_from(0).unwrap();
        assert_eq!(next_chunk(&mut stream, 2).unwrap(), vec!["a", "b"]);
        assert_eq!(next_chunk(&mut stream, 2).unwrap(), vec!["c", "d"]);
        assert_eq!(next_chunk(&mut stream, 2).unwrap(), vec!["e"]);
        assert!(next_chunk(&mut stream, 2).unwrap().is_empty());
    }

    #[test]
    fn undecodable_line_keeps_its_slot_and_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identifiers.txt");
        fs::write(&path, b"alpha\n\xff\xfe\nbeta\n").unwrap();
        let source = FileIdentifierSource::new(path);

        assert_eq!(source.total().unwrap(), 3);
        let all: Vec<String> = source
            .stream_from(0)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], "alpha");
        assert!(!is_well_formed(&all[1]));
        assert_eq!(all[2], "beta");
    }

    #[test]
    fn missing_file_is_an_error() {
        let source = FileIdentifierSource::new("/definitely/not/here.txt");
        assert!(source.total().is_err());
        assert!(source.stream_from(0).is_err());
    }

    #[test]
    fn sanitization_rules() {
        assert!(is_well_formed("john.doe_99"));
        assert!(!is_well_formed("bad user"));
        assert!(!is_well_formed("semi;colon"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("ünïcode"));
    }
}
