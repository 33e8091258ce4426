//! Number list files.
//!
//! A list file holds one caller id per line, optionally followed by a `#`
//! comment. Blank lines and lines starting with `#` are ignored. Paths may
//! name a single file or a directory, which is walked recursively in file
//! name order.

use crate::error::LoadError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use walkdir::WalkDir;

/// Where one number came from inside its source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberEntry {
    pub line: usize,
    pub comment: String,
}

/// Every number contributed by one source file.
#[derive(Debug, Clone, Default)]
pub struct NumberTable {
    pub source: String,
    pub entries: HashMap<String, NumberEntry>,
}

impl NumberTable {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A matched list entry together with the file and line that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListMatch {
    pub source: String,
    pub line: usize,
    pub comment: String,
}

/// Tables in discovery order. Lookups return the first table that holds the
/// number; the same number in two files is not merged.
#[derive(Debug, Clone, Default)]
pub struct NumberListSet {
    tables: Vec<NumberTable>,
}

impl NumberListSet {
    pub fn new(tables: Vec<NumberTable>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[NumberTable] {
        &self.tables
    }

    pub fn find(&self, number: &str) -> Option<ListMatch> {
        self.tables.iter().find_map(|table| {
            table.entries.get(number).map(|entry| ListMatch {
                source: table.source.clone(),
                line: entry.line,
                comment: entry.comment.clone(),
            })
        })
    }

    pub fn entry_count(&self) -> usize {
        self.tables.iter().map(NumberTable::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(NumberTable::is_empty)
    }
}

/// Non-fatal problems found while parsing a list file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// The number does not start with `+`. It is still admitted.
    MissingPlus {
        source: String,
        line: usize,
        number: String,
    },
    /// The number was already seen earlier in the same file. The earlier
    /// entry is kept.
    Duplicate {
        source: String,
        line: usize,
        first_line: usize,
        number: String,
    },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::MissingPlus {
                source,
                line,
                number,
            } => write!(
                f,
                "Number in file {source} line {line} does not start with +: {number}"
            ),
            ParseWarning::Duplicate {
                source,
                line,
                first_line,
                number,
            } => write!(
                f,
                "Ignoring duplicate number {number} on line {line} (first seen on line {first_line}) in file {source}"
            ),
        }
    }
}

/// Result of loading one list: the tables plus any warnings produced on the
/// way.
#[derive(Debug, Default)]
pub struct LoadedList {
    pub set: NumberListSet,
    pub warnings: Vec<ParseWarning>,
}

/// Load every configured path into a fresh list set. Any path or file that
/// cannot be read fails the whole load.
pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedList, LoadError> {
    let mut tables = Vec::new();
    let mut warnings = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|source| LoadError::Access {
            path: path.to_path_buf(),
            source,
        })?;

        if metadata.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(|source| LoadError::Walk {
                    path: path.to_path_buf(),
                    source,
                })?;
                if entry.file_type().is_dir() {
                    continue;
                }
                tables.push(parse_file(entry.path(), &mut warnings)?);
            }
        } else {
            tables.push(parse_file(path, &mut warnings)?);
        }
    }

    Ok(LoadedList {
        set: NumberListSet::new(tables),
        warnings,
    })
}

/// Parse a single list file.
pub fn parse_file(path: &Path, warnings: &mut Vec<ParseWarning>) -> Result<NumberTable, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let source_name = path.display().to_string();
    let mut table = NumberTable::new(source_name.clone());

    for (index, raw_line) in BufReader::new(file).split(b'\n').enumerate() {
        let raw_line = raw_line.map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let line_no = index + 1;
        let line = String::from_utf8_lossy(&raw_line);
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (number, comment) = split_comment(line);
        let number = number.trim();
        if number.is_empty() {
            continue;
        }
        let comment = comment.map(str::trim).unwrap_or_default();

        if !number.starts_with('+') {
            let warning = ParseWarning::MissingPlus {
                source: source_name.clone(),
                line: line_no,
                number: number.to_string(),
            };
            log::warn!("{warning}");
            warnings.push(warning);
        }

        if let Some(existing) = table.entries.get(number) {
            let warning = ParseWarning::Duplicate {
                source: source_name.clone(),
                line: line_no,
                first_line: existing.line,
                number: number.to_string(),
            };
            log::warn!("{warning}");
            warnings.push(warning);
            continue;
        }

        table.entries.insert(
            number.to_string(),
            NumberEntry {
                line: line_no,
                comment: comment.to_string(),
            },
        );
    }

    log::debug!("Parsed {} numbers from {}", table.len(), table.source);
    Ok(table)
}

/// Split a line at the first `#` that is not escaped as `\#`. Escaped hashes
/// become literal `#` in the number part.
fn split_comment(line: &str) -> (String, Option<&str>) {
    let mut number = String::with_capacity(line.len());
    let mut chars = line.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some((_, '#'))) => {
                number.push('#');
                chars.next();
            }
            '#' => return (number, Some(&line[idx + 1..])),
            _ => number.push(c),
        }
    }

    (number, None)
}
