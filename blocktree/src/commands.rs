//! Index file commands.
//!
//! Each subcommand of the `blocktree` binary maps to one `Command` variant.
//! Output goes to the writer passed to `run`, so the binary can hand in
//! stdout and tests can capture it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use clap::Subcommand;

use crate::config::IndexConfig;
use crate::storage::btree::{BTree, BTreeError};

/// A single operation on an index file.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create a new, empty index file.
    Create {
        /// Path of the index file to create. Must not exist.
        index: PathBuf,
    },
    /// Insert a key/value pair.
    Insert {
        /// Existing index file.
        index: PathBuf,
        key: u64,
        value: u64,
    },
    /// Look up the value stored under a key.
    Search {
        /// Existing index file.
        index: PathBuf,
        key: u64,
    },
    /// Insert every `key,value` line of a CSV file.
    Load {
        /// Existing index file.
        index: PathBuf,
        /// CSV file with one `key,value` pair per line.
        csv: PathBuf,
    },
    /// Print all pairs in ascending key order.
    Print {
        /// Existing index file.
        index: PathBuf,
    },
    /// Write all pairs in ascending key order to a CSV file.
    Extract {
        /// Existing index file.
        index: PathBuf,
        /// CSV file to write. Must not exist.
        output: PathBuf,
    },
}

/// Run a command, writing its report to `out`.
pub fn run(
    command: &Command,
    config: &IndexConfig,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    match command {
        Command::Create { index } => {
            BTree::create(index, config)?;
            writeln!(out, "created empty index file '{}'", index.display())?;
        }
        Command::Insert { index, key, value } => {
            let mut tree = BTree::load(index, config)?;
            match tree.insert(*key, *value)? {
                None => writeln!(out, "inserted {key}")?,
                Some(old) => writeln!(out, "updated {key} (was {old})")?,
            }
        }
        Command::Search { index, key } => {
            let mut tree = BTree::load(index, config)?;
            match tree.search(*key) {
                Ok(Some(value)) => writeln!(out, "{key},{value}")?,
                Ok(None) => writeln!(out, "key {key} not found")?,
                Err(BTreeError::EmptyTree) => {
                    writeln!(out, "key {key} not found (index is empty)")?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Load { index, csv } => {
            let mut tree = BTree::load(index, config)?;
            let loaded = load_csv(&mut tree, csv)?;
            writeln!(out, "loaded {loaded} entries")?;
        }
        Command::Print { index } => {
            let mut tree = BTree::load(index, config)?;
            write_entries(&mut tree, out)?;
        }
        Command::Extract { index, output } => {
            let mut tree = BTree::load(index, config)?;
            let count = extract(&mut tree, output)?;
            tracing::info!("extracted {count} entries to {}", output.display());
        }
    }
    Ok(())
}

/// Insert each pair of a CSV file in file order.
///
/// Pairs before a malformed line stay inserted.
fn load_csv(tree: &mut BTree, csv: &Path) -> Result<usize, CommandError> {
    let reader = BufReader::new(File::open(csv)?);
    let mut loaded = 0;

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line?;
        let Some((key, value)) = parse_line(&line, line_number)? else {
            tracing::warn!("skipping line {line_number} of {}", csv.display());
            continue;
        };
        tree.insert(key, value)?;
        loaded += 1;
    }

    Ok(loaded)
}

/// Parse one `key,value` line. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str, line_number: usize) -> Result<Option<(u64, u64)>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parse_error = |message: String| CommandError::Parse {
        line: line_number,
        message,
    };

    let (key, value) = line
        .split_once(',')
        .ok_or_else(|| parse_error(format!("expected 'key,value', got '{line}'")))?;
    let key = key
        .trim()
        .parse::<u64>()
        .map_err(|e| parse_error(format!("invalid key '{}': {e}", key.trim())))?;
    let value = value
        .trim()
        .parse::<u64>()
        .map_err(|e| parse_error(format!("invalid value '{}': {e}", value.trim())))?;

    Ok(Some((key, value)))
}

/// Write every entry as a `key,value` line. Returns the number written.
fn write_entries(tree: &mut BTree, out: &mut impl Write) -> Result<usize, CommandError> {
    let mut count = 0;
    for entry in tree.traverse() {
        let (key, value) = entry?;
        writeln!(out, "{key},{value}")?;
        count += 1;
    }
    Ok(count)
}

/// Write every entry to a new CSV file.
///
/// On failure the partly written file is removed.
fn extract(tree: &mut BTree, output: &Path) -> Result<usize, CommandError> {
    let mut writer = BufWriter::new(create_output(output)?);
    let written = write_entries(tree, &mut writer).and_then(|count| {
        writer.flush()?;
        Ok(count)
    });
    drop(writer);

    written.inspect_err(|_| {
        if let Err(e) = std::fs::remove_file(output) {
            tracing::warn!("could not remove partial output {}: {e}", output.display());
        }
    })
}

fn create_output(path: &Path) -> Result<File, CommandError> {
    if path.exists() {
        return Err(CommandError::OutputExists(path.to_path_buf()));
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => CommandError::OutputExists(path.to_path_buf()),
            _ => CommandError::Io(e),
        })
}

/// Errors that can occur while running a command.
#[derive(Debug)]
pub enum CommandError {
    /// Index file or tree error.
    Tree(BTreeError),
    /// I/O error on an input or output file.
    Io(std::io::Error),
    /// The output file for `extract` already exists.
    OutputExists(PathBuf),
    /// Malformed line in a CSV input file.
    Parse { line: usize, message: String },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OutputExists(path) => {
                write!(f, "output file '{}' already exists", path.display())
            }
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::OutputExists(_) | Self::Parse { .. } => None,
        }
    }
}

impl From<BTreeError> for CommandError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
