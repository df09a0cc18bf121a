//! Scope data as a space-delimited table.
//!
//! Format:
//! ```text
//! time v_HS v_LS
//! 0.1 48 0
//! 0.1001 0 48
//! ```
//!
//! Signal names containing whitespace or quotes are written in double
//! quotes, with embedded quotes doubled.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{RemoteError, RemoteResult};

/// Time column plus one column per recorded signal, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeTable {
    pub time: Vec<f64>,
    pub columns: IndexMap<String, Vec<f64>>,
}

impl ScopeTable {
    /// Build a table, checking every column against the time array.
    pub fn new(time: Vec<f64>, columns: IndexMap<String, Vec<f64>>) -> RemoteResult<Self> {
        for (signal, values) in &columns {
            if values.len() != time.len() {
                return Err(RemoteError::RaggedScope {
                    signal: signal.clone(),
                    len: values.len(),
                    expected: time.len(),
                });
            }
        }
        Ok(Self { time, columns })
    }

    pub fn rows(&self) -> usize {
        self.time.len()
    }

    pub fn signals(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> RemoteResult<()> {
        write!(writer, "time")?;
        for signal in self.columns.keys() {
            write!(writer, " {}", header_field(signal))?;
        }
        writeln!(writer)?;

        for (row, t) in self.time.iter().enumerate() {
            write!(writer, "{t}")?;
            for values in self.columns.values() {
                write!(writer, " {}", values[row])?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Write to `<file_name>.csv` and return the path written.
    pub fn save(&self, file_name: impl AsRef<Path>) -> RemoteResult<PathBuf> {
        let path = csv_path(file_name.as_ref());
        let mut writer = BufWriter::new(File::create(&path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(path)
    }
}

fn header_field(name: &str) -> Cow<'_, str> {
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '"') {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(name)
    }
}

fn csv_path(file_name: &Path) -> PathBuf {
    let mut name = file_name.as_os_str().to_os_string();
    name.push(".csv");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn columns(pairs: &[(&str, Vec<f64>)]) -> IndexMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(name, values)| (name.to_string(), values.clone()))
            .collect()
    }

    #[test]
    fn writes_header_and_rows() {
        let table = ScopeTable::new(
            vec![0.0, 0.5],
            columns(&[("v_HS", vec![48.0, 0.0]), ("i_L", vec![2.5, 2.25])]),
        )
        .unwrap();
        let mut out = Vec::new();
        table.write_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "time v_HS i_L\n0 48 2.5\n0.5 0 2.25\n"
        );
    }

    #[test]
    fn awkward_signal_names_are_quoted() {
        let table = ScopeTable::new(
            vec![0.0],
            columns(&[("v out", vec![1.0]), ("i\"L\"", vec![2.0]), ("v_HS", vec![3.0])]),
        )
        .unwrap();
        assert_eq!(table.signals().collect::<Vec<_>>(), vec!["v out", "i\"L\"", "v_HS"]);

        let mut out = Vec::new();
        table.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("time \"v out\" \"i\"\"L\"\"\" v_HS")
        );
    }

    #[test]
    fn ragged_column_is_rejected() {
        let err = ScopeTable::new(vec![0.0, 1.0], columns(&[("v_HS", vec![1.0])])).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::RaggedScope { len: 1, expected: 2, .. }
        ));
    }

    #[test]
    fn save_appends_csv_extension() {
        let tmp = TempDir::new().unwrap();
        let table = ScopeTable::new(vec![0.0], columns(&[("v_out", vec![24.0])])).unwrap();
        let path = table.save(tmp.path().join("buck")).unwrap();
        assert_eq!(path, tmp.path().join("buck.csv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("time v_out\n"));
    }
}
