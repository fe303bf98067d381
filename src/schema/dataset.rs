//! Tabular descriptor dataset.
//!
//! Column 0 holds the system tag, column 1 the target value and every
//! following column a candidate descriptor. Cells keep their raw text, which
//! is what the evaluator matrix receives; descriptor cells also carry a
//! parsed value for correlation analysis. Empty cells are stored as `nan`
//! so every row keeps a token in the evaluator matrix.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Text stored for an empty cell.
pub const MISSING_CELL: &str = "nan";

/// A single named column.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    raw: Vec<String>,
    values: Vec<f64>,
}

impl Column {
    /// Column header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cell text in row order.
    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    /// Parsed cell values in row order. Non-numeric cells are NaN.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Immutable in-memory dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    descriptor_names: Vec<String>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl Dataset {
    /// Load a dataset from a delimited file with a header row.
    pub fn load(path: impl AsRef<Path>, delimiter: char) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, delimiter)
    }

    /// Parse a dataset from any reader.
    pub fn from_reader<R: Read>(reader: R, delimiter: char) -> Result<Self, DatasetError> {
        let mut lines = BufReader::new(reader).lines().enumerate();

        let header = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break split_record(line.trim_end_matches('\r'), delimiter);
                    }
                }
                None => {
                    return Err(DatasetError::Malformed(
                        "dataset has no header row".to_string(),
                    ));
                }
            }
        };

        if header.len() < 3 {
            return Err(DatasetError::Malformed(format!(
                "dataset must contain at least three columns (tag, target, descriptor), found {}",
                header.len()
            )));
        }

        let mut index = HashMap::with_capacity(header.len());
        for (i, name) in header.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(DatasetError::Malformed(format!(
                    "duplicate column name '{name}'"
                )));
            }
        }

        let mut columns: Vec<Column> = header
            .iter()
            .map(|name| Column {
                name: name.clone(),
                raw: Vec::new(),
                values: Vec::new(),
            })
            .collect();

        let mut rows = 0;
        for (lineno, line) in lines {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let fields = split_record(line, delimiter);
            if fields.len() != columns.len() {
                return Err(DatasetError::Malformed(format!(
                    "line {} has {} fields, expected {}",
                    lineno + 1,
                    fields.len(),
                    columns.len()
                )));
            }

            for (column, field) in columns.iter_mut().zip(fields) {
                if field.is_empty() {
                    log::debug!("Line {}: empty '{}' cell read as nan", lineno + 1, column.name);
                    column.values.push(f64::NAN);
                    column.raw.push(MISSING_CELL.to_string());
                } else {
                    column.values.push(field.parse().unwrap_or(f64::NAN));
                    column.raw.push(field);
                }
            }
            rows += 1;
        }

        let descriptor_names = header[2..].to_vec();

        Ok(Self {
            columns,
            descriptor_names,
            index,
            rows,
        })
    }

    /// Number of rows (systems).
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Tag column (column 0).
    pub fn tag(&self) -> &Column {
        &self.columns[0]
    }

    /// Target column (column 1).
    pub fn target(&self) -> &Column {
        &self.columns[1]
    }

    /// Descriptor names in file order.
    pub fn descriptor_names(&self) -> &[String] {
        &self.descriptor_names
    }

    /// Position of a column in the header.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Look up a descriptor column by name.
    pub fn descriptor(&self, name: &str) -> Option<&Column> {
        self.column_index(name)
            .filter(|&i| i >= 2)
            .map(|i| &self.columns[i])
    }

    /// Descriptor values restricted to the given rows, in the given order.
    pub fn descriptor_values_at(&self, name: &str, rows: &[usize]) -> Option<Vec<f64>> {
        let column = self.descriptor(name)?;
        rows.iter()
            .map(|&row| column.values.get(row).copied())
            .collect()
    }
}

/// Split one delimited record, honouring double quotes and `""` escapes.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(field.trim().to_string());
            field.clear();
        } else {
            field.push(c);
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// Dataset loading errors.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Cannot open dataset {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed reading dataset: {0}")]
    Read(#[from] io::Error),
    #[error("Malformed dataset: {0}")]
    Malformed(String),
}
