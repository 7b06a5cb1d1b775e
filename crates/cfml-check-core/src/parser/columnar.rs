use super::{ParseError, strip_comment};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnarOptions {
    pub skip_begin: usize,
    pub skip_end: usize,
    /// Zero-based column indices; every column when unset.
    pub columns: Option<Vec<usize>>,
    /// Return the table transposed, one row per selected column.
    pub unpack: bool,
}

impl ColumnarOptions {
    pub fn skipping(skip_begin: usize, skip_end: usize) -> Self {
        Self {
            skip_begin,
            skip_end,
            ..Self::default()
        }
    }

    pub fn with_columns(mut self, columns: impl Into<Vec<usize>>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn unpacked(mut self) -> Self {
        self.unpack = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumericTable {
    rows: Vec<Vec<f64>>,
}

impl NumericTable {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| row.get(index).copied())
            .collect()
    }

    pub fn transposed(&self) -> Self {
        let columns = (0..self.column_count())
            .filter_map(|index| self.column(index))
            .collect();
        Self { rows: columns }
    }

    pub fn flatten(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }
}

pub fn read_columnar(
    path: impl AsRef<Path>,
    options: &ColumnarOptions,
) -> Result<NumericTable, ParseError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let table = parse_columnar(path, &content, options)?;
    debug!(
        path = %path.display(),
        rows = table.row_count(),
        columns = table.column_count(),
        "parsed columnar file"
    );
    Ok(table)
}

/// Parses `content` (read from `path`, used for diagnostics only).
pub fn parse_columnar(
    path: &Path,
    content: &str,
    options: &ColumnarOptions,
) -> Result<NumericTable, ParseError> {
    let lines: Vec<&str> = content.lines().collect();
    let begin = options.skip_begin.min(lines.len());
    let end = lines.len().saturating_sub(options.skip_end).max(begin);

    let mut rows = Vec::new();
    let mut expected_width: Option<usize> = None;
    for (offset, raw_line) in lines[begin..end].iter().enumerate() {
        let line_number = begin + offset + 1;
        let cleaned = strip_comment(raw_line).replace(['(', ')'], " ");
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let row = match &options.columns {
            Some(columns) => select_columns(path, line_number, &tokens, columns)?,
            None => {
                let width = *expected_width.get_or_insert(tokens.len());
                if tokens.len() != width {
                    return Err(ParseError::RaggedRow {
                        path: path.to_path_buf(),
                        line: line_number,
                        expected: width,
                        found: tokens.len(),
                    });
                }
                tokens
                    .iter()
                    .enumerate()
                    .map(|(column, token)| parse_token(path, line_number, column, token))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ParseError::NoData {
            path: path.to_path_buf(),
            skip_begin: options.skip_begin,
            skip_end: options.skip_end,
        });
    }

    let table = NumericTable { rows };
    Ok(if options.unpack {
        table.transposed()
    } else {
        table
    })
}

fn select_columns(
    path: &Path,
    line_number: usize,
    tokens: &[&str],
    columns: &[usize],
) -> Result<Vec<f64>, ParseError> {
    columns
        .iter()
        .map(|&column| {
            let token = tokens.get(column).ok_or_else(|| ParseError::MissingColumn {
                path: path.to_path_buf(),
                line: line_number,
                column,
                available: tokens.len(),
            })?;
            parse_token(path, line_number, column, token)
        })
        .collect()
}

fn parse_token(path: &Path, line_number: usize, column: usize, token: &str) -> Result<f64, ParseError> {
    token.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
        path: path.to_path_buf(),
        line: line_number,
        column,
        token: token.to_string(),
    })
}
