//! Readers for the text dumps produced by FullProf and the CrysFML programs.
//!
//! Two families are supported: columnar tables (`.dat`, `.bvs`, `.xy`, and
//! `.sub` files written with one point per line) and the FullProf `.sub`/`.sim`
//! layout whose header encodes the x grid.

pub mod columnar;
pub mod sub;

pub use columnar::{ColumnarOptions, NumericTable, parse_columnar, read_columnar};
pub use sub::{SubHeader, load_sub_pattern, parse_sub, read_sub};

use crate::domain::CheckError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'{}' has no data rows after skipping {skip_begin} leading and {skip_end} trailing lines", path.display())]
    NoData {
        path: PathBuf,
        skip_begin: usize,
        skip_end: usize,
    },
    #[error("'{}' line {line}: token {column} ('{token}') is not a valid number", path.display())]
    InvalidNumber {
        path: PathBuf,
        line: usize,
        column: usize,
        token: String,
    },
    #[error("'{}' line {line}: column {column} requested but the row has {available} column(s)", path.display())]
    MissingColumn {
        path: PathBuf,
        line: usize,
        column: usize,
        available: usize,
    },
    #[error("'{}' line {line}: expected {expected} column(s), found {found}", path.display())]
    RaggedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("'{}': header must start with three numbers (start, increment, stop), found {found}", path.display())]
    SubHeader { path: PathBuf, found: usize },
    #[error("'{}': x increment must be positive, found {increment}", path.display())]
    SubIncrement { path: PathBuf, increment: f64 },
    #[error("'{}': x grid has {x_len} point(s) but the body holds {y_len} intensities", path.display())]
    SubLength {
        path: PathBuf,
        x_len: usize,
        y_len: usize,
    },
}

impl From<ParseError> for CheckError {
    fn from(error: ParseError) -> Self {
        let message = error.to_string();
        match error {
            ParseError::Read { .. } => CheckError::io_system("IO.PARSE_READ", message),
            ParseError::NoData { .. } => CheckError::input_validation("INPUT.PARSE_EMPTY", message),
            ParseError::InvalidNumber { .. } => {
                CheckError::input_validation("INPUT.PARSE_NUMBER", message)
            }
            ParseError::MissingColumn { .. } | ParseError::RaggedRow { .. } => {
                CheckError::input_validation("INPUT.PARSE_COLUMNS", message)
            }
            ParseError::SubHeader { .. } | ParseError::SubIncrement { .. } => {
                CheckError::input_validation("INPUT.SUB_HEADER", message)
            }
            ParseError::SubLength { .. } => CheckError::comparison("RUN.SUB_LENGTH", message),
        }
    }
}

/// Strips a trailing `#` comment the way numpy's text loaders do.
pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::{ParseError, strip_comment};
    use crate::domain::{CheckError, CheckErrorCategory};
    use std::path::PathBuf;

    #[test]
    fn comments_are_removed_from_the_first_hash() {
        assert_eq!(strip_comment("1.0 2.0 # trailing"), "1.0 2.0 ");
        assert_eq!(strip_comment("# header"), "");
        assert_eq!(strip_comment("3.0"), "3.0");
    }

    #[test]
    fn parse_errors_map_onto_check_categories() {
        let path = PathBuf::from("LiFePO4n_sum.bvs");
        let number: CheckError = ParseError::InvalidNumber {
            path: path.clone(),
            line: 4,
            column: 2,
            token: "Fe1".to_string(),
        }
        .into();
        assert_eq!(number.category(), CheckErrorCategory::InputValidationError);
        assert_eq!(number.code(), "INPUT.PARSE_NUMBER");
        assert!(number.message().contains("line 4: token 2 ('Fe1')"));

        let length: CheckError = ParseError::SubLength {
            path,
            x_len: 3,
            y_len: 2,
        }
        .into();
        assert_eq!(length.category(), CheckErrorCategory::ComparisonError);
    }
}
