use super::{ParseError, strip_comment};
use crate::domain::Pattern;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Guards the grid against an extra trailing point from step accumulation.
const GRID_END_EPSILON: f64 = 1.0e-5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubHeader {
    pub start: f64,
    pub increment: f64,
    pub stop: f64,
}

impl SubHeader {
    /// `start + i * increment` for every point below `stop + increment - 1e-5`.
    pub fn grid(&self) -> Vec<f64> {
        let limit = self.stop + self.increment - GRID_END_EPSILON;
        let span = ((limit - self.start) / self.increment).ceil();
        let count = if span.is_finite() && span > 0.0 {
            span as usize
        } else {
            0
        };
        (0..count)
            .map(|index| self.start + index as f64 * self.increment)
            .collect()
    }
}

pub fn read_sub(path: impl AsRef<Path>) -> Result<(Vec<f64>, Vec<f64>), ParseError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sub(path, &content)
}

/// Returns the reconstructed x grid and the intensity body. The two are not
/// required to have equal length here; see [`load_sub_pattern`].
pub fn parse_sub(path: &Path, content: &str) -> Result<(Vec<f64>, Vec<f64>), ParseError> {
    let mut lines = content.lines();
    let header_line = lines.next().unwrap_or_default();
    let header = parse_header(path, header_line)?;

    let mut y = Vec::new();
    for (offset, line) in lines.enumerate() {
        for (column, token) in strip_comment(line).split_whitespace().enumerate() {
            let value = token.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
                path: path.to_path_buf(),
                line: offset + 2,
                column,
                token: token.to_string(),
            })?;
            y.push(value);
        }
    }

    let x = header.grid();
    debug!(
        path = %path.display(),
        start = header.start,
        increment = header.increment,
        stop = header.stop,
        x_len = x.len(),
        y_len = y.len(),
        "parsed sub file"
    );
    Ok((x, y))
}

pub fn load_sub_pattern(path: impl AsRef<Path>) -> Result<Pattern, ParseError> {
    let path = path.as_ref();
    let (x, y) = read_sub(path)?;
    let (x_len, y_len) = (x.len(), y.len());
    Pattern::new(x, y).map_err(|_| ParseError::SubLength {
        path: path.to_path_buf(),
        x_len,
        y_len,
    })
}

fn parse_header(path: &Path, line: &str) -> Result<SubHeader, ParseError> {
    let numbers = leading_unsigned_numbers(line, 3);
    let &[start, increment, stop] = numbers.as_slice() else {
        return Err(ParseError::SubHeader {
            path: path.to_path_buf(),
            found: numbers.len(),
        });
    };

    if increment.is_nan() || increment <= 0.0 {
        return Err(ParseError::SubIncrement {
            path: path.to_path_buf(),
            increment,
        });
    }

    Ok(SubHeader {
        start,
        increment,
        stop,
    })
}

/// Scans for `\d+\.\d+|\d+` matches, left to right, up to `limit` of them.
fn leading_unsigned_numbers(line: &str, limit: usize) -> Vec<f64> {
    let bytes = line.as_bytes();
    let mut numbers = Vec::with_capacity(limit);
    let mut index = 0;

    while index < bytes.len() && numbers.len() < limit {
        if !bytes[index].is_ascii_digit() {
            index += 1;
            continue;
        }

        let begin = index;
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            index += 1;
        }
        if index + 1 < bytes.len() && bytes[index] == b'.' && bytes[index + 1].is_ascii_digit() {
            index += 1;
            while index < bytes.len() && bytes[index].is_ascii_digit() {
                index += 1;
            }
        }

        if let Ok(value) = line[begin..index].parse::<f64>() {
            numbers.push(value);
        }
    }

    numbers
}
