use crate::domain::CheckError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Tolerance {
    /// `|actual - desired| < 1.5 * 10^-decimal`
    Decimal { decimal: u32 },
    /// `|actual - desired| <= atol + rtol * |desired|`
    Allclose {
        rtol: f64,
        #[serde(default)]
        atol: f64,
    },
}

impl Tolerance {
    pub fn decimal(decimal: u32) -> Self {
        Self::Decimal { decimal }
    }

    pub fn relative(rtol: f64) -> Self {
        Self::Allclose { rtol, atol: 0.0 }
    }

    pub fn threshold(self, desired: f64) -> f64 {
        match self {
            Self::Decimal { decimal } => 1.5 * 10.0_f64.powi(-(decimal as i32)),
            Self::Allclose { rtol, atol } => atol + rtol * desired.abs(),
        }
    }

    pub fn passes(self, actual: f64, desired: f64) -> bool {
        self.passes_scaled(actual, desired, desired)
    }

    /// Same acceptance rule with the relative term scaled by `scale` instead
    /// of `desired`.
    pub fn passes_scaled(self, actual: f64, desired: f64, scale: f64) -> bool {
        if !actual.is_finite() || !desired.is_finite() {
            return non_finite_values_match(actual, desired);
        }

        let abs_diff = (actual - desired).abs();
        match self {
            Self::Decimal { .. } => abs_diff < self.threshold(scale),
            Self::Allclose { .. } => abs_diff <= self.threshold(scale),
        }
    }

    pub fn describe(self) -> String {
        match self {
            Self::Decimal { decimal } => format!("decimal={decimal}"),
            Self::Allclose { rtol, atol } => format!("rtol={rtol}, atol={atol}"),
        }
    }
}

/// Which side of a comparison the relative tolerance is proportional to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeTo {
    #[default]
    Desired,
    Actual,
}

impl RelativeTo {
    fn scale(self, actual: f64, desired: f64) -> f64 {
        match self {
            Self::Desired => desired,
            Self::Actual => actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayComparison {
    pub actual_len: usize,
    pub desired_len: usize,
    pub compared_values: usize,
    pub failing_values: usize,
    pub max_abs_diff: f64,
    pub first_failure: Option<String>,
    pub tolerance: Tolerance,
}

impl ArrayComparison {
    pub fn passed(&self) -> bool {
        self.actual_len == self.desired_len && self.failing_values == 0
    }

    pub fn shape_mismatch(&self) -> bool {
        self.actual_len != self.desired_len
    }

    pub fn reason(&self) -> Option<String> {
        if self.passed() {
            return None;
        }

        if self.shape_mismatch() {
            return Some(format!(
                "shape mismatch (actual={}, desired={})",
                self.actual_len, self.desired_len
            ));
        }

        Some(format!(
            "{}/{} value(s) outside {}; {}",
            self.failing_values,
            self.compared_values,
            self.tolerance.describe(),
            self.first_failure
                .as_deref()
                .unwrap_or("no failure details available")
        ))
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("chi-squared inputs differ in length (calc={calc}, meas={meas})")]
    LengthMismatch { calc: usize, meas: usize },
}

impl From<NumericError> for CheckError {
    fn from(error: NumericError) -> Self {
        CheckError::comparison("RUN.CHI2_SHAPE", error.to_string())
    }
}

/// Sum of squared differences over the retained prefix. Not normalized by
/// variance or degrees of freedom.
pub fn chi_squared(calc: &[f64], meas: &[f64], skip_last: usize) -> Result<f64, NumericError> {
    if calc.len() != meas.len() {
        return Err(NumericError::LengthMismatch {
            calc: calc.len(),
            meas: meas.len(),
        });
    }

    let keep = retained_len(calc.len(), skip_last);
    let mut sum = 0.0;
    let mut correction = 0.0;
    for (calc_value, meas_value) in calc[..keep].iter().zip(&meas[..keep]) {
        let diff = meas_value - calc_value;
        kahan_add(&mut sum, &mut correction, diff * diff);
    }
    Ok(sum)
}

pub fn retained_len(len: usize, skip_last: usize) -> usize {
    len.saturating_sub(skip_last)
}

/// Elementwise comparison with numpy's `assert_almost_equal` / `assert_allclose`
/// acceptance rules. A length mismatch is reported, never compared.
pub fn compare_arrays(actual: &[f64], desired: &[f64], tolerance: Tolerance) -> ArrayComparison {
    compare_arrays_relative_to(actual, desired, tolerance, RelativeTo::Desired)
}

pub fn compare_arrays_relative_to(
    actual: &[f64],
    desired: &[f64],
    tolerance: Tolerance,
    relative_to: RelativeTo,
) -> ArrayComparison {
    let mut comparison = ArrayComparison {
        actual_len: actual.len(),
        desired_len: desired.len(),
        compared_values: 0,
        failing_values: 0,
        max_abs_diff: 0.0,
        first_failure: None,
        tolerance,
    };

    if actual.len() != desired.len() {
        return comparison;
    }

    for (index, (actual_value, desired_value)) in actual.iter().zip(desired).enumerate() {
        comparison.compared_values += 1;
        if actual_value.is_finite() && desired_value.is_finite() {
            comparison.max_abs_diff = comparison
                .max_abs_diff
                .max((actual_value - desired_value).abs());
        }

        let scale = relative_to.scale(*actual_value, *desired_value);
        if !tolerance.passes_scaled(*actual_value, *desired_value, scale) {
            comparison.failing_values += 1;
            if comparison.first_failure.is_none() {
                comparison.first_failure = Some(format!(
                    "index {} actual={} desired={} abs_diff={}",
                    index,
                    format_numeric(*actual_value),
                    format_numeric(*desired_value),
                    format_numeric((actual_value - desired_value).abs())
                ));
            }
        }
    }

    comparison
}

pub fn compare_tables(
    actual: &[Vec<f64>],
    desired: &[Vec<f64>],
    tolerance: Tolerance,
) -> ArrayComparison {
    compare_tables_relative_to(actual, desired, tolerance, RelativeTo::Desired)
}

pub fn compare_tables_relative_to(
    actual: &[Vec<f64>],
    desired: &[Vec<f64>],
    tolerance: Tolerance,
    relative_to: RelativeTo,
) -> ArrayComparison {
    let row_shapes_match = actual.len() == desired.len()
        && actual
            .iter()
            .zip(desired)
            .all(|(actual_row, desired_row)| actual_row.len() == desired_row.len());

    let flat_actual: Vec<f64> = actual.iter().flatten().copied().collect();
    let flat_desired: Vec<f64> = desired.iter().flatten().copied().collect();
    if !row_shapes_match {
        let mut comparison = compare_arrays(&[], &[], tolerance);
        comparison.actual_len = flat_actual.len();
        comparison.desired_len = flat_desired.len();
        if comparison.actual_len == comparison.desired_len {
            // Same element count, different row layout.
            comparison.compared_values = comparison.actual_len;
            comparison.failing_values = comparison.actual_len.max(1);
            comparison.first_failure = Some(format!(
                "row layout mismatch (actual rows={}, desired rows={})",
                actual.len(),
                desired.len()
            ));
        }
        return comparison;
    }

    compare_arrays_relative_to(&flat_actual, &flat_desired, tolerance, relative_to)
}

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;
    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }
    sum
}

pub fn format_numeric(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }

    if value == f64::INFINITY {
        return "inf".to_string();
    }

    if value == f64::NEG_INFINITY {
        return "-inf".to_string();
    }

    format!("{value:.6E}")
}

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

fn non_finite_values_match(left: f64, right: f64) -> bool {
    if left.is_nan() || right.is_nan() {
        return left.is_nan() && right.is_nan();
    }

    if left.is_infinite() || right.is_infinite() {
        return left.is_infinite() && right.is_infinite() && left.signum() == right.signum();
    }

    true
}
