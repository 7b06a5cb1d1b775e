use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CheckResult<T> = Result<T, CheckError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckErrorCategory {
    Success,
    ComparisonError,
    InputValidationError,
    IoSystemError,
    ExternalProgramError,
    InternalError,
}

impl CheckErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ComparisonError => 1,
            Self::InputValidationError => 2,
            Self::IoSystemError => 3,
            Self::ExternalProgramError => 4,
            Self::InternalError => 5,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::ComparisonError => "ComparisonError",
            Self::InputValidationError => "InputValidationError",
            Self::IoSystemError => "IoSystemError",
            Self::ExternalProgramError => "ExternalProgramError",
            Self::InternalError => "InternalError",
        }
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl Display for CheckErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckError {
    category: CheckErrorCategory,
    code: &'static str,
    message: String,
}

impl CheckError {
    pub fn new(category: CheckErrorCategory, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    pub fn comparison(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CheckErrorCategory::ComparisonError, code, message)
    }

    pub fn input_validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CheckErrorCategory::InputValidationError, code, message)
    }

    pub fn io_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CheckErrorCategory::IoSystemError, code, message)
    }

    pub fn external_program(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CheckErrorCategory::ExternalProgramError, code, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CheckErrorCategory::InternalError, code, message)
    }

    pub const fn category(&self) -> CheckErrorCategory {
        self.category
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.code, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for CheckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.category, self.code, self.message)
    }
}

impl Error for CheckError {}
