/// Input problems detected before any projection runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("retirement age ({retirement_age}) must be greater than current age ({current_age})")]
    RetirementNotAfterCurrent { current_age: u32, retirement_age: u32 },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("withdrawal year must be between 1 and {max}, got {year}")]
    WithdrawalYearOutOfRange { year: u32, max: u32 },

    #[error("partner profile: {0}")]
    Partner(Box<ValidationError>),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write CSV row: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush CSV output: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
