//! Error taxonomy for the magnetic field engine
//!
//! One flat enum shared by every component. Each variant carries a stable
//! integer code (0 is reserved for success) so batch callers and foreign
//! front ends can report failures without matching on Rust types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MagFieldError {
    #[error("Model not initialized: {0}")]
    NotInitialized(String),

    #[error("No coefficient database loaded")]
    NoDatabase,

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Bad input coordinate: {0}")]
    BadInputCoordinate(String),

    #[error("Bad pitch angle: {0}")]
    BadPitchAngle(f64),

    #[error("Bad Kp value: {0}")]
    BadKpValue(f64),

    #[error("Unsupported option combination: {0}")]
    UnsupportedOption(String),

    #[error("Unsupported field model: {0}")]
    UnsupportedFieldModel(String),

    #[error("Unsupported coordinate conversion: {0}")]
    UnsupportedConversion(String),

    #[error("Field line inside Earth sphere: {0}")]
    FieldLineInsideEarthSphere(String),

    #[error("Field line outside model bounds: {0}")]
    FieldLineOutsideModelBounds(String),

    #[error("Points inside sphere: {0}")]
    PointsInsideSphere(String),

    #[error("Points outside sphere: {0}")]
    PointsOutsideSphere(String),

    #[error("Trace step limit exceeded after {0} steps")]
    TraceLimitExceeded(usize),

    #[error("Insufficient storage: need {needed}, have {available}")]
    InsufficientStorage { needed: usize, available: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MagFieldError>;

/// Code reported for a successful operation.
pub const SUCCESS: i32 = 0;

const MESSAGES: &[(i32, &str)] = &[
    (SUCCESS, "success"),
    (1, "model not initialized"),
    (2, "no coefficient database loaded"),
    (3, "value out of range"),
    (4, "bad input coordinate"),
    (5, "bad pitch angle"),
    (6, "bad Kp value"),
    (7, "unsupported option combination"),
    (8, "unsupported field model"),
    (9, "unsupported coordinate conversion"),
    (10, "field line inside Earth sphere"),
    (11, "field line outside model bounds"),
    (12, "points inside sphere"),
    (13, "points outside sphere"),
    (14, "trace step limit exceeded"),
    (15, "insufficient storage"),
    (16, "not found"),
    (17, "io error"),
    (18, "json error"),
];

impl MagFieldError {
    /// Stable integer code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotInitialized(_) => 1,
            Self::NoDatabase => 2,
            Self::OutOfRange(_) => 3,
            Self::BadInputCoordinate(_) => 4,
            Self::BadPitchAngle(_) => 5,
            Self::BadKpValue(_) => 6,
            Self::UnsupportedOption(_) => 7,
            Self::UnsupportedFieldModel(_) => 8,
            Self::UnsupportedConversion(_) => 9,
            Self::FieldLineInsideEarthSphere(_) => 10,
            Self::FieldLineOutsideModelBounds(_) => 11,
            Self::PointsInsideSphere(_) => 12,
            Self::PointsOutsideSphere(_) => 13,
            Self::TraceLimitExceeded(_) => 14,
            Self::InsufficientStorage { .. } => 15,
            Self::NotFound(_) => 16,
            Self::Io(_) => 17,
            Self::Json(_) => 18,
        }
    }

    /// Static description for an error code; unknown codes map to "unknown error".
    pub fn message(code: i32) -> &'static str {
        MESSAGES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, m)| *m)
            .unwrap_or("unknown error")
    }
}

/// Integer code of a result, `SUCCESS` for `Ok`.
pub fn result_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => SUCCESS,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique_and_nonzero() {
        let errors = vec![
            MagFieldError::NotInitialized("x".into()),
            MagFieldError::NoDatabase,
            MagFieldError::OutOfRange("x".into()),
            MagFieldError::BadPitchAngle(0.0),
            MagFieldError::UnsupportedOption("x".into()),
            MagFieldError::TraceLimitExceeded(10),
            MagFieldError::InsufficientStorage { needed: 2, available: 1 },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|c| *c != SUCCESS));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_message_lookup() {
        assert_eq!(MagFieldError::message(SUCCESS), "success");
        let e = MagFieldError::BadKpValue(12.0);
        assert_eq!(MagFieldError::message(e.code()), "bad Kp value");
        assert_eq!(MagFieldError::message(999), "unknown error");
    }

    #[test]
    fn test_result_code() {
        let ok: Result<()> = Ok(());
        let err: Result<()> = Err(MagFieldError::NoDatabase);
        assert_eq!(result_code(&ok), SUCCESS);
        assert_eq!(result_code(&err), 2);
    }
}
