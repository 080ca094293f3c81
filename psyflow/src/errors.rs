// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::parameters::TypeTag;

#[derive(Error, Debug)]
pub enum PsyflowError {
    // parameter errors
    #[error("Invalid value for parameter \"{name}\": {reason}")]
    ValidationError { name: String, reason: String },
    #[error("Parameter \"{0}\" is constant and cannot be changed after construction")]
    ImmutableError(String),
    #[error("Unknown parameter \"{0}\"")]
    UnknownParameter(String),

    // controller errors
    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatchError { expected: TypeTag, found: TypeTag },
    #[error("Evaluation of \"{source_text}\" failed: {reason}")]
    EvaluationError { source_text: String, reason: String },
    #[error("Invalid flag combination: {0}")]
    InvalidFlags(String),

    // frame timer and presentation misuse
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid state: {0}")]
    StateError(String),

    // remote control errors
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // file errors
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    CSVError(#[from] csv::Error),

    // custom errors
    #[error("{0}")]
    CustomError(String),
}

impl PsyflowError {
    /// Shorthand for a [`PsyflowError::ValidationError`].
    pub fn validation(name: &str, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`PsyflowError::EvaluationError`].
    pub fn evaluation(source_text: &str, reason: impl Into<String>) -> Self {
        Self::EvaluationError {
            source_text: source_text.to_string(),
            reason: reason.into(),
        }
    }

    /// Short name of the error kind, used in replies to remote clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "ValidationError",
            Self::ImmutableError(_) => "ImmutableError",
            Self::UnknownParameter(_) => "UnknownParameter",
            Self::TypeMismatchError { .. } => "TypeMismatchError",
            Self::EvaluationError { .. } => "EvaluationError",
            Self::InvalidFlags(_) => "InvalidFlags",
            Self::ConfigError(_) => "ConfigError",
            Self::StateError(_) => "StateError",
            Self::ProtocolError(_) => "ProtocolError",
            Self::IOError(_) => "IOError",
            Self::CSVError(_) => "CSVError",
            Self::CustomError(_) => "Error",
        }
    }
}

// macro that error with the given message
#[macro_export]
macro_rules! error {
    ($msg:expr) => {
        return Err($crate::errors::PsyflowError::CustomError($msg.to_string()))
    };
}
