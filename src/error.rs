// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the blackbox decoder.
//!
//! Mirrors the per-module `thiserror` enum shape used throughout this
//! crate's ancestry (one enum per concern, composed via `#[from]` at the
//! top). Most malformed-input conditions described by the wire format are
//! *not* represented here: invalid frames, unknown header keys and
//! malformed variable-byte integers are expected occurrences recorded in
//! `DecodeStats`/`unknown_headers`, never raised as errors.

use thiserror::Error;

/// Failures while parsing the ASCII header section of a sub-log.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("header incomplete: I-frame definition is missing or has mismatched field arrays")]
    HeaderIncomplete,

    #[error("header incomplete: no P-frame definition present")]
    MissingPFrameDef,

    #[error("unexpected end of input while reading header line at offset {offset}")]
    Truncated { offset: usize },
}

/// Failures while reconstructing a single frame's field vector.
///
/// `MissingPredictorInput` is the only case the spec marks fatal for the
/// current sub-log decode; everything else that can go wrong with an
/// individual frame is handled by the dispatcher as non-fatal corruption.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("predictor for field {field} requires motor[0], which has not been decoded yet")]
    MissingPredictorInput { field: usize },

    #[error("unknown encoding code {code} for field {field}")]
    UnknownEncoding { field: usize, code: u8 },

    #[error("unknown predictor code {code} for field {field}")]
    UnknownPredictor { field: usize, code: u8 },
}

/// Top-level error surfaced by the facade when a sub-log cannot be opened
/// or decoded at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("sub-log index {0} does not exist")]
    LogNotFound(usize),

    #[error("sub-log {index}: {message}")]
    SubLogError { index: usize, message: String },

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
