//! Camino-style scheme file: a `VERSION:` header line, then one row per
//! measurement with 8 space-separated fields:
//!
//! `gx gy gz b G delta Delta TE`
//!
//! b is written in s/mm^2 (the external convention), G in T/m, times in
//! seconds. A scheme exported without explicit echo times gets
//! `Delta + 2*delta + 0.001` seconds per row, so exporting and re-importing
//! materializes those TE values instead of restoring the absent state.

use std::fmt;
use std::path::Path;
use crate::scheme::{AcquisitionScheme, SchemeError};
use crate::units::{BVAL_SI_TO_PER_MM2, BVAL_PER_MM2_TO_SI};

pub const SCHEME_FILE_HEADER:&str = "VERSION: STEJSKALTANNER";
pub const FIELDS_PER_ROW:usize = 8;
/// seconds added beyond Delta + 2*delta when no echo time is recorded
pub const DEFAULT_TE_PADDING:f64 = 0.001;

/// The scheme file format has no representation for unknown pulse timing, so
/// export refuses schemes built without it.
#[derive(Debug,Clone,PartialEq)]
pub enum MissingFieldError {
    PulseTiming,
}

impl fmt::Display for MissingFieldError {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingFieldError::PulseTiming =>
                write!(f,"scheme carries no pulse_duration/pulse_separation; the scheme file format requires both"),
        }
    }
}

impl std::error::Error for MissingFieldError {}

pub fn default_echo_time(pulse_duration:f64,pulse_separation:f64) -> f64 {
    pulse_separation + 2.0*pulse_duration + DEFAULT_TE_PADDING
}

/// Renders the scheme as scheme-file text.
pub fn scheme_to_string(scheme:&AcquisitionScheme) -> Result<String,SchemeError> {
    let pulse_durations = scheme.pulse_durations().ok_or(MissingFieldError::PulseTiming)?;
    let pulse_separations = scheme.pulse_separations().ok_or(MissingFieldError::PulseTiming)?;
    let gradient_strengths = scheme.gradient_strengths().ok_or(MissingFieldError::PulseTiming)?;

    let mut s = String::new();
    s.push_str(SCHEME_FILE_HEADER);
    s.push('\n');
    for i in 0..scheme.n_measurements() {
        let dir = scheme.gradient_directions()[i];
        let echo_time = match scheme.echo_times() {
            Some(te) => te[i],
            None => default_echo_time(pulse_durations[i],pulse_separations[i]),
        };
        let fields = [
            dir[0],
            dir[1],
            dir[2],
            scheme.bvalues()[i]*BVAL_SI_TO_PER_MM2,
            gradient_strengths[i],
            pulse_durations[i],
            pulse_separations[i],
            echo_time,
        ];
        s.push_str(&utils::vec_to_string(&fields));
        s.push('\n');
    }
    Ok(s)
}

/// Writes the scheme file atomically; a failed export leaves no partial file.
pub fn write_scheme_file(scheme:&AcquisitionScheme,path:&Path) -> Result<(),SchemeError> {
    let s = scheme_to_string(scheme)?;
    utils::write_to_file_atomic(path,&s)
        .map_err(|e| SchemeError::Io{path:path.to_owned(),reason:e.to_string()})
}

/// Parses scheme-file text. The path is only used for error reporting.
pub fn scheme_from_string(text:&str,path:&Path) -> Result<AcquisitionScheme,SchemeError> {
    let mut bvalues = Vec::<f64>::new();
    let mut directions = Vec::<[f64;3]>::new();
    let mut pulse_durations = Vec::<f64>::new();
    let mut pulse_separations = Vec::<f64>::new();
    let mut echo_times = Vec::<f64>::new();

    for (idx,line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("VERSION:") {
            continue;
        }
        let tokens:Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != FIELDS_PER_ROW {
            return Err(SchemeError::Parse {
                path:path.to_owned(),
                line:idx + 1,
                reason:format!("expected {} fields, found {}",FIELDS_PER_ROW,tokens.len()),
            });
        }
        let mut fields = [0.0f64;FIELDS_PER_ROW];
        for (j,token) in tokens.iter().enumerate() {
            fields[j] = token.parse().map_err(|_| SchemeError::Parse {
                path:path.to_owned(),
                line:idx + 1,
                reason:format!("malformed value '{}'",token),
            })?;
        }
        directions.push([fields[0],fields[1],fields[2]]);
        bvalues.push(fields[3]*BVAL_PER_MM2_TO_SI);
        // fields[4] is the gradient strength; it is re-derived from b and the
        // timing so the stored scheme stays internally consistent
        pulse_durations.push(fields[5]);
        pulse_separations.push(fields[6]);
        echo_times.push(fields[7]);
    }

    AcquisitionScheme::from_parts(
        bvalues,
        directions,
        Some((pulse_durations,pulse_separations)),
        Some(echo_times),
    )
}

/// Reads a scheme file from disk.
pub fn read_scheme_file(path:&Path) -> Result<AcquisitionScheme,SchemeError> {
    let text = utils::read_to_string(path)
        .map_err(|e| SchemeError::Io{path:path.to_owned(),reason:e.to_string()})?;
    scheme_from_string(&text,path)
}
