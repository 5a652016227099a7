use std::f64::consts::PI;
use std::fmt;

// proton gyromagnetic ratio
pub const GAMMA_BAR:f64 = 42.577478518E6;       // Hz/T
pub const GAMMA:f64 = 2.0*PI*GAMMA_BAR;         // rad/s/T

// scale factors between SI and the units used for display and scheme files
pub const BVAL_SI_TO_PER_MM2:f64 = 1.0E-6;      // s/m^2 -> s/mm^2
pub const BVAL_PER_MM2_TO_SI:f64 = 1.0E6;
pub const TESLA_PER_M_TO_MILLI:f64 = 1.0E3;     // T/m -> mT/m
pub const SEC_TO_MS:f64 = 1.0E3;

/// Physically invalid input to a unit conversion. These are surfaced instead
/// of letting NaN leak into a scheme.
#[derive(Debug,Clone,PartialEq)]
pub enum DomainError {
    NegativeBvalue{bvalue:f64},
    NegativeGradientStrength{gradient_strength:f64},
    NonPositivePulseDuration{pulse_duration:f64},
    NonPhysicalSeparation{pulse_duration:f64,pulse_separation:f64},
}

impl fmt::Display for DomainError {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::NegativeBvalue{bvalue} =>
                write!(f,"bvalue must be non-negative, got {} s/m^2",bvalue),
            DomainError::NegativeGradientStrength{gradient_strength} =>
                write!(f,"gradient_strength must be non-negative, got {} T/m",gradient_strength),
            DomainError::NonPositivePulseDuration{pulse_duration} =>
                write!(f,"pulse_duration (delta) must be positive, got {} s",pulse_duration),
            DomainError::NonPhysicalSeparation{pulse_duration,pulse_separation} =>
                write!(f,"pulse_separation (Delta = {} s) must exceed pulse_duration/3 (delta = {} s)",
                       pulse_separation,pulse_duration),
        }
    }
}

impl std::error::Error for DomainError {}

/// Effective diffusion time: Delta - delta/3.
// guards are written inverted so NaN input lands in the error branch
pub fn diffusion_time(pulse_duration:f64,pulse_separation:f64) -> Result<f64,DomainError> {
    if !(pulse_duration > 0.0) {
        return Err(DomainError::NonPositivePulseDuration{pulse_duration});
    }
    if !(pulse_separation > pulse_duration/3.0) {
        return Err(DomainError::NonPhysicalSeparation{pulse_duration,pulse_separation});
    }
    Ok(pulse_separation - pulse_duration/3.0)
}

/// G = sqrt( b / (gamma^2 delta^2 (Delta - delta/3)) ), with G = 0 for b = 0.
pub fn b_value_to_gradient_strength(bvalue:f64,pulse_duration:f64,pulse_separation:f64) -> Result<f64,DomainError> {
    if !(bvalue >= 0.0) {
        return Err(DomainError::NegativeBvalue{bvalue});
    }
    let tau = diffusion_time(pulse_duration,pulse_separation)?;
    if bvalue == 0.0 {
        return Ok(0.0);
    }
    Ok((bvalue/(GAMMA.powi(2)*pulse_duration.powi(2)*tau)).sqrt())
}

/// Inverse of [`b_value_to_gradient_strength`].
pub fn gradient_strength_to_b_value(gradient_strength:f64,pulse_duration:f64,pulse_separation:f64) -> Result<f64,DomainError> {
    if !(gradient_strength >= 0.0) {
        return Err(DomainError::NegativeGradientStrength{gradient_strength});
    }
    let tau = diffusion_time(pulse_duration,pulse_separation)?;
    Ok(GAMMA.powi(2)*pulse_duration.powi(2)*tau*gradient_strength.powi(2))
}

/// q = gamma delta G / 2 pi.
pub fn gradient_strength_to_q_value(gradient_strength:f64,pulse_duration:f64) -> Result<f64,DomainError> {
    if !(gradient_strength >= 0.0) {
        return Err(DomainError::NegativeGradientStrength{gradient_strength});
    }
    if !(pulse_duration > 0.0) {
        return Err(DomainError::NonPositivePulseDuration{pulse_duration});
    }
    Ok(GAMMA_BAR*pulse_duration*gradient_strength)
}

pub fn b_values_to_gradient_strengths(bvalues:&[f64],pulse_durations:&[f64],pulse_separations:&[f64]) -> Result<Vec<f64>,DomainError> {
    bvalues.iter().zip(pulse_durations).zip(pulse_separations)
        .map(|((&b,&d),&s)| b_value_to_gradient_strength(b,d,s))
        .collect()
}

pub fn gradient_strengths_to_q_values(gradient_strengths:&[f64],pulse_durations:&[f64]) -> Result<Vec<f64>,DomainError> {
    gradient_strengths.iter().zip(pulse_durations)
        .map(|(&g,&d)| gradient_strength_to_q_value(g,d))
        .collect()
}

pub fn diffusion_times(pulse_durations:&[f64],pulse_separations:&[f64]) -> Result<Vec<f64>,DomainError> {
    pulse_durations.iter().zip(pulse_separations)
        .map(|(&d,&s)| diffusion_time(d,s))
        .collect()
}
