use std::fmt;
use std::path::{Path, PathBuf};
use serde::Serialize;
use grad_table::grad_table::GradientTable;
use crate::units::{self, DomainError, BVAL_SI_TO_PER_MM2, TESLA_PER_M_TO_MILLI, SEC_TO_MS};
use crate::shells::{self, ShellClassification, DEFAULT_SHELL_DISTANCE, DEFAULT_B0_THRESHOLD};
use crate::scheme_file::{self, MissingFieldError};

pub const DIRECTION_NORM_TOLERANCE:f64 = 1.0E-6;

#[derive(Debug,Clone,PartialEq)]
pub enum ValidationError {
    EmptyScheme,
    LengthMismatch{field:&'static str,expected:usize,found:usize},
    NegativeBvalue{index:usize,bvalue:f64},
    NonFiniteValue{field:&'static str,index:usize,value:f64},
    NonUnitDirection{index:usize,norm:f64},
}

impl fmt::Display for ValidationError {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyScheme =>
                write!(f,"a scheme must contain at least one measurement"),
            ValidationError::LengthMismatch{field,expected,found} =>
                write!(f,"{} has {} entries but the scheme has {} measurements",field,found,expected),
            ValidationError::NegativeBvalue{index,bvalue} =>
                write!(f,"bvalue at measurement {} is negative: {} s/m^2",index,bvalue),
            ValidationError::NonFiniteValue{field,index,value} =>
                write!(f,"{} at measurement {} is not a finite number: {}",field,index,value),
            ValidationError::NonUnitDirection{index,norm} =>
                write!(f,"gradient_direction at measurement {} has norm {}, expected 1 (or 0 for a b0 measurement)",index,norm),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Only one of the two pulse timing parameters was supplied. A scheme either
/// carries the full derived-quantity group or none of it, so construction is
/// refused rather than producing a partially derivable scheme.
#[derive(Debug,Clone,PartialEq)]
pub enum IncompleteAcquisitionError {
    MissingPulseDuration,
    MissingPulseSeparation,
}

impl fmt::Display for IncompleteAcquisitionError {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteAcquisitionError::MissingPulseDuration =>
                write!(f,"pulse_duration (delta) is missing while pulse_separation (Delta) is set"),
            IncompleteAcquisitionError::MissingPulseSeparation =>
                write!(f,"pulse_separation (Delta) is missing while pulse_duration (delta) is set"),
        }
    }
}

impl std::error::Error for IncompleteAcquisitionError {}

#[derive(Debug)]
pub enum SchemeError {
    Validation(ValidationError),
    Domain(DomainError),
    IncompleteAcquisition(IncompleteAcquisitionError),
    MissingField(MissingFieldError),
    Io{path:PathBuf,reason:String},
    Parse{path:PathBuf,line:usize,reason:String},
}

impl fmt::Display for SchemeError {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeError::Validation(e) => write!(f,"{}",e),
            SchemeError::Domain(e) => write!(f,"{}",e),
            SchemeError::IncompleteAcquisition(e) => write!(f,"{}",e),
            SchemeError::MissingField(e) => write!(f,"{}",e),
            SchemeError::Io{path,reason} => write!(f,"io error on {:?}: {}",path,reason),
            SchemeError::Parse{path,line,reason} => write!(f,"cannot parse {:?} line {}: {}",path,line,reason),
        }
    }
}

impl std::error::Error for SchemeError {}

impl From<ValidationError> for SchemeError {
    fn from(e:ValidationError) -> Self {
        SchemeError::Validation(e)
    }
}

impl From<DomainError> for SchemeError {
    fn from(e:DomainError) -> Self {
        SchemeError::Domain(e)
    }
}

impl From<IncompleteAcquisitionError> for SchemeError {
    fn from(e:IncompleteAcquisitionError) -> Self {
        SchemeError::IncompleteAcquisition(e)
    }
}

impl From<MissingFieldError> for SchemeError {
    fn from(e:MissingFieldError) -> Self {
        SchemeError::MissingField(e)
    }
}

/// The derived group is all-or-nothing: a scheme built with both timing
/// parameters carries every derived array, one built without timing carries
/// none. There is no partially derived state.
#[derive(Debug,Clone)]
pub enum DerivedQuantities {
    Available {
        gradient_strengths:Vec<f64>,
        qvalues:Vec<f64>,
        pulse_durations:Vec<f64>,
        pulse_separations:Vec<f64>,
        diffusion_times:Vec<f64>,
    },
    Unavailable,
}

/// Validated acquisition geometry of a dMRI experiment. Parallel arrays, one
/// entry per measurement, in input order. Read-only after construction; every
/// constructor converges on the same validation path, so downstream fitting
/// code can rely on a constructed scheme being self-consistent.
#[derive(Debug,Clone)]
pub struct AcquisitionScheme {
    bvalues:Vec<f64>,
    gradient_directions:Vec<[f64;3]>,
    derived:DerivedQuantities,
    echo_times:Option<Vec<f64>>,
    shells:ShellClassification,
}

/// One row of the per-shell report. b-values in s/mm^2, gradient strength in
/// mT/m, times in ms; `None` where the scheme carries no derived quantities.
#[derive(Debug,Clone,Serialize)]
pub struct ShellSummary {
    pub shell_index:usize,
    pub n_measurements:usize,
    pub bvalue:f64,
    pub gradient_strength:Option<f64>,
    pub pulse_duration:Option<f64>,
    pub pulse_separation:Option<f64>,
    pub echo_time:Option<f64>,
}

impl AcquisitionScheme {

    /// Builds a scheme from raw arrays: b-values in s/m^2 and unit gradient
    /// directions, with optional scheme-wide pulse timing in seconds.
    /// Supplying only one of delta/Delta is refused.
    pub fn from_bvalues(bvalues:Vec<f64>,gradient_directions:Vec<[f64;3]>,
                        pulse_duration:Option<f64>,pulse_separation:Option<f64>) -> Result<Self,SchemeError> {
        let n = bvalues.len();
        let timing = match (pulse_duration,pulse_separation) {
            (Some(d),Some(s)) => Some((vec![d;n],vec![s;n])),
            (None,None) => None,
            (Some(_),None) => return Err(IncompleteAcquisitionError::MissingPulseSeparation.into()),
            (None,Some(_)) => return Err(IncompleteAcquisitionError::MissingPulseDuration.into()),
        };
        Self::from_parts(bvalues,gradient_directions,timing,None)
    }

    /// Builds a scheme from an external gradient table. The table must carry
    /// both timing parameters; a table without them cannot yield the derived
    /// quantities downstream fits expect.
    pub fn from_gradient_table(table:&GradientTable) -> Result<Self,SchemeError> {
        let pulse_duration = table.pulse_duration()
            .ok_or(IncompleteAcquisitionError::MissingPulseDuration)?;
        let pulse_separation = table.pulse_separation()
            .ok_or(IncompleteAcquisitionError::MissingPulseSeparation)?;
        Self::from_bvalues(
            table.bvalues().to_vec(),
            table.directions().to_vec(),
            Some(pulse_duration),
            Some(pulse_separation),
        )
    }

    /// Reads a Camino-style scheme file (see [`crate::scheme_file`]).
    pub fn from_scheme_file(path:&Path) -> Result<Self,SchemeError> {
        scheme_file::read_scheme_file(path)
    }

    // the single validated construction path; timing and echo_times are
    // per-measurement here
    pub(crate) fn from_parts(bvalues:Vec<f64>,gradient_directions:Vec<[f64;3]>,
                             timing:Option<(Vec<f64>,Vec<f64>)>,
                             echo_times:Option<Vec<f64>>) -> Result<Self,SchemeError> {
        let n = bvalues.len();
        if n == 0 {
            return Err(ValidationError::EmptyScheme.into());
        }
        if gradient_directions.len() != n {
            return Err(ValidationError::LengthMismatch {
                field:"gradient_directions",
                expected:n,
                found:gradient_directions.len(),
            }.into());
        }
        if let Some((durations,separations)) = &timing {
            if durations.len() != n {
                return Err(ValidationError::LengthMismatch {
                    field:"pulse_durations",
                    expected:n,
                    found:durations.len(),
                }.into());
            }
            if separations.len() != n {
                return Err(ValidationError::LengthMismatch {
                    field:"pulse_separations",
                    expected:n,
                    found:separations.len(),
                }.into());
            }
        }
        if let Some(te) = &echo_times {
            if te.len() != n {
                return Err(ValidationError::LengthMismatch {
                    field:"echo_times",
                    expected:n,
                    found:te.len(),
                }.into());
            }
        }

        // NaN compares false against every guard below, so non-finite values
        // are rejected up front before they can classify as b0
        let check_finite = |field:&'static str,values:&[f64]| -> Result<(),ValidationError> {
            match values.iter().position(|v| !v.is_finite()) {
                Some(index) => Err(ValidationError::NonFiniteValue{field,index,value:values[index]}),
                None => Ok(()),
            }
        };
        check_finite("bvalues",&bvalues)?;
        if let Some((durations,separations)) = &timing {
            check_finite("pulse_durations",durations)?;
            check_finite("pulse_separations",separations)?;
        }
        if let Some(te) = &echo_times {
            check_finite("echo_times",te)?;
        }

        for (i,&b) in bvalues.iter().enumerate() {
            if b < 0.0 {
                return Err(ValidationError::NegativeBvalue{index:i,bvalue:b}.into());
            }
            let d = gradient_directions[i];
            if let Some(c) = d.iter().find(|c| !c.is_finite()) {
                return Err(ValidationError::NonFiniteValue {
                    field:"gradient_directions",
                    index:i,
                    value:*c,
                }.into());
            }
            let norm = (d[0]*d[0] + d[1]*d[1] + d[2]*d[2]).sqrt();
            let is_unit = (norm - 1.0).abs() <= DIRECTION_NORM_TOLERANCE;
            let is_b0_rest = norm == 0.0 && b <= DEFAULT_B0_THRESHOLD;
            if !is_unit && !is_b0_rest {
                return Err(ValidationError::NonUnitDirection{index:i,norm}.into());
            }
        }

        let shells = shells::classify_shells(&bvalues,DEFAULT_SHELL_DISTANCE,DEFAULT_B0_THRESHOLD);

        let derived = match timing {
            Some((pulse_durations,pulse_separations)) => {
                let gradient_strengths = units::b_values_to_gradient_strengths(
                    &bvalues,&pulse_durations,&pulse_separations)?;
                let qvalues = units::gradient_strengths_to_q_values(
                    &gradient_strengths,&pulse_durations)?;
                let diffusion_times = units::diffusion_times(
                    &pulse_durations,&pulse_separations)?;
                DerivedQuantities::Available {
                    gradient_strengths,
                    qvalues,
                    pulse_durations,
                    pulse_separations,
                    diffusion_times,
                }
            }
            None => DerivedQuantities::Unavailable,
        };

        Ok(Self {
            bvalues,
            gradient_directions,
            derived,
            echo_times,
            shells,
        })
    }

    pub fn n_measurements(&self) -> usize {
        self.bvalues.len()
    }

    pub fn bvalues(&self) -> &[f64] {
        &self.bvalues
    }

    pub fn gradient_directions(&self) -> &[[f64;3]] {
        &self.gradient_directions
    }

    /// `None` when the scheme was built without pulse timing; distinguishable
    /// from a scheme whose gradients are all zero.
    pub fn gradient_strengths(&self) -> Option<&[f64]> {
        match &self.derived {
            DerivedQuantities::Available{gradient_strengths,..} => Some(gradient_strengths),
            DerivedQuantities::Unavailable => None,
        }
    }

    pub fn qvalues(&self) -> Option<&[f64]> {
        match &self.derived {
            DerivedQuantities::Available{qvalues,..} => Some(qvalues),
            DerivedQuantities::Unavailable => None,
        }
    }

    pub fn pulse_durations(&self) -> Option<&[f64]> {
        match &self.derived {
            DerivedQuantities::Available{pulse_durations,..} => Some(pulse_durations),
            DerivedQuantities::Unavailable => None,
        }
    }

    pub fn pulse_separations(&self) -> Option<&[f64]> {
        match &self.derived {
            DerivedQuantities::Available{pulse_separations,..} => Some(pulse_separations),
            DerivedQuantities::Unavailable => None,
        }
    }

    pub fn diffusion_times(&self) -> Option<&[f64]> {
        match &self.derived {
            DerivedQuantities::Available{diffusion_times,..} => Some(diffusion_times),
            DerivedQuantities::Unavailable => None,
        }
    }

    pub fn echo_times(&self) -> Option<&[f64]> {
        self.echo_times.as_deref()
    }

    pub fn shell_indices(&self) -> &[usize] {
        self.shells.shell_indices()
    }

    pub fn shell_bvalues(&self) -> &[f64] {
        self.shells.shell_bvalues()
    }

    /// Number of DWI shells, not counting the b0 shell.
    pub fn n_shells(&self) -> usize {
        self.shells.n_shells()
    }

    pub fn n_b0(&self) -> usize {
        self.shells.n_b0()
    }

    /// Per-shell report rows, shell 0 first when b0 measurements exist. A
    /// pure projection of the stored arrays.
    pub fn summary(&self) -> Vec<ShellSummary> {
        let mut rows = Vec::<ShellSummary>::new();
        for shell in 0..=self.n_shells() {
            let members = self.shells.shell_members(shell);
            if members.is_empty() {
                continue;
            }
            let mean = |values:&[f64]| {
                members.iter().map(|&i| values[i]).sum::<f64>()/members.len() as f64
            };
            rows.push(ShellSummary {
                shell_index:shell,
                n_measurements:members.len(),
                bvalue:mean(&self.bvalues)*BVAL_SI_TO_PER_MM2,
                gradient_strength:self.gradient_strengths().map(|g| mean(g)*TESLA_PER_M_TO_MILLI),
                pulse_duration:self.pulse_durations().map(|d| mean(d)*SEC_TO_MS),
                pulse_separation:self.pulse_separations().map(|s| mean(s)*SEC_TO_MS),
                echo_time:self.echo_times().map(|te| mean(te)*SEC_TO_MS),
            });
        }
        rows
    }

    /// Formatted acquisition report, one row per shell, "N/A" where a
    /// quantity was not derivable.
    pub fn summary_table(&self) -> String {
        let fmt_opt = |v:Option<f64>| match v {
            Some(v) => format!("{:.2}",v),
            None => String::from("N/A"),
        };
        let mut s = String::new();
        s.push_str("shell | # of measurements | b-value [s/mm^2] | gradient strength [mT/m] | delta [ms] | Delta [ms] | TE [ms]\n");
        for row in self.summary() {
            s.push_str(&format!("{} | {} | {:.0} | {} | {} | {} | {}\n",
                row.shell_index,
                row.n_measurements,
                row.bvalue,
                fmt_opt(row.gradient_strength),
                fmt_opt(row.pulse_duration),
                fmt_opt(row.pulse_separation),
                fmt_opt(row.echo_time),
            ));
        }
        s
    }

    /// Summary rows as JSON, for machine consumption of the report.
    pub fn summary_json(&self) -> String {
        serde_json::to_string_pretty(&self.summary())
            .expect("shell summary rows are always serializable")
    }
}

impl fmt::Display for AcquisitionScheme {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{}",self.summary_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_x() -> [f64;3] {
        [1.0,0.0,0.0]
    }

    #[test]
    fn length_mismatch_is_rejected(){
        let r = AcquisitionScheme::from_bvalues(vec![0.0,1.0E9],vec![unit_x()],None,None);
        match r {
            Err(SchemeError::Validation(ValidationError::LengthMismatch{field,expected,found})) => {
                assert_eq!(field,"gradient_directions");
                assert_eq!(expected,2);
                assert_eq!(found,1);
            }
            other => panic!("expected LengthMismatch, got {:?}",other.err()),
        }
    }

    #[test]
    fn empty_scheme_is_rejected(){
        assert!(matches!(
            AcquisitionScheme::from_bvalues(vec![],vec![],None,None),
            Err(SchemeError::Validation(ValidationError::EmptyScheme))
        ));
    }

    #[test]
    fn negative_bvalue_is_rejected(){
        let r = AcquisitionScheme::from_bvalues(vec![-1.0],vec![unit_x()],None,None);
        assert!(matches!(
            r,
            Err(SchemeError::Validation(ValidationError::NegativeBvalue{index:0,..}))
        ));
    }

    #[test]
    fn non_unit_direction_is_rejected(){
        let r = AcquisitionScheme::from_bvalues(
            vec![1.0E9],vec![[0.5,0.5,0.5]],None,None);
        match r {
            Err(SchemeError::Validation(ValidationError::NonUnitDirection{index,norm})) => {
                assert_eq!(index,0);
                assert!((norm - 0.75f64.sqrt()).abs() < 1.0E-12);
            }
            other => panic!("expected NonUnitDirection, got {:?}",other.err()),
        }
    }

    #[test]
    fn nan_bvalue_is_rejected_not_classified_as_b0(){
        let r = AcquisitionScheme::from_bvalues(vec![f64::NAN],vec![unit_x()],None,None);
        match r {
            Err(SchemeError::Validation(ValidationError::NonFiniteValue{field,index,value})) => {
                assert_eq!(field,"bvalues");
                assert_eq!(index,0);
                assert!(value.is_nan());
            }
            other => panic!("expected NonFiniteValue, got {:?}",other.err()),
        }
    }

    #[test]
    fn non_finite_direction_and_timing_are_rejected(){
        let r = AcquisitionScheme::from_bvalues(
            vec![1.0E9],vec![[f64::INFINITY,0.0,0.0]],None,None);
        assert!(matches!(
            r,
            Err(SchemeError::Validation(ValidationError::NonFiniteValue{field:"gradient_directions",..}))
        ));
        let r = AcquisitionScheme::from_bvalues(
            vec![1.0E9],vec![unit_x()],Some(f64::NAN),Some(0.0431));
        assert!(matches!(
            r,
            Err(SchemeError::Validation(ValidationError::NonFiniteValue{field:"pulse_durations",..}))
        ));
    }

    #[test]
    fn zero_direction_allowed_only_for_b0(){
        let zero = [0.0,0.0,0.0];
        assert!(AcquisitionScheme::from_bvalues(vec![0.0],vec![zero],None,None).is_ok());
        assert!(matches!(
            AcquisitionScheme::from_bvalues(vec![1.0E9],vec![zero],None,None),
            Err(SchemeError::Validation(ValidationError::NonUnitDirection{..}))
        ));
    }

    #[test]
    fn unit_norm_within_tolerance_passes(){
        let nearly = [1.0 + 5.0E-7,0.0,0.0];
        assert!(AcquisitionScheme::from_bvalues(vec![1.0E9],vec![nearly],None,None).is_ok());
    }

    #[test]
    fn partial_timing_is_refused(){
        let r = AcquisitionScheme::from_bvalues(vec![1.0E9],vec![unit_x()],Some(0.0106),None);
        assert!(matches!(
            r,
            Err(SchemeError::IncompleteAcquisition(IncompleteAcquisitionError::MissingPulseSeparation))
        ));
        let r = AcquisitionScheme::from_bvalues(vec![1.0E9],vec![unit_x()],None,Some(0.0431));
        assert!(matches!(
            r,
            Err(SchemeError::IncompleteAcquisition(IncompleteAcquisitionError::MissingPulseDuration))
        ));
    }

    #[test]
    fn non_physical_timing_refuses_construction(){
        let r = AcquisitionScheme::from_bvalues(
            vec![1.0E9],vec![unit_x()],Some(0.03),Some(0.005));
        assert!(matches!(r,Err(SchemeError::Domain(DomainError::NonPhysicalSeparation{..}))));
    }

    #[test]
    fn derived_group_is_all_or_nothing(){
        let timed = AcquisitionScheme::from_bvalues(
            vec![0.0,1.0E9],vec![[0.0,0.0,0.0],unit_x()],Some(0.0106),Some(0.0431)).unwrap();
        assert!(timed.gradient_strengths().is_some());
        assert!(timed.qvalues().is_some());
        assert!(timed.diffusion_times().is_some());
        assert!(timed.pulse_durations().is_some());
        assert!(timed.pulse_separations().is_some());

        let untimed = AcquisitionScheme::from_bvalues(
            vec![0.0,1.0E9],vec![[0.0,0.0,0.0],unit_x()],None,None).unwrap();
        assert!(untimed.gradient_strengths().is_none());
        assert!(untimed.qvalues().is_none());
        assert!(untimed.diffusion_times().is_none());
        assert!(untimed.pulse_durations().is_none());
        assert!(untimed.pulse_separations().is_none());
    }

    #[test]
    fn b0_gradient_strength_is_zero_not_missing(){
        let scheme = AcquisitionScheme::from_bvalues(
            vec![0.0,1.0E9],vec![[0.0,0.0,0.0],unit_x()],Some(0.0106),Some(0.0431)).unwrap();
        let g = scheme.gradient_strengths().unwrap();
        assert_eq!(g[0],0.0);
        assert!(g[1] > 0.0);
    }

    #[test]
    fn gradient_table_import_requires_full_timing(){
        let table = GradientTable::from_arrays(
            vec![0.0,1.0E9],vec![[0.0,0.0,0.0],unit_x()]).unwrap()
            .with_pulse_duration(0.0106);
        assert!(matches!(
            AcquisitionScheme::from_gradient_table(&table),
            Err(SchemeError::IncompleteAcquisition(IncompleteAcquisitionError::MissingPulseSeparation))
        ));

        let table = table.with_pulse_separation(0.0431);
        let scheme = AcquisitionScheme::from_gradient_table(&table).unwrap();
        assert_eq!(scheme.n_measurements(),2);
        assert!(scheme.gradient_strengths().is_some());
    }

    #[test]
    fn summary_reports_na_without_timing(){
        let scheme = AcquisitionScheme::from_bvalues(
            vec![0.0,1.0E9],vec![[0.0,0.0,0.0],unit_x()],None,None).unwrap();
        let table = scheme.summary_table();
        assert!(table.contains("N/A"));
        let rows = scheme.summary();
        assert_eq!(rows.len(),2);
        assert!(rows[0].gradient_strength.is_none());
        assert!(rows[1].echo_time.is_none());
    }

    #[test]
    fn summary_rows_group_by_shell(){
        let scheme = AcquisitionScheme::from_bvalues(
            vec![0.0,1.0E9,1.0E9,2.0E9],
            vec![[0.0,0.0,0.0],unit_x(),[0.0,1.0,0.0],[0.0,0.0,1.0]],
            Some(0.0106),Some(0.0431)).unwrap();
        let rows = scheme.summary();
        assert_eq!(rows.len(),3);
        assert_eq!(rows[0].shell_index,0);
        assert_eq!(rows[0].n_measurements,1);
        assert_eq!(rows[1].n_measurements,2);
        assert!((rows[1].bvalue - 1000.0).abs() < 1.0E-9);
        assert!((rows[2].bvalue - 2000.0).abs() < 1.0E-9);
        assert!(rows[1].gradient_strength.is_some());
    }

    #[test]
    fn summary_json_round_trips_through_serde(){
        let scheme = AcquisitionScheme::from_bvalues(
            vec![0.0,1.0E9],vec![[0.0,0.0,0.0],unit_x()],Some(0.0106),Some(0.0431)).unwrap();
        let json = scheme.summary_json();
        let parsed:serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(),2);
        assert_eq!(parsed[0]["shell_index"],0);
        assert_eq!(parsed[1]["n_measurements"],1);
    }

    #[test]
    fn accessors_return_stored_arrays_verbatim(){
        let bvalues = vec![0.0,1.0E9,2.0E9];
        let dirs = vec![[0.0,0.0,0.0],unit_x(),[0.0,1.0,0.0]];
        let scheme = AcquisitionScheme::from_bvalues(
            bvalues.clone(),dirs.clone(),Some(0.0106),Some(0.0431)).unwrap();
        assert_eq!(scheme.bvalues(),&bvalues[..]);
        assert_eq!(scheme.gradient_directions(),&dirs[..]);
        assert_eq!(scheme.shell_indices(),&[0,1,2]);
        assert_eq!(scheme.n_b0(),1);
        assert_eq!(scheme.n_shells(),2);
    }
}
