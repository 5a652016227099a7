use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};

/// b-values in bvals files follow the scanner convention (s/mm^2)
pub const BVAL_PER_MM2_TO_SI:f64 = 1.0E6;

/// Gradient table as delivered alongside the image data: one b-value and one
/// unit direction per measurement, plus the scheme-wide pulse timing when the
/// protocol recorded it. Timing is optional here; consumers that need derived
/// quantities reject tables without it.
#[derive(Debug,Clone,Serialize,Deserialize)]
pub struct GradientTable {
    bvalues:Vec<f64>,
    directions:Vec<[f64;3]>,
    pulse_duration:Option<f64>,
    pulse_separation:Option<f64>,
}

#[derive(Debug,Clone,PartialEq)]
pub enum TableError {
    FileUnreadable{path:PathBuf,reason:String},
    MalformedValue{path:PathBuf,line:usize,token:String},
    WrongDirectionRowCount{path:PathBuf,found:usize},
    RaggedDirectionRows{path:PathBuf,lengths:[usize;3]},
    LengthMismatch{n_bvalues:usize,n_directions:usize},
}

impl fmt::Display for TableError {
    fn fmt(&self,f:&mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::FileUnreadable{path,reason} =>
                write!(f,"cannot read gradient table file {:?}: {}",path,reason),
            TableError::MalformedValue{path,line,token} =>
                write!(f,"malformed value '{}' on line {} of {:?}",token,line,path),
            TableError::WrongDirectionRowCount{path,found} =>
                write!(f,"bvecs file {:?} must have 3 component rows, found {}",path,found),
            TableError::RaggedDirectionRows{path,lengths} =>
                write!(f,"bvecs file {:?} has component rows of unequal length {:?}",path,lengths),
            TableError::LengthMismatch{n_bvalues,n_directions} =>
                write!(f,"gradient table has {} b-values but {} directions",n_bvalues,n_directions),
        }
    }
}

impl std::error::Error for TableError {}

impl GradientTable {

    /// b-values are expected in SI units (s/m^2) here; [`GradientTable::open`]
    /// converts from the s/mm^2 file convention on load.
    pub fn from_arrays(bvalues:Vec<f64>,directions:Vec<[f64;3]>) -> Result<Self,TableError> {
        if bvalues.len() != directions.len() {
            return Err(TableError::LengthMismatch {
                n_bvalues:bvalues.len(),
                n_directions:directions.len(),
            });
        }
        Ok(Self {
            bvalues,
            directions,
            pulse_duration:None,
            pulse_separation:None,
        })
    }

    /// Reads an FSL-style bvals/bvecs file pair. bvals holds N whitespace
    /// separated values in s/mm^2; bvecs holds 3 rows of N components (x, y,
    /// z). Values are converted to SI on load.
    pub fn open(bvals:&Path,bvecs:&Path) -> Result<Self,TableError> {
        let bval_txt = utils::read_to_string(bvals)
            .map_err(|e| TableError::FileUnreadable{path:bvals.to_owned(),reason:e.to_string()})?;
        let bvec_txt = utils::read_to_string(bvecs)
            .map_err(|e| TableError::FileUnreadable{path:bvecs.to_owned(),reason:e.to_string()})?;

        let bvalues = parse_value_lines(&bval_txt,bvals)?
            .into_iter().flatten()
            .map(|b| b*BVAL_PER_MM2_TO_SI)
            .collect::<Vec<f64>>();

        let rows = parse_value_lines(&bvec_txt,bvecs)?;
        if rows.len() != 3 {
            return Err(TableError::WrongDirectionRowCount{path:bvecs.to_owned(),found:rows.len()});
        }
        if rows[0].len() != rows[1].len() || rows[0].len() != rows[2].len() {
            return Err(TableError::RaggedDirectionRows {
                path:bvecs.to_owned(),
                lengths:[rows[0].len(),rows[1].len(),rows[2].len()],
            });
        }
        let directions:Vec<[f64;3]> = (0..rows[0].len())
            .map(|i| [rows[0][i],rows[1][i],rows[2][i]])
            .collect();

        Self::from_arrays(bvalues,directions)
    }

    pub fn with_pulse_duration(mut self,pulse_duration:f64) -> Self {
        self.pulse_duration = Some(pulse_duration);
        self
    }

    pub fn with_pulse_separation(mut self,pulse_separation:f64) -> Self {
        self.pulse_separation = Some(pulse_separation);
        self
    }

    pub fn with_timing(self,pulse_duration:f64,pulse_separation:f64) -> Self {
        self.with_pulse_duration(pulse_duration).with_pulse_separation(pulse_separation)
    }

    pub fn n_measurements(&self) -> usize {
        self.bvalues.len()
    }

    pub fn bvalues(&self) -> &[f64] {
        &self.bvalues
    }

    pub fn directions(&self) -> &[[f64;3]] {
        &self.directions
    }

    pub fn pulse_duration(&self) -> Option<f64> {
        self.pulse_duration
    }

    pub fn pulse_separation(&self) -> Option<f64> {
        self.pulse_separation
    }
}

// every non-empty line becomes a row of parsed floats
fn parse_value_lines(text:&str,path:&Path) -> Result<Vec<Vec<f64>>,TableError> {
    let mut rows = Vec::<Vec<f64>>::new();
    for (idx,line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut row = Vec::<f64>::new();
        for token in line.split_whitespace() {
            let value:f64 = token.parse().map_err(|_| TableError::MalformedValue {
                path:path.to_owned(),
                line:idx + 1,
                token:token.to_string(),
            })?;
            row.push(value);
        }
        rows.push(row);
    }
    Ok(rows)
}
