pub mod units;
pub mod shells;
pub mod scheme;
pub mod scheme_file;

pub use scheme::AcquisitionScheme;
