pub mod options;
pub mod sos;
