//! Import pipeline for academic course-descriptor XML exports.
//!
//! One XML document per organizational unit is parsed into transient
//! [`extract::Record`] values and loaded into the SQLite catalogue inside a
//! single transaction. See `extract` for the field parsers, `import` for the
//! transactional load and `diag` for the breadcrumb diagnostics attached to
//! every warning.

pub mod db;
pub mod diag;
pub mod extract;
pub mod formula;
pub mod import;
