//! On-disk encoding of the data file: the page-sized header and the record log.

pub mod header;
pub mod log;
