//! Asynchronous FHIR operations.

pub mod bulk;
