//! Coverage data models.

pub mod build;
pub mod job;
pub mod payload;
pub mod project;
