//! Coverage services: build lifecycle, aggregation, and project rollup.

pub mod build_service;
pub mod cascade;
pub mod coverage_service;
pub mod job_service;
pub mod pipeline;
pub mod project_service;
