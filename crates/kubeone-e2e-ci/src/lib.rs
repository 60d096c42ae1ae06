//! KubeOne E2E CI - Prow job generation
//!
//! Turns e2e test cases into Prow presubmit jobs:
//! - [`job`]: a single job descriptor and the naming rules
//! - [`matrix`]: a list of test cases rendered as a `presubmits` document

pub mod job;
pub mod matrix;

pub use job::{new_prow_job, pull_prow_job_name, titleize, ProwConfig, ProwJob};
pub use matrix::{JobEntry, JobMatrix};
