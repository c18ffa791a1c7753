//! Test suites for the cluster supervisor.

pub(crate) mod support;
