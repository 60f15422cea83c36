//! Behaviour suites for the lifecycle controller and the PID lock.

mod support;
