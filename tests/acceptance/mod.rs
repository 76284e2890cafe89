//! End-to-end scenarios against a fully wired testbench.
//!
//! Each test starts its own server on an ephemeral port with fast tick
//! periods so sessions complete in well under a second.

mod common;
mod keepalive_test;
mod session_test;
