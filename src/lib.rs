//! Library for `fab`.
//!
//! This library is not intended to be used directly and is unsupported in
//! that configuration. It's only a library to enable sharing code between
//! `fab`'s binary and its integration tests.

pub mod context;
pub mod controller;
pub mod error;
pub mod gate;
pub mod hash;
pub mod hashdb;
pub mod registry;
pub mod target;
pub mod yaml;
