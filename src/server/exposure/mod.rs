//! API exposure
//!
//! An exposure consumes a `ServerHost` and produces the router serving it.

pub mod rest;

pub use rest::RestExposure;
