//! Capabilities that live outside the crate.
//!
//! The browser engine and the OCR engine are opaque; this module defines the
//! narrow contracts the strategies drive them through, plus small bundled
//! implementations.

pub mod browser;
pub mod captcha;
