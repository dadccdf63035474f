//! Core value types

mod envelope;

pub use envelope::Envelope;
