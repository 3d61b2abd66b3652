//! Core building blocks: configuration, errors, fingerprints and the
//! collaborators that produce them.

pub mod config;
pub mod control;
pub mod error;
pub mod fingerprint;
pub mod hasher;
pub mod source;
pub mod storage;
