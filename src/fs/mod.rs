//! Local filesystem module

pub mod local;
