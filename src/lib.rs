//! Bluetooth Mesh layered PDU stack.
//!
//! The pure layers (opcodes and models, nonces, upper/lower transport, network, proxy filter)
//! don't need an async runtime. [`stack::Stack`] ties them together on top of tokio and is
//! enabled by the `full_stack` feature.
//Might re-enable clippy::restriction later.
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

pub mod random;

pub mod access;
pub mod address;
pub mod bearer;
pub mod bytes;
pub mod config;
pub mod control;
pub mod crypto;
pub mod lower;
pub mod mesh;
pub mod models;
pub mod net;
pub mod proxy;
pub mod reassembler;
pub mod replay;
pub mod segmenter;
pub mod upper;

#[cfg(feature = "full_stack")]
pub mod stack;
