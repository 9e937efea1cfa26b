//! IR data model for the `spvmsl` SPIR-V to Metal Shading Language
//! cross-compiler core: types, variables, constants, expressions, blocks,
//! functions and decorations, all owned by a [`module::Module`].
//!
//! This crate does not parse SPIR-V binaries or validate them; it is the
//! representation a front end hands to `spvmsl::compile`.

pub mod block;
pub mod constant;
pub mod decoration;
pub mod error;
pub mod expr;
pub mod func;
pub mod id;
pub mod locator;
pub mod module;
pub mod ty;
pub mod var;

pub use error::{Error, Result};
pub use module::Module;
