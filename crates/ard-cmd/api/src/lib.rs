//! Vocabulary shared between the command recording engine and the collaborators it sits on:
//! the winsys (buffer allocation and instruction stream references), the surface layout module
//! (metadata placement) and the pipeline compiler (register tables and need-sets).
//!
//! Nothing in here records commands. See the `ard-cmd` crate for that.

pub mod access;
pub mod dynamic;
pub mod layout;
pub mod pipeline;
pub mod surface;
pub mod types;
pub mod winsys;

pub use winsys::Winsys;
