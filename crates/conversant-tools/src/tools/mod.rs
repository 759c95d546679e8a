//! Built-in tools, one per module.

pub mod bash;
pub mod editor;
pub mod finish;
pub mod glob;
pub mod grep;
pub mod think;
