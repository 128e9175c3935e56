//! Shared window storage between the assembler and its readers.
pub mod ring_buffer;
