#![deny(unused_must_use)]

pub mod error;
pub mod geometry;
pub mod index;
pub mod persistence;
pub mod pipeline;
pub mod pointfile;
pub mod tileset;

pub mod input;

pub use nalgebra;
