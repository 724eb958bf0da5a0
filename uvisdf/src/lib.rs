// src/lib.rs
pub mod data {
    pub mod observation;
    pub mod utility;
}

pub mod config;
pub mod diagnostics;
pub mod stage;
