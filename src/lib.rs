// Task scheduling core for hub control programs
//
// Motor moves, console polling and background logging all run as tasks
// on one cooperative polling loop (see `kernel`).

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod bglog;
pub mod kernel;
