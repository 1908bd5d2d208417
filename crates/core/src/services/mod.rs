pub mod analyzer;
pub mod emulator;
pub mod probe;
pub mod process;
pub mod report;
pub mod runner;
pub mod trace;
