pub mod axis;
pub mod clock;
pub mod commands;
pub mod config;
pub mod console;
pub mod controllers;
pub mod diagnostics;
pub mod halt;
pub mod logging;
pub mod monitor;
pub mod print_timer;
pub mod watchdog;
