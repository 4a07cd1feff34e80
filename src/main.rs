//! Chore Tracker desktop shell.

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    chore_tracker::commands::run();
}
