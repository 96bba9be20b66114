//! Scriptdesk assistant server binary.
//! Run with: cargo run --bin scriptdesk-server

use std::process::ExitCode;

use scriptdesk_assistant::start_scriptdesk;

fn main() -> ExitCode {
    start_scriptdesk::run()
}
