//! Binary entrypoint that launches the assistant server.

use std::process::ExitCode;

use scriptdesk_assistant::start_scriptdesk;

/// Start the assistant server with configuration from the environment.
fn main() -> ExitCode {
    start_scriptdesk::run()
}
