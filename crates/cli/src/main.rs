use std::process::ExitCode;

fn main() -> ExitCode {
    leadline_cli::run()
}
