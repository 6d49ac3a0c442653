use std::process::ExitCode;

fn main() -> ExitCode {
    forecourt_cli::run()
}
