use std::process::ExitCode;

fn main() -> ExitCode {
    shopclerk_cli::run()
}
