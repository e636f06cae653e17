use rsym::cli::{self, Outcome, Options};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("rsym: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match cli::run(&options) {
        Ok(Outcome::Written) | Ok(Outcome::IgnoredElf) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rsym: {}", err);
            ExitCode::FAILURE
        }
    }
}
