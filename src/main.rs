use std::process::ExitCode;

fn main() -> ExitCode {
    match datalad_release::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
