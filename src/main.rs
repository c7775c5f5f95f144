use std::process::ExitCode;
use tinysh::Interpreter;
use tinysh::config::{Cli, ShellConfig};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli: Cli = argh::from_env();
    log::debug!("command line parsed: {cli:?}");

    let mut shell = Interpreter::new(ShellConfig::from(cli));
    match shell.run() {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(err) => {
            eprintln!("tinysh: {err:#}");
            ExitCode::FAILURE
        }
    }
}
