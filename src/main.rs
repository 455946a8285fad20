use std::io;
use std::path::PathBuf;

use clap::Parser as ClapParser;

use treelox::driver::{Driver, RunError};

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Script to execute; omit to start the REPL
    scripts: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Cli = Cli::parse();

    match args.scripts.as_slice() {
        [] => {
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            let mut stderr = io::stderr();

            let mut driver = Driver::new(&mut stdout);

            driver.run_prompt(stdin.lock(), &mut stderr)?;
        }

        [script] => {
            let mut stdout = io::stdout();

            let mut driver = Driver::new(&mut stdout);

            if let Err(e) = driver.run_file(script) {
                e.report(&mut io::stderr());

                drop(driver);

                match e {
                    RunError::Static(_) => std::process::exit(65),
                    RunError::Runtime(_) => std::process::exit(70),
                }
            }
        }

        _ => {
            println!("Usage: treelox [script]");
        }
    }

    Ok(())
}
