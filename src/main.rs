//! The fs-serve binary.

use std::env::current_dir;
use std::process::exit;
use clap::{Command, crate_authors, crate_version};
use log::error;
use fs_serve::{Config, ExitError, Operation};

// Since `main` with a result currently insists on printing a message, but
// in our case we only get an `ExitError` if all is said and done, we make our
// own, more quiet version.
fn _main() -> Result<(), ExitError> {
    Operation::prepare()?;
    let cur_dir = match current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            error!(
                "Fatal: cannot get current directory ({}). Aborting.",
                err
            );
            return Err(ExitError::Generic);
        }
    };
    let matches = Config::config_args(
        Command::new("fs-serve")
            .version(crate_version!())
            .author(crate_authors!())
            .about("serves a directory via HTTP with server-side includes")
    ).get_matches();
    let config = Config::from_arg_matches(&matches, &cur_dir)?;
    Operation::new(config).run()
}

fn main() {
    match _main() {
        Ok(_) => exit(0),
        Err(ExitError::Generic) => exit(1),
    }
}
