//! Binary entry point for `fstxn`.

use std::process;

fn main() {
    match fstxn::run() {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
