use std::path::PathBuf;

use tavern_gallery::app::Options;

const HELP: &str = "Tavern Gallery: browse a character's media gallery from the terminal.

  --character NAME     Character whose gallery to open
  --server URL         Host base URL (default http://127.0.0.1:8000)
  --config PATH        Config file to read and save preferences to
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

fn main() {
    let opts = match parse_args(std::env::args().skip(1)) {
        Ok(Some(opts)) => opts,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = tavern_gallery::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// `Ok(None)` when an informational flag was handled and the program should
/// exit.
fn parse_args(args: impl Iterator<Item = String>) -> Result<Option<Options>, String> {
    let mut opts = Options::default();
    let mut saw_info = false;
    let mut args = args;
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        match flag.as_str() {
            "--version" | "-V" => {
                println!("Tavern Gallery {}", tavern_gallery::VERSION);
                saw_info = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_info = true;
            }
            "--character" | "--server" | "--config" => {
                let value = match inline {
                    Some(value) => value,
                    None => args
                        .next()
                        .ok_or_else(|| format!("{flag} needs a value"))?,
                };
                match flag.as_str() {
                    "--character" => opts.character = Some(value),
                    "--server" => opts.server = Some(value),
                    _ => opts.config_file = Some(PathBuf::from(value)),
                }
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }
    if saw_info {
        Ok(None)
    } else {
        Ok(Some(opts))
    }
}
