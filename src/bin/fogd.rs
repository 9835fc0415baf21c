use fog::app::command_handlers::daemon;
use fog::shared::init_logging;

fn run() -> Result<(), String> {
    init_logging("info");
    let args: Vec<String> = std::env::args().skip(1).collect();
    let output = daemon::run_daemon_cli(args)?;
    println!("{output}");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
