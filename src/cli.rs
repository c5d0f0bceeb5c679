/// What the binary was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Scheduler plus health/status endpoints (default).
    Serve,
    /// A single run for today, then exit.
    RunOnce,
    Help,
}

pub fn parse_command<I, S>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    // First item is the program name
    let mut args = args.into_iter().skip(1);
    let command = match args.next() {
        None => Command::Serve,
        Some(arg) => match arg.as_ref() {
            "serve" => Command::Serve,
            "run-once" => Command::RunOnce,
            "help" | "--help" | "-h" => Command::Help,
            other => return Err(format!("Unknown command '{}'", other)),
        },
    };
    if let Some(extra) = args.next() {
        return Err(format!("Unexpected argument '{}'", extra.as_ref()));
    }
    Ok(command)
}

pub fn print_usage() {
    println!("Ethnicity Sync");
    println!();
    println!("USAGE:");
    println!("    ethnicity-sync [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    serve       Start the scheduler and the /health, /status endpoints (default)");
    println!("    run-once    Run the pipeline once for today and exit");
    println!("    help        Print this message");
    println!();
    println!("Configuration is read from the environment and from the crate's .env file.");
}
