use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;

use covmerge::commands::Cli;
use covmerge::commands::Commands;
use covmerge::handlers;
use covmerge::telemetry::init_tracing;
use covmerge::CoverageError;
use covmerge_common::color_init;
use covmerge_common::Colors;
use covmerge_daemon::DaemonError;
use covmerge_exec::ExecError;

fn main() {
    if let Err(e) = run() {
        if let Some(coverage_error) = e.downcast_ref::<CoverageError>() {
            eprintln!("{} {}", Colors::error("Error:"), coverage_error);
            eprintln!(
                "{} {}",
                Colors::dim("Suggestion:"),
                coverage_error.suggestion()
            );
            std::process::exit(coverage_error.exit_code());
        } else if let Some(daemon_error) = e.downcast_ref::<DaemonError>() {
            eprintln!("{} {}", Colors::error("Error:"), daemon_error);
            eprintln!(
                "{} {}",
                Colors::dim("Suggestion:"),
                daemon_error.suggestion()
            );
            if daemon_error.is_retryable() {
                eprintln!(
                    "{}",
                    Colors::dim("(This error may be transient - retry may succeed)")
                );
            }
            std::process::exit(74); // EX_IOERR
        } else if let Some(exec_error) = e.downcast_ref::<ExecError>() {
            eprintln!("{} {}", Colors::error("Error:"), exec_error);
            std::process::exit(65); // EX_DATAERR
        } else {
            eprintln!("{} {}", Colors::error("Error:"), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    color_init(cli.no_color);
    let _telemetry = init_tracing(cli.log_level());

    let format = cli.effective_format();

    match cli.command {
        Commands::Serve(args) => handlers::handle_serve(args, format)?,
        Commands::Inspect { file, merged } => handlers::handle_inspect(file, merged, format)?,
        Commands::Forward(args) => handlers::handle_forward(args, format)?,
        Commands::Env => handlers::handle_env(format)?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "covmerge", &mut std::io::stdout());
        }
    }

    Ok(())
}
