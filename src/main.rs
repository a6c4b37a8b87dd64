mod arg_parse;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    env_logger::init();
    let cli = arg_parse::Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &arg_parse::Cli) -> torrust::Result<()> {
    let buf = torrust::download(&cli.torrent_file, &mut |progress| {
        println!("{:.2}% downloaded", progress.percent());
    })?;

    std::fs::write(&cli.output_file, &buf).map_err(torrust::error::EngineError::Output)?;
    Ok(())
}
