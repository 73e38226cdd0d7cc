use brewbeacon::app::{Command, Options, RunError};
use clap::Parser;
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[cfg(feature = "bluer")]
async fn run(options: Options) -> Result<(), RunError> {
    use brewbeacon::scanner::bluer::{BluerAdvertiser, BluerRadio};

    match options.command {
        Command::Gateway(args) => {
            let radio = BluerRadio::new().await?;
            let mut stdout = std::io::stdout();
            brewbeacon::app::run_with_io(args, Box::new(radio), &mut stdout).await
        }
        Command::Emit(args) => {
            let advertiser = BluerAdvertiser::new().await?;
            brewbeacon::app::run_emit(args, advertiser).await.map(|_| ())
        }
    }
}

#[cfg(not(feature = "bluer"))]
async fn run(options: Options) -> Result<(), RunError> {
    let what = match options.command {
        Command::Gateway(_) => "gateway",
        Command::Emit(_) => "emit",
    };
    Err(brewbeacon::RadioError::Bluetooth(format!(
        "{what} needs Bluetooth support; rebuild with the `bluer` feature"
    ))
    .into())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if options.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_timestamp_secs()
        .init();

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            log::error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
