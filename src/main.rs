use case_portal::{
    api_client::Endpoints,
    client::{
        self,
        AppConfig,
        AppController,
    },
    roulette,
    session,
    types::AuthAction,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tracing::info;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

struct CliArgs {
    config: AppConfig,
    log_dir: PathBuf,
    auth: Option<(AuthAction, String)>,
    logout: bool,
}

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: case-portal [--session-dir <path>] [--endpoints <file.json>] [--market-url <url>]\n\
         [--reveal-delay-ms <ms>] [--log-dir <path>]\n\
         [--login <username> | --register <username> | --logout]\n\
         \n\
         Flags:\n\
           --session-dir <path>    Where the signed-in user is kept (default {})\n\
           --endpoints <file>      JSON file overriding any of the storefront endpoint URLs\n\
           --market-url <url>      Marketplace endpoint (required by the market tab)\n\
           --reveal-delay-ms <ms>  Length of the roulette spin, {}-{} ms (default {})\n\
           --log-dir <path>        Log directory (default <session-dir>/logs)\n\
           --login <username>      Sign in before the UI starts (password is prompted)\n\
           --register <username>   Create an account before the UI starts (password is prompted)\n\
           --logout                Forget the saved session and exit",
        session::DEFAULT_SESSION_DIR,
        roulette::MIN_REVEAL_DELAY.as_millis(),
        roulette::MAX_REVEAL_DELAY.as_millis(),
        roulette::DEFAULT_REVEAL_DELAY.as_millis(),
    );
    std::process::exit(0);
}

fn parse_cli_args() -> Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut session_dir: Option<String> = None;
    let mut endpoints_file: Option<String> = None;
    let mut market_url: Option<String> = None;
    let mut reveal_delay = roulette::DEFAULT_REVEAL_DELAY;
    let mut log_dir: Option<String> = None;
    let mut auth: Option<(AuthAction, String)> = None;
    let mut logout = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--session-dir requires a path argument"))?;
                if session_dir.is_some() {
                    return Err(eyre!("--session-dir may only be specified once"));
                }
                session_dir = Some(dir);
            }
            "--endpoints" => {
                let file = args
                    .next()
                    .ok_or_else(|| eyre!("--endpoints requires a file argument"))?;
                if endpoints_file.is_some() {
                    return Err(eyre!("--endpoints may only be specified once"));
                }
                endpoints_file = Some(file);
            }
            "--market-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--market-url requires a URL argument"))?;
                if market_url.is_some() {
                    return Err(eyre!("--market-url may only be specified once"));
                }
                market_url = Some(url);
            }
            "--reveal-delay-ms" => {
                let raw = args
                    .next()
                    .ok_or_else(|| eyre!("--reveal-delay-ms requires a number"))?;
                let ms: u64 = raw
                    .parse()
                    .wrap_err_with(|| format!("Invalid --reveal-delay-ms value: {raw}"))?;
                reveal_delay = Duration::from_millis(ms);
                if !(roulette::MIN_REVEAL_DELAY..=roulette::MAX_REVEAL_DELAY)
                    .contains(&reveal_delay)
                {
                    return Err(eyre!(
                        "--reveal-delay-ms must be between {} and {}",
                        roulette::MIN_REVEAL_DELAY.as_millis(),
                        roulette::MAX_REVEAL_DELAY.as_millis()
                    ));
                }
            }
            "--log-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--log-dir requires a path argument"))?;
                log_dir = Some(dir);
            }
            "--login" | "--register" => {
                let username = args
                    .next()
                    .ok_or_else(|| eyre!("{arg} requires a username"))?;
                if auth.is_some() {
                    return Err(eyre!("Choose one of --login/--register"));
                }
                let action = if arg == "--login" {
                    AuthAction::Login
                } else {
                    AuthAction::Register
                };
                auth = Some((action, username));
            }
            "--logout" => logout = true,
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    if logout && auth.is_some() {
        return Err(eyre!("--logout cannot be combined with --login/--register"));
    }

    let mut endpoints = match endpoints_file {
        Some(file) => {
            let path = shellexpand::tilde(&file).into_owned();
            Endpoints::from_file(Path::new(&path))?
        }
        None => Endpoints::default(),
    };
    if market_url.is_some() {
        endpoints.market = market_url;
    }

    let session_dir = session::resolve_session_dir(session_dir.as_deref());
    let log_dir = match log_dir {
        Some(dir) => PathBuf::from(shellexpand::tilde(&dir).into_owned()),
        None => session_dir.join("logs"),
    };

    Ok(CliArgs {
        config: AppConfig {
            endpoints,
            session_dir,
            reveal_delay,
        },
        log_dir,
        auth,
        logout,
    })
}

/// Logs go to a daily file; the terminal belongs to the UI.
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, "case-portal.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {e}"))?;
    Ok(guard)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = parse_cli_args()?;
    let _log_guard = init_tracing(&args.log_dir)?;
    info!("starting case-portal client");

    let mut controller = AppController::from_config(&args.config)?;
    controller
        .rehydrate()
        .wrap_err("Failed to restore saved session")?;

    if args.logout {
        controller.logout().wrap_err("Sign out failed")?;
        println!("Signed out.");
        return Ok(());
    }

    if let Some((action, username)) = args.auth {
        let password = rpassword::prompt_password(format!("Password for {username}: "))
            .wrap_err("Failed to read password")?;
        controller
            .authenticate(action, &username, &password)
            .await
            .wrap_err_with(|| format!("Could not {action} as {username}"))?;
    }

    client::run_app(controller).await
}
