use std::path::PathBuf;

use clap::Parser;

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Enables more detailed log output
    #[arg(
        long,
        env = "GWMS_FRONTEND_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::FRONTEND_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Start the frontend and supervise all configured groups
    Run(RunOpts),
    /// Remove requests of this frontend from a factory directory
    Deadvertise(DeadvertiseOpts),
}

#[derive(Parser)]
pub struct RunOpts {
    /// Path to the frontend configuration file
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,
}

#[derive(Parser)]
pub struct DeadvertiseOpts {
    /// Path to the frontend configuration file
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Client name under which the requests were published
    #[arg(long)]
    pub client_name: String,

    /// Remove only the request with this name
    ///
    /// If not given, every request published under the client name is removed.
    #[arg(long)]
    pub request: Option<String>,

    /// Directory pool to talk to (overrides the configured collector)
    #[arg(long)]
    pub pool: Option<String>,
}
