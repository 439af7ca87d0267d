use clap::Parser;
use clap::Subcommand;

use crate::config::serve::EndpointArgs;
use crate::config::serve::ServeArgs;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the game server until the game ends or a shutdown signal arrives
    Serve(Box<ServeArgs>),
    /// Remove endpoints left behind by an unclean shutdown
    Clean(EndpointArgs),
}
