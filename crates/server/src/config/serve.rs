use std::path::PathBuf;

use api_types::PlayerId;
use clap::Args;
use clap::Parser;

use crate::adapters::pipe::PipeFormat;
use crate::adapters::TransportKind;
use crate::arbiter::OvershootPolicy;
use crate::publisher::StatusFormat;

/// Names of the IPC endpoints the server owns.
#[derive(Args, Clone, Debug)]
pub struct EndpointArgs {
    #[arg(
        long,
        env = "BR31_REQUEST_FIFO",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/tmp/br31_server_fifo",
        help = "Path of the FIFO players write move records to"
    )]
    pub request_fifo: PathBuf,

    #[arg(
        long,
        env = "BR31_QUEUE_KEY",
        default_value_t = 60014,
        help = "System V IPC key of the move message queue"
    )]
    pub queue_key: i32,

    #[arg(
        long,
        env = "BR31_BOARD_ID",
        default_value = "br31_board",
        help = "OS identifier of the shared board segment"
    )]
    pub board_id: String,

    #[arg(
        long,
        env = "BR31_SEMAPHORE_PREFIX",
        default_value = "/br31",
        help = "Prefix of the named semaphores, e.g. /br31 gives /br31_server and /br31_p1"
    )]
    pub semaphore_prefix: String,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Players that submit moves through the shared board slot"
    )]
    pub semaphore_players: Vec<PlayerId>,
}

impl EndpointArgs {
    pub fn server_semaphore(&self) -> String {
        format!("{}_server", self.semaphore_prefix)
    }

    pub fn player_semaphore(&self, player_id: PlayerId) -> String {
        format!("{}_p{player_id}", self.semaphore_prefix)
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub endpoints: EndpointArgs,

    #[arg(
        long,
        env = "BR31_LIMIT",
        default_value_t = 31,
        help = "Count at which the game ends; the player who reaches it loses"
    )]
    pub limit: u32,

    #[arg(
        long,
        env = "BR31_MAX_STEP",
        default_value_t = 3,
        help = "Largest amount a single move may add"
    )]
    pub max_step: u32,

    #[arg(
        long,
        value_enum,
        default_value_t = OvershootPolicy::Allow,
        help = "Handling of a move that passes the limit"
    )]
    pub overshoot: OvershootPolicy,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Players registered at startup, in turn order"
    )]
    pub players: Vec<PlayerId>,

    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [TransportKind::Pipe, TransportKind::Semaphore, TransportKind::Queue],
        help = "Transports to listen on"
    )]
    pub transports: Vec<TransportKind>,

    #[arg(
        long,
        value_enum,
        env = "BR31_PIPE_FORMAT",
        default_value_t = PipeFormat::Text,
        help = "Record layout on the request FIFO: text lines or fixed 48 byte binary records"
    )]
    pub pipe_format: PipeFormat,

    #[arg(
        long,
        default_value_t = 200,
        help = "Back-off in milliseconds when the request FIFO has no data"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long,
        default_value_t = 300,
        help = "Interval in milliseconds between status publications"
    )]
    pub publish_interval_ms: u64,

    #[arg(
        long,
        env = "BR31_PACE_MS",
        default_value_t = 0,
        help = "Delay in milliseconds per counted number after a move, 0 to disable"
    )]
    pub pace_ms: u64,

    #[arg(
        long,
        value_enum,
        default_value_t = StatusFormat::Text,
        help = "Encoding of status records sent to reply FIFOs"
    )]
    pub status_format: StatusFormat,

    #[arg(
        long,
        default_value_t = 3,
        help = "Consecutive publications a reply FIFO may go without a reader before its player is dropped"
    )]
    pub disconnect_after: u32,

    #[arg(
        long,
        env = "BR31_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to a daily rotated file at this path"
    )]
    pub log_file: Option<PathBuf>,
}
