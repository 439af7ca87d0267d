use std::time::Duration;

use crate::arbiter::GameRules;
use crate::publisher::StatusFormat;

pub mod cli;
pub mod serve;

impl From<&serve::ServeArgs> for GameRules {
    fn from(args: &serve::ServeArgs) -> Self {
        Self {
            limit: args.limit,
            max_step: args.max_step,
            overshoot: args.overshoot,
        }
    }
}

/// Timing and publication settings for the coordinator's tasks.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub publish_interval: Duration,
    pub pace: Duration,
    pub status_format: StatusFormat,
    pub disconnect_after: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            publish_interval: Duration::from_millis(300),
            pace: Duration::ZERO,
            status_format: StatusFormat::Text,
            disconnect_after: 3,
        }
    }
}

impl From<&serve::ServeArgs> for CoordinatorConfig {
    fn from(args: &serve::ServeArgs) -> Self {
        Self {
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
            publish_interval: Duration::from_millis(args.publish_interval_ms.max(1)),
            pace: Duration::from_millis(args.pace_ms),
            status_format: args.status_format,
            disconnect_after: args.disconnect_after.max(1),
        }
    }
}

pub use cli::*;
pub use serve::*;

#[cfg(test)]
mod tests {
    use clap::Parser;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::adapters::pipe::PipeFormat;
    use crate::adapters::TransportKind;
    use crate::arbiter::OvershootPolicy;

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["br31-server", "serve"]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(GameRules::from(&*args), GameRules::default());
        assert_eq!(
            args.transports,
            vec![TransportKind::Pipe, TransportKind::Semaphore, TransportKind::Queue]
        );
        assert_eq!(args.endpoints.server_semaphore(), "/br31_server");
        assert_eq!(args.endpoints.player_semaphore(2), "/br31_p2");
        assert_eq!(args.pipe_format, PipeFormat::Text);
        assert_eq!(
            CoordinatorConfig::from(&*args).publish_interval,
            Duration::from_millis(300)
        );
    }

    #[test]
    fn serve_lists_and_policies() {
        let cli = Cli::parse_from([
            "br31-server",
            "serve",
            "--players",
            "1,2",
            "--semaphore-players",
            "3",
            "--transports",
            "pipe,semaphore",
            "--overshoot",
            "clamp",
            "--status-format",
            "json",
            "--limit",
            "21",
            "--pipe-format",
            "binary",
        ]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.players, vec![1, 2]);
        assert_eq!(args.pipe_format, PipeFormat::Binary);
        assert_eq!(args.endpoints.semaphore_players, vec![3]);
        assert_eq!(
            args.transports,
            vec![TransportKind::Pipe, TransportKind::Semaphore]
        );
        assert_eq!(
            GameRules::from(&*args),
            GameRules {
                limit: 21,
                max_step: 3,
                overshoot: OvershootPolicy::Clamp,
            }
        );
        assert_eq!(CoordinatorConfig::from(&*args).status_format, StatusFormat::Json);
    }

    #[test]
    fn direct_transport_is_not_selectable() {
        assert!(Cli::try_parse_from(["br31-server", "serve", "--transports", "direct"]).is_err());
    }
}
