use crate::config::SlackMode;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "fog",
    version,
    about = "Run AI coding tools against isolated git worktrees"
)]
pub struct FogCli {
    #[command(subcommand)]
    pub command: FogCommand,
}

#[derive(Debug, Subcommand)]
pub enum FogCommand {
    /// Store the GitHub token and pick the default AI tool
    Setup(SetupArgs),
    /// View or change stored settings
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Discover, import and list repositories
    #[command(subcommand)]
    Repos(ReposCommand),
    /// Create a task and run it
    Run(RunArgs),
    /// List tasks, newest first
    List(ListArgs),
    /// Show one task and its event log
    Status(StatusArgs),
    /// Print the version
    Version,
    #[command(name = "__execute", hide = true)]
    Execute(ExecuteArgs),
}

#[derive(Debug, Args)]
pub struct SetupArgs {
    /// GitHub personal access token, stored encrypted
    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub default_tool: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    View {
        #[arg(long)]
        json: bool,
    },
    Set(ConfigSetArgs),
}

#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    #[arg(long)]
    pub default_tool: Option<String>,
    #[arg(long)]
    pub branch_prefix: Option<String>,
    #[arg(long)]
    pub cloud_url: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ReposCommand {
    Discover {
        #[arg(long)]
        json: bool,
    },
    Import {
        /// Comma-separated `owner/name` values or 1-based discovery indexes
        #[arg(long)]
        select: Option<String>,
    },
    List,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long)]
    pub branch: String,
    #[arg(long)]
    pub prompt: String,
    #[arg(long)]
    pub tool: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    /// `owner/name`; defaults to the repo containing the current directory
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub commit: bool,
    #[arg(long)]
    pub pr: bool,
    #[arg(long)]
    pub validate: bool,
    #[arg(long)]
    pub base: Option<String>,
    #[arg(long)]
    pub setup_cmd: Option<String>,
    #[arg(long)]
    pub validate_cmd: Option<String>,
    #[arg(long)]
    pub commit_msg: Option<String>,
    #[arg(long)]
    pub pr_title: Option<String>,
    /// Return once the task is recorded; it runs in a detached process
    #[arg(long = "async")]
    pub async_mode: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Full task id or a unique prefix
    pub task_id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    pub task_id: String,
}

#[derive(Debug, Parser)]
#[command(
    name = "fogd",
    version,
    about = "Fog daemon: HTTP task API and Slack ingress"
)]
pub struct DaemonArgs {
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long)]
    pub enable_slack: bool,
    #[arg(long)]
    pub slack_mode: Option<SlackMode>,
    #[arg(long)]
    pub slack_secret: Option<String>,
    #[arg(long)]
    pub slack_bot_token: Option<String>,
    #[arg(long)]
    pub slack_app_token: Option<String>,
    #[arg(long)]
    pub cloud_url: Option<String>,
    /// Seconds between cloud relay polls
    #[arg(long)]
    pub cloud_poll_interval: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = FogCli::try_parse_from([
            "fog",
            "run",
            "--branch",
            "feature-otp",
            "--prompt",
            "Add OTP",
            "--commit",
            "--async",
        ])
        .expect("parse");
        match cli.command {
            FogCommand::Run(args) => {
                assert_eq!(args.branch, "feature-otp");
                assert!(args.commit);
                assert!(args.async_mode);
                assert!(!args.pr);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_requires_branch_and_prompt() {
        assert!(FogCli::try_parse_from(["fog", "run", "--prompt", "x"]).is_err());
    }

    #[test]
    fn daemon_flags_parse_slack_mode() {
        let args = DaemonArgs::try_parse_from([
            "fogd",
            "--port",
            "9090",
            "--enable-slack",
            "--slack-mode",
            "http",
            "--slack-secret",
            "s",
        ])
        .expect("parse");
        assert_eq!(args.port, Some(9090));
        assert_eq!(args.slack_mode, Some(SlackMode::Http));
        assert!(DaemonArgs::try_parse_from(["fogd", "--slack-mode", "carrier-pigeon"]).is_err());
    }

    #[test]
    fn execute_verb_is_hidden() {
        use clap::CommandFactory;
        let help = FogCli::command().render_help().to_string();
        assert!(!help.contains("__execute"));
        assert!(help.contains("repos"));
    }
}
