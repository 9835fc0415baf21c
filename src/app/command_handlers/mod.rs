use crate::app::cli::{ConfigCommand, FogCli, FogCommand, ReposCommand};
use clap::error::ErrorKind as ClapErrorKind;
use clap::Parser;

pub mod config;
pub mod daemon;
pub mod repos;
pub mod setup;
pub mod tasks;

/// Parses `args` (without the program name) and runs the command. Help and
/// version output come back as `Ok`; usage errors as `Err`.
pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let cli = match FogCli::try_parse_from(std::iter::once("fog".to_string()).chain(args)) {
        Ok(cli) => cli,
        Err(err) => {
            return match err.kind() {
                ClapErrorKind::DisplayHelp
                | ClapErrorKind::DisplayVersion
                | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                    Ok(err.render().to_string().trim_end().to_string())
                }
                _ => Err(err.render().to_string().trim_end().to_string()),
            };
        }
    };

    match cli.command {
        FogCommand::Setup(args) => setup::cmd_setup(&args),
        FogCommand::Config(ConfigCommand::View { json }) => config::cmd_config_view(json),
        FogCommand::Config(ConfigCommand::Set(args)) => config::cmd_config_set(&args),
        FogCommand::Repos(ReposCommand::Discover { json }) => repos::cmd_discover(json),
        FogCommand::Repos(ReposCommand::Import { select }) => {
            repos::cmd_import(select.as_deref())
        }
        FogCommand::Repos(ReposCommand::List) => repos::cmd_list(),
        FogCommand::Run(args) => tasks::cmd_run(&args),
        FogCommand::List(args) => tasks::cmd_list(&args),
        FogCommand::Status(args) => tasks::cmd_status(&args),
        FogCommand::Version => Ok(format!("fog {}", env!("CARGO_PKG_VERSION"))),
        FogCommand::Execute(args) => tasks::cmd_execute(&args.task_id),
    }
}
