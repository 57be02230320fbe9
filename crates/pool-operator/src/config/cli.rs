use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::operator::RunArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pool operator
    Run(Box<RunArgs>),
    /// Print the custom resource definitions as YAML
    Crds,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["pool-operator", "crds"]).expect("should parse crds");
        assert!(matches!(cli.command, Commands::Crds));

        let cli = Cli::try_parse_from(["pool-operator", "run", "--workers", "4"])
            .expect("should parse run");
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.workers, 4);
    }
}
