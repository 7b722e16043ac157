//! CLI argument definitions using clap

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use dtl_core::config::{Config, Overrides};
use tokio_util::sync::CancellationToken;

use crate::commands::common::Context;
use crate::output::{OutputFormat, Printer};

/// A CLI to manage Azure DevTest Labs labs and virtual machines
#[derive(Parser)]
#[command(name = "dtl")]
#[command(author, version, about)]
#[command(long_about = "A CLI to manage Azure DevTest Labs.\n\n\
    List labs, create and delete lab virtual machines, and capture VM templates\n\
    straight from the command line.")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Azure AD application (client) ID
    #[arg(short = 'c', long, env = "DTL_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    /// Client secret for the application
    #[arg(short = 'S', long, env = "DTL_CLIENT_SECRET", global = true, hide_env_values = true)]
    pub secret: Option<String>,

    /// Azure AD tenant, e.g. contoso.onmicrosoft.com
    #[arg(short = 't', long, env = "DTL_TENANT", global = true)]
    pub tenant: Option<String>,

    /// Azure subscription ID
    #[arg(short = 's', long, env = "DTL_SUBSCRIPTION", global = true)]
    pub subscription: Option<String>,

    /// Sign in interactively with a device code even when a secret is configured
    #[arg(long, global = true)]
    pub device_code: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Acquire an access token and print it
    Auth,

    /// List labs, or show a single lab
    Labs {
        /// The name of the lab
        #[arg(short, long = "lab")]
        lab_name: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Create a lab virtual machine
    Newvm {
        /// The name of the lab
        #[arg(short, long = "lab")]
        lab_name: String,

        /// The name of the new virtual machine
        #[arg(short, long)]
        name: String,

        /// The name of the base image template to use
        #[arg(long)]
        template_name: String,

        /// The size of the new virtual machine
        #[arg(long, default_value = "Standard_A1")]
        size: String,

        /// Administrator user name of the new virtual machine
        #[arg(long)]
        username: Option<String>,

        /// Administrator password of the new virtual machine
        #[arg(long)]
        password: Option<String>,

        /// SSH public key for the administrator account
        #[arg(long)]
        ssh_key: Option<String>,

        /// ARM template to deploy instead of the built-in selection
        #[arg(long)]
        arm_template: Option<PathBuf>,
    },

    /// Capture an existing lab virtual machine as a VM template
    Newvmtemplate {
        /// The name of the lab
        #[arg(short, long = "lab")]
        lab_name: String,

        /// The resource ID of the virtual machine to capture
        #[arg(long)]
        vmid: String,

        /// The name of the template to create
        #[arg(long)]
        template_name: String,

        /// The description of the new template
        #[arg(short, long, default_value = "")]
        desc: String,

        /// ARM template to deploy instead of the built-in one
        #[arg(long)]
        arm_template: Option<PathBuf>,
    },

    /// List, show or delete virtual machines in a lab
    #[command(group(clap::ArgGroup::new("target").args(["name", "vmid"])))]
    Vms {
        /// The name of the lab
        #[arg(short, long = "lab")]
        lab_name: String,

        /// The name of the virtual machine
        #[arg(short, long)]
        name: Option<String>,

        /// The resource ID of the virtual machine
        #[arg(long)]
        vmid: Option<String>,

        /// Delete the selected virtual machine
        #[arg(long, requires = "target")]
        delete: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// List virtual machine templates in a lab
    Vmtemplate {
        /// The name of the lab
        #[arg(short, long = "lab")]
        lab_name: String,

        /// The name of the virtual machine template
        #[arg(short, long)]
        name: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Clone, clap::ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl Cli {
    pub fn printer(&self) -> Printer {
        Printer::new(self.quiet, self.verbose > 0)
    }

    pub async fn run(self) -> Result<()> {
        let printer = self.printer();
        let Some(command) = self.command else {
            // Show help when no subcommand is given
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            println!();
            return Ok(());
        };

        match command {
            Commands::Completion { shell } => {
                crate::commands::completion::generate_completions(shell);
                return Ok(());
            }
            Commands::Version => {
                crate::banner::print_banner_with_version();
                return Ok(());
            }
            _ => {}
        }

        let config = Config::load_or_default()?.merge(Overrides {
            client_id: self.client_id,
            secret: self.secret,
            tenant: self.tenant,
            subscription: self.subscription,
        });

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let ctx = Context::new(config, printer, self.device_code, cancel);

        until_cancelled(&ctx.cancel, dispatch(&ctx, command)).await?;
        ctx.printer.success("Action completed successfully");
        Ok(())
    }
}

/// Run `command`, giving up as soon as `cancel` fires.
async fn until_cancelled(
    cancel: &CancellationToken,
    command: impl Future<Output = Result<()>>,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => bail!("Operation cancelled."),
        result = command => result,
    }
}

async fn dispatch(ctx: &Context, command: Commands) -> Result<()> {
    use crate::commands::*;
    match command {
        Commands::Auth => auth::run(ctx).await?,
        Commands::Labs { lab_name, output } => labs::run(ctx, lab_name, output).await?,
        Commands::Newvm {
            lab_name,
            name,
            template_name,
            size,
            username,
            password,
            ssh_key,
            arm_template,
        } => {
            newvm::run(
                ctx,
                newvm::NewVmArgs {
                    lab_name,
                    name,
                    template_name,
                    size,
                    username,
                    password,
                    ssh_key,
                    arm_template,
                },
            )
            .await?
        }
        Commands::Newvmtemplate {
            lab_name,
            vmid,
            template_name,
            desc,
            arm_template,
        } => {
            newvmtemplate::run(
                ctx,
                newvmtemplate::NewVmTemplateArgs {
                    lab_name,
                    vm_id: vmid,
                    template_name,
                    description: desc,
                    arm_template,
                },
            )
            .await?
        }
        Commands::Vms {
            lab_name,
            name,
            vmid,
            delete,
            output,
        } => {
            vms::run(
                ctx,
                vms::VmsArgs {
                    lab_name,
                    name,
                    vm_id: vmid,
                    delete,
                    output,
                },
            )
            .await?
        }
        Commands::Vmtemplate {
            lab_name,
            name,
            output,
        } => vmtemplate::run(ctx, lab_name, name, output).await?,
        Commands::Completion { .. } | Commands::Version => unreachable!("handled above"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[tokio::test]
    async fn test_cancel_stops_a_running_command() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = until_cancelled(&cancel, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Operation cancelled.");
    }

    #[tokio::test]
    async fn test_command_result_passes_through() {
        let cancel = CancellationToken::new();
        until_cancelled(&cancel, async { Ok(()) }).await.unwrap();
        let err = until_cancelled(&cancel, async { bail!("lab not found") })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "lab not found");
    }

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_newvm() {
        let cli = Cli::try_parse_from([
            "dtl",
            "-s",
            "sub-1",
            "newvm",
            "-l",
            "MyLab",
            "-n",
            "vm1",
            "--template-name",
            "Ubuntu",
            "--password",
            "pw",
        ])
        .unwrap();
        assert_eq!(cli.subscription.as_deref(), Some("sub-1"));
        match cli.command {
            Some(Commands::Newvm {
                lab_name,
                size,
                password,
                ..
            }) => {
                assert_eq!(lab_name, "MyLab");
                assert_eq!(size, "Standard_A1");
                assert_eq!(password.as_deref(), Some("pw"));
            }
            _ => panic!("expected newvm"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["dtl", "labs", "-vv", "--device-code", "-o", "table"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.device_code);
        assert!(matches!(
            cli.command,
            Some(Commands::Labs {
                output: OutputFormat::Table,
                ..
            })
        ));
    }

    #[test]
    fn test_delete_requires_a_target() {
        assert!(Cli::try_parse_from(["dtl", "vms", "-l", "MyLab", "--delete"]).is_err());
        assert!(Cli::try_parse_from(["dtl", "vms", "-l", "MyLab", "--delete", "-n", "vm1"]).is_ok());
    }
}
