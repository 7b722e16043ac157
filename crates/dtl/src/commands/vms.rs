//! `dtl vms`: list, show or delete lab virtual machines

use std::io;

use anyhow::{Result, bail};
use dtl_client::lab::{DeleteOutcome, VmSelector};

use super::common::Context;
use crate::output::{OutputFormat, write_results};

pub struct VmsArgs {
    pub lab_name: String,
    pub name: Option<String>,
    pub vm_id: Option<String>,
    pub delete: bool,
    pub output: OutputFormat,
}

impl VmsArgs {
    fn selector(&self) -> Option<VmSelector<'_>> {
        match (&self.name, &self.vm_id) {
            (Some(name), _) => Some(VmSelector::Name(name)),
            (None, Some(id)) => Some(VmSelector::Id(id)),
            (None, None) => None,
        }
    }
}

pub async fn run(ctx: &Context, args: VmsArgs) -> Result<()> {
    let client = ctx.lab_client().await?;

    if args.delete {
        let Some(target) = args.selector() else {
            bail!("Pass --name or --vmid to choose the virtual machine to delete.");
        };
        ctx.printer.info(&format!(
            "Deleting virtual machine {target} from lab {}",
            args.lab_name
        ));
        return match client
            .delete_virtual_machine(&args.lab_name, target, &ctx.cancel)
            .await?
        {
            DeleteOutcome::AlreadyGone => {
                ctx.printer
                    .warning("The virtual machine was already deleted.");
                Ok(())
            }
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::Failed(status) => {
                ctx.printer.dumps(&status)?;
                bail!("Failed to delete the virtual machine.")
            }
        };
    }

    let vms = match args.selector() {
        Some(VmSelector::Name(name)) => client.get_virtual_machine_by_name(name).await?,
        Some(VmSelector::Id(id)) => client.get_virtual_machine(id).await?,
        None => client.get_virtual_machines_for_lab(&args.lab_name).await?,
    };
    if vms.is_empty() {
        bail!("No virtual machines found.");
    }

    write_results(&mut io::stdout().lock(), &vms, args.output)
}
