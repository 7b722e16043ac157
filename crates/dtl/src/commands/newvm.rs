//! `dtl newvm`: create a lab virtual machine from a VM template

use std::path::PathBuf;

use anyhow::{Result, bail};
use dtl_client::deployment::DeploymentResult;
use dtl_client::lab::NewVm;
use serde_json::Value;

use super::common::{Context, load_template};

pub struct NewVmArgs {
    pub lab_name: String,
    pub name: String,
    pub template_name: String,
    pub size: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub arm_template: Option<PathBuf>,
}

impl From<NewVmArgs> for NewVm {
    fn from(args: NewVmArgs) -> Self {
        Self {
            lab_name: args.lab_name,
            vm_name: args.name,
            template_name: args.template_name,
            size: args.size,
            user_name: args.username,
            password: args.password,
            ssh_key: args.ssh_key,
        }
    }
}

pub async fn run(ctx: &Context, mut args: NewVmArgs) -> Result<()> {
    let explicit_template = args.arm_template.take();
    let vm = NewVm::from(args);

    let template_path = ctx.template_path(explicit_template, vm.arm_template_variant());
    ctx.printer
        .verbose(&format!("Using ARM template {}", template_path.display()));
    let arm_template = load_template(&template_path)?;

    let client = ctx.lab_client().await?;
    ctx.printer.info(&format!(
        "Creating virtual machine {} in lab {} from template {}",
        vm.vm_name, vm.lab_name, vm.template_name
    ));
    let result = client.create_vm(&vm, arm_template, &ctx.cancel).await?;
    ensure_succeeded(&result)?;

    ctx.printer.dumpp(&result.outputs);
    if let Some(vm_id) = result.output_value("vmId").and_then(Value::as_str) {
        let vms = client.get_virtual_machine(vm_id).await?;
        ctx.printer.dumps(&vms)?;
    }
    Ok(())
}

/// Turn a terminal deployment failure into an error.
pub fn ensure_succeeded(result: &DeploymentResult) -> Result<()> {
    if result.is_success() {
        return Ok(());
    }
    match &result.failure_message {
        Some(message) => bail!("Deployment {} {}: {message}", result.name, result.state),
        None => bail!("Deployment {} {}", result.name, result.state),
    }
}
