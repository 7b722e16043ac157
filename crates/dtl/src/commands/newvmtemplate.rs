//! `dtl newvmtemplate`: capture a lab VM as a reusable VM template

use std::path::PathBuf;

use anyhow::Result;
use dtl_client::lab::{NewVmTemplate, validate_template_name};
use dtl_core::resource_id::resource_name;

use super::common::{Context, VM_TEMPLATE_VARIANT, load_template};
use super::newvm::ensure_succeeded;

pub struct NewVmTemplateArgs {
    pub lab_name: String,
    pub vm_id: String,
    pub template_name: String,
    pub description: String,
    pub arm_template: Option<PathBuf>,
}

pub async fn run(ctx: &Context, args: NewVmTemplateArgs) -> Result<()> {
    // Reject a bad name before signing in.
    validate_template_name(&args.template_name)?;

    let template_path = ctx.template_path(args.arm_template, VM_TEMPLATE_VARIANT);
    ctx.printer
        .verbose(&format!("Using ARM template {}", template_path.display()));
    let arm_template = load_template(&template_path)?;

    let template = NewVmTemplate {
        lab_name: args.lab_name,
        vm_id: args.vm_id,
        template_name: args.template_name,
        description: args.description,
    };

    let client = ctx.lab_client().await?;
    ctx.printer.info(&format!(
        "Creating VM template {} from virtual machine {}",
        template.template_name,
        resource_name(&template.vm_id, "virtualmachines").unwrap_or(&template.vm_id)
    ));
    let result = client
        .create_vm_template(&template, arm_template, &ctx.cancel)
        .await?;
    ensure_succeeded(&result)?;

    ctx.printer.dumpp(&result.outputs);
    Ok(())
}
