//! `dtl vmtemplate`: list a lab's VM templates

use std::io;

use anyhow::{Result, bail};

use super::common::Context;
use crate::output::{OutputFormat, write_results};

pub async fn run(
    ctx: &Context,
    lab_name: String,
    name: Option<String>,
    output: OutputFormat,
) -> Result<()> {
    let client = ctx.lab_client().await?;
    let templates = client
        .get_virtual_machine_templates(&lab_name, name.as_deref())
        .await?;
    if templates.is_empty() {
        bail!("No virtual machine templates found.");
    }

    write_results(&mut io::stdout().lock(), &templates, output)
}
