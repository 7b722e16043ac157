//! `dtl labs`: list the labs in a subscription

use std::io;

use anyhow::{Context as _, Result};

use super::common::Context;
use crate::output::{OutputFormat, write_results};

pub async fn run(ctx: &Context, lab_name: Option<String>, output: OutputFormat) -> Result<()> {
    let client = ctx.lab_client().await?;

    let labs = match lab_name {
        Some(name) => {
            ctx.printer.verbose(&format!("Looking up lab {name}"));
            let lab = client
                .get_lab_by_name(&name)
                .await?
                .with_context(|| format!("Lab {name} does not exist or is not accessible."))?;
            vec![lab]
        }
        None => {
            ctx.printer.verbose(&format!(
                "Listing labs in subscription {}",
                client.subscription_id()
            ));
            client.list_labs().await?
        }
    };

    write_results(&mut io::stdout().lock(), &labs, output)
}
