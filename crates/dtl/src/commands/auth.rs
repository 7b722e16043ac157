//! `dtl auth`: sign in and print the access token

use anyhow::Result;

use super::common::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    ctx.printer.verbose("Acquiring access token");
    let token = ctx.access_token().await?;
    println!("{token}");
    Ok(())
}
