//! ASCII art banner shown by `dtl version`

use colored::Colorize;

const LOGO: &str = r#"
 ██████╗ ████████╗██╗
 ██╔══██╗╚══██╔══╝██║
 ██║  ██║   ██║   ██║
 ██║  ██║   ██║   ██║
 ██████╔╝   ██║   ███████╗
 ╚═════╝    ╚═╝   ╚══════╝"#;

/// Print the banner with version info
pub fn print_banner_with_version() {
    for line in LOGO.lines() {
        println!("{}", line.bold().blue());
    }
    println!(
        " {} {}",
        "Manage your Azure DevTest Labs".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed(),
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logo_has_six_lines() {
        let lines: Vec<&str> = LOGO.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 6);
    }
}
