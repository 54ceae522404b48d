use crate::config::generate::generate_starter_config;
use std::io::Write;
use std::path::PathBuf;

/// `traceship config init`: writes a commented starter config to the default
/// user location, or prints it with `--stdout`. Refuses to clobber an
/// existing file.
pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_starter_config();

    if stdout {
        print!("{}", template);
        return Ok(());
    }

    let target = default_config_target()
        .ok_or("could not determine home directory; use --stdout instead")?;

    if target.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            target.display()
        )
        .into());
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(&target)?;
    file.write_all(template.as_bytes())?;

    println!("Wrote starter config to {}", target.display());
    println!("Edit it (at minimum: remote.endpoint, remote.token, sync.bucket_alias), then run 'traceship run'.");

    Ok(())
}

fn default_config_target() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/traceship/config.yml"))
}
