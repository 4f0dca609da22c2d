use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tapopt_cli::TEMPLATE;

pub fn handle(out: Option<&Path>, force: bool) -> Result<()> {
    let Some(path) = out else {
        print!("{TEMPLATE}");
        return Ok(());
    };
    if path.exists() && !force {
        bail!("'{}' already exists; pass --force to overwrite", path.display());
    }
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, TEMPLATE).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote configuration template to {}", path.display());
    Ok(())
}
