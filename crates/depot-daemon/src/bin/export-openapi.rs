//! Dumps the document the daemon serves at `/openapi.json` (and renders at
//! `/docs`). YAML by default; a target path ending in `.json` gets pretty JSON.

use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use depot_daemon::server::docs::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let output = env::args().nth(1);
    let doc = ApiDoc::openapi();

    let Some(path) = output else {
        println!("{}", doc.to_yaml().context("failed to serialise OpenAPI")?);
        return Ok(());
    };

    let path = Path::new(&path);
    let rendered = if path.extension().is_some_and(|ext| ext == "json") {
        doc.to_pretty_json().context("failed to serialise OpenAPI")?
    } else {
        doc.to_yaml().context("failed to serialise OpenAPI")?
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory for {}", path.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}
