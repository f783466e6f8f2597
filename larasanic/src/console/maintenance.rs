use async_trait::async_trait;
use std::fs;

use super::{Command, Output};
use crate::{Application, support::Paths};

/// `container`
#[derive(Debug, Clone, Copy)]
pub struct ContainerCommand;

#[async_trait]
impl Command for ContainerCommand {
    fn name(&self) -> &str {
        "container"
    }

    fn description(&self) -> &str {
        "List all service container bindings"
    }

    async fn run(&self, app: &mut Application, out: Output<'_>) -> anyhow::Result<()> {
        app.boot().await?;
        writeln!(out, "{}", app.container().list_bindings())?;
        Ok(())
    }
}

/// `cache:clear`
#[derive(Debug, Clone, Copy)]
pub struct CacheClearCommand;

/// Delete the files directly under `dir`. Returns how many were removed.
fn clear_directory(dir: &std::path::Path) -> std::io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[async_trait]
impl Command for CacheClearCommand {
    fn name(&self) -> &str {
        "cache:clear"
    }

    fn description(&self) -> &str {
        "Flush the application cache and compiled views"
    }

    async fn run(&self, app: &mut Application, out: Output<'_>) -> anyhow::Result<()> {
        app.boot().await?;

        if let Some(cache) = app.state().cache.clone() {
            cache.flush().await?;
            writeln!(out, "Application cache cleared ({} store).", cache.store().name())?;
        }

        if let Some(views) = &app.state().view {
            views.clear_cache();
        }
        let removed = clear_directory(&app.paths().cache_views())?;
        writeln!(out, "Compiled views cleared ({removed} files).")?;
        Ok(())
    }
}

/// `setup`
#[derive(Debug, Clone, Copy)]
pub struct SetupCommand;

#[async_trait]
impl Command for SetupCommand {
    fn name(&self) -> &str {
        "setup"
    }

    fn description(&self) -> &str {
        "Create the storage directory structure"
    }

    fn boots_application(&self) -> bool {
        false
    }

    async fn run(&self, app: &mut Application, out: Output<'_>) -> anyhow::Result<()> {
        let paths: &Paths = app.paths();
        if paths.is_setup_complete() {
            writeln!(out, "Setup already completed; ensuring directories exist.")?;
        }
        for dir in paths.create_storage_structure()? {
            writeln!(out, "  {}", dir.display())?;
        }
        writeln!(out, "Setup complete.")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_application, test_config_in};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_setup_creates_storage() {
        let dir = TempDir::new().unwrap();
        let mut app = Application::new(test_config_in(&dir));
        let mut out = Vec::<u8>::new();
        SetupCommand.run(&mut app, &mut out).await.unwrap();

        assert!(dir.path().join("storage/framework/sessions").is_dir());
        assert!(app.paths().is_setup_complete());
        assert!(String::from_utf8(out).unwrap().ends_with("Setup complete.\n"));
    }

    #[tokio::test]
    async fn test_cache_clear_flushes_store_and_views() {
        let dir = TempDir::new().unwrap();
        let mut app = test_application(&dir).await;
        let views = app.paths().cache_views();
        fs::create_dir_all(&views).unwrap();
        fs::write(views.join("compiled.html"), "x").unwrap();

        app.boot().await.unwrap();
        let cache = app.state().cache.clone().unwrap();
        cache.put("key", json!(1), None).await.unwrap();

        let mut out = Vec::<u8>::new();
        CacheClearCommand.run(&mut app, &mut out).await.unwrap();
        assert!(!cache.has("key").await.unwrap());
        assert!(!views.join("compiled.html").exists());
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Application cache cleared (array store)."));
        assert!(output.contains("Compiled views cleared (1 files)."));
    }

    #[tokio::test]
    async fn test_container_lists_provider_bindings() {
        let dir = TempDir::new().unwrap();
        let mut app = test_application(&dir).await;
        let mut out = Vec::<u8>::new();
        ContainerCommand.run(&mut app, &mut out).await.unwrap();
        let output = String::from_utf8(out).unwrap();
        assert!(output.starts_with("Singletons:"));
        for key in ["auth", "cache", "config", "http_client", "session.store", "url", "view"] {
            assert!(output.contains(key), "missing {key}");
        }
    }
}
