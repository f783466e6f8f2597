use anyhow::Context;
use async_trait::async_trait;
use std::fs;

use super::{Command, Output};
use crate::{Application, crypto};

const SECRET_ENV: &str = "APP_SECRET_KEY";

/// Set `key=value` in `.env` contents, replacing an existing assignment or appending one.
pub fn set_env_value(contents: &str, key: &str, value: &str) -> String {
    let assignment = format!("{key}={value}");
    let mut replaced = false;
    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(&format!("{key}=")) {
                replaced = true;
                assignment.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(assignment);
    }
    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

/// `key:generate [--show]`
#[derive(Debug, Clone)]
pub struct KeyGenerateCommand {
    pub show: bool,
}

#[async_trait]
impl Command for KeyGenerateCommand {
    fn name(&self) -> &str {
        "key:generate"
    }

    fn description(&self) -> &str {
        "Generate the application secret key"
    }

    fn boots_application(&self) -> bool {
        false
    }

    async fn run(&self, app: &mut Application, out: Output<'_>) -> anyhow::Result<()> {
        let key = crypto::generate_token(32);
        if self.show {
            writeln!(out, "{key}")?;
            return Ok(());
        }

        let env_file = app.paths().base(".env");
        let contents = match fs::read_to_string(&env_file) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("read {}", env_file.display())),
        };
        fs::write(&env_file, set_env_value(&contents, SECRET_ENV, &key))
            .with_context(|| format!("write {}", env_file.display()))?;

        writeln!(out, "Application key set successfully in {}.", env_file.display())?;
        Ok(())
    }
}

/// `secrets:generate [--length]`
#[derive(Debug, Clone)]
pub struct SecretsGenerateCommand {
    pub length: usize,
}

#[async_trait]
impl Command for SecretsGenerateCommand {
    fn name(&self) -> &str {
        "secrets:generate"
    }

    fn description(&self) -> &str {
        "Generate random secrets for use in configuration"
    }

    fn boots_application(&self) -> bool {
        false
    }

    async fn run(&self, _app: &mut Application, out: Output<'_>) -> anyhow::Result<()> {
        anyhow::ensure!(self.length > 0, "--length must be at least 1");
        writeln!(out, "Secret (hex):       {}", crypto::generate_secret(self.length))?;
        writeln!(out, "Token (url-safe):   {}", crypto::generate_token(self.length))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_config_in;
    use tempfile::TempDir;

    #[test]
    fn test_set_env_value() {
        assert_eq!(set_env_value("", "APP_SECRET_KEY", "abc"), "APP_SECRET_KEY=abc\n");
        assert_eq!(
            set_env_value("APP_ENV=local\nAPP_SECRET_KEY=old\nPORT=1\n", "APP_SECRET_KEY", "new"),
            "APP_ENV=local\nAPP_SECRET_KEY=new\nPORT=1\n"
        );
        assert_eq!(
            set_env_value("APP_ENV=local", "APP_SECRET_KEY", "new"),
            "APP_ENV=local\nAPP_SECRET_KEY=new\n"
        );
    }

    #[tokio::test]
    async fn test_key_generate_writes_env_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "APP_ENV=local\nAPP_SECRET_KEY=old\n").unwrap();
        let mut app = Application::new(test_config_in(&dir));

        let mut out = Vec::<u8>::new();
        KeyGenerateCommand { show: false }.run(&mut app, &mut out).await.unwrap();

        let env = fs::read_to_string(dir.path().join(".env")).unwrap();
        let key = env.lines().find_map(|l| l.strip_prefix("APP_SECRET_KEY=")).unwrap();
        assert_ne!(key, "old");
        assert_eq!(key.len(), 43);
        assert!(env.starts_with("APP_ENV=local\n"));
    }

    #[test]
    fn test_generated_key_is_loaded_by_config() {
        use crate::config::{Args, Config};
        use figment::Jail;

        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "app:\n  env: local\n")?;
            let args = Args {
                config: "config.yaml".to_string(),
                validate: false,
                command: None,
            };
            assert!(Config::load(&args).is_err());

            let mut app = Application::new(Config::figment(&args).extract()?);
            let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
            runtime
                .block_on(KeyGenerateCommand { show: false }.run(&mut app, &mut Vec::<u8>::new()))
                .map_err(|e| e.to_string())?;

            let env = fs::read_to_string(jail.directory().join(".env")).map_err(|e| e.to_string())?;
            let key = env.lines().find_map(|l| l.strip_prefix("APP_SECRET_KEY=")).unwrap();
            let config = Config::load(&args)?;
            assert_eq!(config.secret_key.as_deref(), Some(key));
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_key_generate_show_prints_only() {
        let dir = TempDir::new().unwrap();
        let mut app = Application::new(test_config_in(&dir));
        let mut out = Vec::<u8>::new();
        KeyGenerateCommand { show: true }.run(&mut app, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim().len(), 43);
        assert!(!dir.path().join(".env").exists());
    }

    #[tokio::test]
    async fn test_secrets_generate() {
        let dir = TempDir::new().unwrap();
        let mut app = Application::new(test_config_in(&dir));
        let mut out = Vec::<u8>::new();
        SecretsGenerateCommand { length: 16 }.run(&mut app, &mut out).await.unwrap();
        let output = String::from_utf8(out).unwrap();
        let hex = output.lines().next().unwrap().rsplit(' ').next().unwrap();
        assert_eq!(hex.len(), 32);
        assert!(SecretsGenerateCommand { length: 0 }.run(&mut app, &mut Vec::<u8>::new()).await.is_err());
    }
}
