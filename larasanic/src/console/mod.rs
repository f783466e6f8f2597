//! Artisan-style console commands.
//!
//! Every subcommand of the `larasanic` binary is a [`Command`]. Commands that inspect the
//! application (`route:list`, `container`, `cache:clear`, `serve`) get an application with
//! the default providers registered; the others only need the configured paths.

mod keys;
mod maintenance;
mod routes;
mod serve;

pub use keys::{KeyGenerateCommand, SecretsGenerateCommand, set_env_value};
pub use maintenance::{CacheClearCommand, ContainerCommand, SetupCommand};
pub use routes::{RouteListCommand, route_table};
pub use serve::ServeCommand;

use async_trait::async_trait;
use std::{future::Future, io::Write};

use crate::{Application, config};

pub type Output<'a> = &'a mut (dyn Write + Send);

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the command needs a validated config and the default providers.
    fn boots_application(&self) -> bool {
        true
    }

    async fn run(&self, app: &mut Application, out: Output<'_>) -> anyhow::Result<()>;
}

/// Known commands, in listing order.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<Box<dyn Command>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.commands.iter().map(|c| c.name())).finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ServeCommand::new(None, None)));
        registry.register(Box::new(RouteListCommand::default()));
        registry.register(Box::new(ContainerCommand));
        registry.register(Box::new(CacheClearCommand));
        registry.register(Box::new(KeyGenerateCommand { show: false }));
        registry.register(Box::new(SecretsGenerateCommand { length: 32 }));
        registry.register(Box::new(SetupCommand));
        registry
    }

    /// Add a command, replacing one with the same name.
    pub fn register(&mut self, command: Box<dyn Command>) {
        self.commands.retain(|c| c.name() != command.name());
        self.commands.push(command);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Command> {
        self.commands.iter().find(|c| c.name() == name).map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name()).collect()
    }

    /// Aligned `name  description` lines.
    pub fn help(&self) -> String {
        let width = self.commands.iter().map(|c| c.name().len()).max().unwrap_or(0);
        let mut help = String::from("Available commands:\n");
        for command in &self.commands {
            help.push_str(&format!("  {:<width$}  {}\n", command.name(), command.description()));
        }
        help
    }
}

/// The command selected on the command line. No subcommand means `serve`.
pub fn from_cli<F>(command: Option<config::Command>, shutdown: F) -> Box<dyn Command>
where
    F: Future<Output = ()> + Send + 'static,
{
    match command.unwrap_or(config::Command::Serve { host: None, port: None }) {
        config::Command::Serve { host, port } => Box::new(ServeCommand::new(host, port).with_shutdown(shutdown)),
        config::Command::RouteList { method, name } => Box::new(RouteListCommand { method, name }),
        config::Command::Container => Box::new(ContainerCommand),
        config::Command::CacheClear => Box::new(CacheClearCommand),
        config::Command::KeyGenerate { show } => Box::new(KeyGenerateCommand { show }),
        config::Command::SecretsGenerate { length } => Box::new(SecretsGenerateCommand { length }),
        config::Command::Setup => Box::new(SetupCommand),
    }
}
