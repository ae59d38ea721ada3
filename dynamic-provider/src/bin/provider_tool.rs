//! provider-tool: validate, scaffold and try out dynamic provider code
//! from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use dynamic_provider::{
    available_templates, code_template, validate_submission, DynamicProvider, LlmProvider,
    ProviderIdentity, ProviderOptions, SecretStore, ToolConfig,
};

#[derive(Parser, Debug)]
#[command(name = "provider-tool")]
#[command(about = "Validate, scaffold and test dynamic LLM provider code")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Statically vet a provider source file
    Validate {
        /// Provider source
        file: PathBuf,

        /// Optional validation source checked alongside
        #[arg(long)]
        validation: Option<PathBuf>,
    },

    /// Print a starter template
    Template {
        /// openai, anthropic or class-based
        #[arg(default_value = "openai")]
        provider_type: String,

        /// List template types instead
        #[arg(long)]
        list: bool,
    },

    /// Build a provider from a TOML config and send it one prompt
    Test {
        /// Tool configuration file ([provider], [config], [sandbox])
        #[arg(long, env = "PROVIDER_TOOL_CONFIG")]
        config: PathBuf,

        #[arg(long, default_value = "gpt-3.5-turbo")]
        model: String,

        #[arg(long, default_value = "Hello, this is a test message")]
        prompt: String,

        #[arg(long)]
        system_prompt: Option<String>,

        /// Use the streaming hook
        #[arg(long)]
        stream: bool,

        /// Project directory holding .providers/secrets.toml
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },

    /// Manage the project's .providers/secrets.toml
    Secret {
        /// Project directory holding .providers/secrets.toml
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand, Debug)]
enum SecretAction {
    /// Store a secret in the local file
    Set { name: String, value: String },

    /// Look `expected` up under `actual` (e.g. an existing env var)
    Map { expected: String, actual: String },

    /// Delete a locally stored secret
    Remove { name: String },

    /// List local secret names with availability of conventional keys
    List {
        /// Provider names whose `<NAME>_API_KEY` availability is reported
        #[arg(long = "provider")]
        providers: Vec<String>,
    },
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn validate(file: &Path, validation: Option<&Path>) -> Result<()> {
    let source = read_source(file)?;
    let validation = validation.map(read_source).transpose()?;
    let report = validate_submission(&source, validation.as_deref());
    if !report.is_valid {
        for error in &report.errors {
            eprintln!("✗ {}", error);
        }
        bail!("{} failed validation", file.display());
    }
    println!("✓ {}", report.message);
    Ok(())
}

fn template(provider_type: &str, list: bool) {
    if list {
        for kind in available_templates() {
            println!("{:<12} {}", kind, code_template(kind).description);
        }
        return;
    }
    print!("{}", code_template(provider_type).template);
}

async fn test(
    config_path: &Path,
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    stream: bool,
    project_dir: Option<PathBuf>,
) -> Result<()> {
    let tool_config = ToolConfig::load(config_path)?;
    let source = read_source(&tool_config.provider.source_file)?;
    let validation = tool_config
        .provider
        .validation_file
        .as_deref()
        .map(read_source)
        .transpose()?;

    let store = SecretStore::new(project_dir)?;
    let mut options = ProviderOptions::default()
        .resolver(Arc::new(store))
        .sandbox(tool_config.sandbox.clone());
    options.validation_source = validation;

    let name = tool_config.provider.name.clone();
    let bag = tool_config.config_bag()?;
    let provider = tokio::task::spawn_blocking(move || {
        DynamicProvider::with_options(name, source, bag, options)
    })
    .await??;
    println!("hooks: {}", provider.info().hooks.join(", "));

    let (ok, message) = provider.validate_configuration();
    if !ok {
        bail!("configuration rejected: {}", message);
    }
    tracing::info!(%message, "configuration validated");

    let reply = provider.chat(model, prompt, system_prompt, stream).await?;
    println!("{}", reply);
    Ok(())
}

/// Applies one secret action and returns the lines to print. Values are
/// never echoed.
fn secret(project_dir: PathBuf, action: SecretAction) -> Result<Vec<String>> {
    let mut store = SecretStore::new(Some(project_dir))?;
    let lines = match action {
        SecretAction::Set { name, value } => {
            store.set_local(&name, value)?;
            vec![format!("stored {}", name)]
        }
        SecretAction::Map { expected, actual } => {
            let line = format!("{} -> {}", expected, actual);
            store.set_mapping(&expected, actual)?;
            vec![line]
        }
        SecretAction::Remove { name } => {
            if !store.remove(&name)? {
                bail!("no local secret named {}", name);
            }
            vec![format!("removed {}", name)]
        }
        SecretAction::List { providers } => {
            let mut names = store.list_local();
            names.sort_unstable();
            let mut lines: Vec<String> = names.into_iter().map(str::to_string).collect();
            for provider in providers {
                let key = ProviderIdentity::new(provider).secret_name();
                let mark = if store.has(&key) { "✓" } else { "✗" };
                lines.push(format!("{} {}", mark, key));
            }
            lines
        }
    };
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dynamic_provider=info,provider_script=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file, validation } => validate(&file, validation.as_deref()),
        Commands::Template {
            provider_type,
            list,
        } => {
            template(&provider_type, list);
            Ok(())
        }
        Commands::Test {
            config,
            model,
            prompt,
            system_prompt,
            stream,
            project_dir,
        } => {
            test(
                &config,
                &model,
                &prompt,
                system_prompt.as_deref(),
                stream,
                project_dir,
            )
            .await
        }
        Commands::Secret {
            project_dir,
            action,
        } => {
            for line in secret(project_dir, action)? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_secret_actions_round_trip_through_the_file() {
        let dir = tempdir().unwrap();
        let project = dir.path().to_path_buf();
        let run = |action| secret(project.clone(), action).unwrap();

        assert_eq!(
            run(SecretAction::Set {
                name: "ACME_API_KEY".into(),
                value: "sk-local".into(),
            }),
            vec!["stored ACME_API_KEY"]
        );
        assert_eq!(
            run(SecretAction::Map {
                expected: "OTHER_API_KEY".into(),
                actual: "ACME_API_KEY".into(),
            }),
            vec!["OTHER_API_KEY -> ACME_API_KEY"]
        );
        assert_eq!(
            run(SecretAction::List {
                providers: vec!["acme".into(), "other".into(), "provider-tool-missing".into()],
            }),
            vec![
                "ACME_API_KEY",
                "✓ ACME_API_KEY",
                "✓ OTHER_API_KEY",
                "✗ PROVIDER_TOOL_MISSING_API_KEY",
            ]
        );

        let store = SecretStore::new(Some(project.clone())).unwrap();
        assert_eq!(store.get("OTHER_API_KEY"), Some("sk-local".to_string()));

        assert_eq!(
            run(SecretAction::Remove {
                name: "ACME_API_KEY".into(),
            }),
            vec!["removed ACME_API_KEY"]
        );
        assert!(secret(
            project.clone(),
            SecretAction::Remove {
                name: "ACME_API_KEY".into(),
            }
        )
        .is_err());
        assert!(run(SecretAction::List { providers: vec![] }).is_empty());
    }
}
