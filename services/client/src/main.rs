use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wastenot_client::{ApiClient, ClientConfig, ImageFile, InvokeError, RecipeRequest};

/// Command line client for the WasteNot relay API.
#[derive(Parser, Debug)]
#[command(name = "wastenot", version, about = "Upload food photos and request recipes")]
struct Cli {
    /// Base URL of the relay API.
    #[arg(long, env = "EXPO_PUBLIC_API_URL")]
    api_url: Option<String>,

    /// Access token sent as a bearer token.
    #[arg(long, env = "WASTENOT_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store an image.
    Upload {
        /// Image path or `data:` URL.
        image: String,
    },
    /// Store an image and detect the ingredients in it.
    Detect {
        /// Image path or `data:` URL.
        image: String,
    },
    /// Generate a recipe.
    Recipe {
        #[arg(long = "ingredient", required = true)]
        ingredients: Vec<String>,
        #[arg(long = "diet")]
        dietary_preferences: Vec<String>,
        #[arg(long = "allergy")]
        allergies: Vec<String>,
        #[arg(long, default_value = "")]
        meal_type: String,
        #[arg(long, default_value = "")]
        cooking_time: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling request");
            trigger.cancel();
        }
    });

    let client = ApiClient::new(config);

    match run(&client, cli.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = ClientConfig::load().context("Failed to load configuration")?;

    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(token) = &cli.token {
        config.access_token = Some(token.clone());
    }

    config.validate().context("Invalid configuration")?;

    Ok(config)
}

async fn run(
    client: &ApiClient,
    command: Command,
    cancel: &CancellationToken,
) -> Result<(), InvokeError> {
    match command {
        Command::Upload { image } => {
            let image = read_image(&image).await?;
            print_json(&client.upload_image(&image, cancel).await?)
        }
        Command::Detect { image } => {
            let image = read_image(&image).await?;
            info!(file = %image.file_name, size_bytes = image.data.len(), "Detecting ingredients");
            print_json(&client.detect_ingredients(&image, cancel).await?)
        }
        Command::Recipe {
            ingredients,
            dietary_preferences,
            allergies,
            meal_type,
            cooking_time,
        } => {
            let request = RecipeRequest {
                ingredients,
                dietary_preferences,
                allergies,
                meal_type,
                cooking_time,
            };
            print_json(&client.generate_recipe(&request, cancel).await?)
        }
    }
}

async fn read_image(source: &str) -> Result<ImageFile, InvokeError> {
    if source.starts_with("data:") {
        ImageFile::from_data_url(source, "image.jpg")
    } else {
        ImageFile::from_path(source).await
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), InvokeError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| InvokeError::InvalidInput(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_recipe_command() {
        let cli = Cli::try_parse_from([
            "wastenot",
            "recipe",
            "--ingredient",
            "egg",
            "--ingredient",
            "spinach",
            "--allergy",
            "nuts",
            "--meal-type",
            "breakfast",
        ])
        .unwrap();

        match cli.command {
            Command::Recipe {
                ingredients,
                allergies,
                meal_type,
                ..
            } => {
                assert_eq!(ingredients, vec!["egg", "spinach"]);
                assert_eq!(allergies, vec!["nuts"]);
                assert_eq!(meal_type, "breakfast");
            }
            other => panic!("Expected recipe command, got {:?}", other),
        }
    }

    #[test]
    fn test_recipe_requires_an_ingredient() {
        assert!(Cli::try_parse_from(["wastenot", "recipe"]).is_err());
    }
}
