use clap::{Parser, Subcommand};
use comfyui_invoke_proxy::api::function_url::{handle_event, FunctionUrlEvent};
use comfyui_invoke_proxy::api::request::{GenerationParams, Submission};
use comfyui_invoke_proxy::config::BackendKind;
use comfyui_invoke_proxy::media::AcceptHeader;
use comfyui_invoke_proxy::utils::output::{extension_for, generate_to_path};
use comfyui_invoke_proxy::{backend, AppState, Config, ParameterInjector, TemplateStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "invokectl", about = "CLI for the workflow invocation proxy", version)]
struct Cli {
    /// Override COMFYUI_URL
    #[arg(global = true, long)]
    comfyui_url: Option<String>,

    /// Override ENDPOINT_NAME and use the SageMaker backend
    #[arg(global = true, long)]
    endpoint_name: Option<String>,

    /// Override WORKFLOW_DIR
    #[arg(global = true, long, value_name = "DIR")]
    workflow_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct PromptArgs {
    /// Template file name under the workflow directory
    #[arg(long, default_value = "workflow_api.json")]
    prompt_file: String,
    /// Positive prompt text
    #[arg(long, value_name = "TEXT")]
    positive: String,
    /// Negative prompt text
    #[arg(long, value_name = "TEXT", default_value = "")]
    negative: String,
    /// Seed; drawn at random when omitted
    #[arg(long)]
    seed: Option<i64>,
}

impl From<PromptArgs> for GenerationParams {
    fn from(args: PromptArgs) -> Self {
        GenerationParams {
            prompt_file: args.prompt_file,
            positive_prompt: args.positive,
            negative_prompt: args.negative,
            seed: args.seed,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a template and save the generated image
    Generate {
        #[command(flatten)]
        prompt: PromptArgs,
        /// Output path (defaults to ./output.<ext>)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
        /// Accept header used for content negotiation, e.g. image/jpeg
        #[arg(long, value_name = "MIME")]
        accept: Option<String>,
    },
    /// Print the injected graph without submitting it
    Render {
        #[command(flatten)]
        prompt: PromptArgs,
    },
    /// Check that the configured backend is reachable
    Ping,
    /// Run a function URL event JSON file through the handler
    Event {
        /// Path to the event JSON; `-` reads stdin
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load env and parse CLI
    Config::dotenv_load();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut conf = Config::new()?;
    if let Some(url) = cli.comfyui_url {
        conf.comfyui_url = url;
    }
    if let Some(name) = cli.endpoint_name {
        conf.endpoint_name = Some(name);
        conf.backend = BackendKind::SageMaker;
    }
    if let Some(dir) = cli.workflow_dir {
        conf.workflow_dir = dir;
    }

    match cli.command {
        Commands::Render { prompt } => {
            let params = GenerationParams::from(prompt);
            let mut graph = TemplateStore::new(&conf.workflow_dir).load(&params.prompt_file).await?;
            let report = ParameterInjector::new().inject(
                &mut graph,
                params.seed,
                &params.positive_prompt,
                &params.negative_prompt,
            );
            if let Some(seed) = report.seed {
                eprintln!("seed: {}", seed);
            }
            println!("{}", serde_json::to_string_pretty(&graph)?);
            Ok(())
        }
        Commands::Generate { prompt, out, accept } => {
            let state = AppState::from_config(backend::from_config(&conf).await?, &conf);
            let accept = AcceptHeader::from_header(accept.as_deref());
            let staging = out.clone().unwrap_or_else(|| PathBuf::from("output.partial-asset"));

            let asset = match generate_to_path(&state, Submission::Generate(prompt.into()), &accept, &staging).await {
                Ok(asset) => asset,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            let path = match out {
                Some(path) => path,
                None => {
                    let named = PathBuf::from(format!("output.{}", extension_for(&asset.content_type)));
                    tokio::fs::rename(&staging, &named).await?;
                    named
                }
            };
            println!("Saved {} ({}, {} bytes)", path.display(), asset.content_type, asset.bytes.len());
            Ok(())
        }
        Commands::Ping => {
            let client = backend::from_config(&conf).await?;
            match client.ping().await {
                Ok(()) => {
                    println!("{}: ok", client.name());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}: {}", client.name(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Event { path } => {
            let raw = if path.as_os_str() == "-" {
                let mut buf = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
                buf
            } else {
                tokio::fs::read_to_string(&path).await?
            };
            let event: FunctionUrlEvent = serde_json::from_str(&raw)?;
            let state = AppState::from_config(backend::from_config(&conf).await?, &conf);
            let response = handle_event(&state, event).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}
