use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{StatusCode, Url};
use serde_json::Value;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "file-cli")]
#[command(about = "Client for the file gateway HTTP API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "default")]
    bucket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files in the bucket
    List,
    /// Show metadata of one file
    Metadata { key: String },
    /// Check whether a file exists
    Exists { key: String },
    /// Upload a local file
    Upload {
        key: String,
        path: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        #[arg(long)]
        uploaded_by: Option<String>,
    },
    /// Download a file to disk, or stdout when no output is given
    Download {
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file
    Delete { key: String },
}

fn endpoint(base: &str, segments: &[&str]) -> CliResult<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("'{}' cannot be used as a base URL", base))?
        .pop_if_empty()
        .extend(["api", "files"])
        .extend(segments);
    Ok(url)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let bucket = cli.bucket.as_str();

    match cli.command {
        Commands::List => {
            let res = client.get(endpoint(&cli.url, &[bucket])?).send().await?;
            print_response(res).await?;
        }
        Commands::Metadata { key } => {
            let res = client
                .get(endpoint(&cli.url, &[bucket, &key, "metadata"])?)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Exists { key } => {
            let res = client
                .get(endpoint(&cli.url, &[bucket, &key, "exists"])?)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Upload {
            key,
            path,
            content_type,
            uploaded_by,
        } => {
            let body = tokio::fs::read(&path).await?;
            let mut req = client
                .put(endpoint(&cli.url, &[bucket, &key])?)
                .header(CONTENT_TYPE, HeaderValue::from_str(&content_type)?)
                .body(body);
            if let Some(user) = uploaded_by {
                req = req.header("x-uploaded-by", user);
            }
            print_response(req.send().await?).await?;
        }
        Commands::Download { key, output } => {
            let res = client.get(endpoint(&cli.url, &[bucket, &key])?).send().await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let bytes = res.bytes().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &bytes).await?;
                    eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
        }
        Commands::Delete { key } => {
            let res = client.delete(endpoint(&cli.url, &[bucket, &key])?).send().await?;
            if res.status() == StatusCode::NO_CONTENT {
                println!("Deleted {}/{}", bucket, key);
            } else {
                print_response(res).await?;
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> CliResult<()> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_key_segments() {
        let url = endpoint("http://localhost:8080/", &["docs", "2024/q1 report.pdf"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/files/docs/2024%2Fq1%20report.pdf"
        );
    }
}
