use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use serde_json::{json, Value};
use uuid::Uuid;

use cube_ingress::auth::cookie::{encode_cookie, DEFAULT_SESSION_COOKIE};
use cube_ingress::auth::mongo_cookie::hash_secret;
use cube_ingress::auth::signed_request::authorization_header;

#[derive(Parser)]
#[command(name = "cube-cli")]
#[command(about = "Credential and event tooling for the cube ingress server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a session cookie for a token uid and secret
    Cookie {
        uid: String,
        secret: String,
        #[arg(long, default_value = DEFAULT_SESSION_COOKIE)]
        name: String,
    },
    /// Issue a session token: prints the stored record and the client cookie
    HashSecret {
        secret: String,
        /// Token uid; a random UUID when omitted
        #[arg(long)]
        uid: Option<String>,
        #[arg(long, default_value = DEFAULT_SESSION_COOKIE)]
        name: String,
    },
    /// Build a SIGNED_REQUEST Authorization header for a JSON payload
    Sign {
        #[arg(short, long)]
        secret: String,
        payload: String,
    },
    /// POST a JSON array of events to the collector
    Send {
        #[arg(short, long, default_value = "http://localhost:1080")]
        url: String,
        /// Sign the request with this consumer secret
        #[arg(long)]
        secret: Option<String>,
        /// Payload to sign; defaults to an empty object
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Raw Cookie header value
        #[arg(long)]
        cookie: Option<String>,
        events: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Cookie { uid, secret, name } => {
            println!("{}", encode_cookie(&name, &uid, &secret));
        }
        Commands::HashSecret { secret, uid, name } => {
            let uid = uid.unwrap_or_else(|| Uuid::new_v4().to_string());
            let hashed = hash_secret(&secret)?;
            let record = json!({ "uid": &uid, "hashed_secret": hashed });
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("{}", encode_cookie(&name, &uid, &secret));
        }
        Commands::Sign { secret, payload } => {
            serde_json::from_str::<Value>(&payload)?;
            println!("{}", authorization_header(secret.as_bytes(), &payload));
        }
        Commands::Send {
            url,
            secret,
            payload,
            cookie,
            events,
        } => {
            let events: Value = serde_json::from_str(&events)?;
            if !events.is_array() {
                return Err("events must be a JSON array".into());
            }

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if let Some(secret) = secret {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&authorization_header(secret.as_bytes(), &payload))?,
                );
            }
            if let Some(cookie) = cookie {
                headers.insert(COOKIE, HeaderValue::from_str(&cookie)?);
            }

            let res = reqwest::Client::new()
                .post(format!("{}/1.0/event/put", url.trim_end_matches('/')))
                .headers(headers)
                .json(&events)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: collector returned status {}", status);
        eprintln!("Response: {}", text);
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
