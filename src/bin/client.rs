//! Send one request to a running tts-pipe-server and report the reply.

use std::path::PathBuf;

use clap::Parser;
use interprocess::local_socket::tokio::{prelude::*, Stream};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tts_pipe_server::config::DEFAULT_PIPE_NAME;
use tts_pipe_server::protocol;
use tts_pipe_server::server::pipe_name;

#[derive(Parser, Debug)]
#[command(name = "tts-pipe-client", version, about = "Test client for the TTS pipe server")]
struct Cli {
    /// Text to speak
    #[arg(default_value = "")]
    text: String,

    /// Engine identifier, or a short name with --legacy
    #[arg(long, default_value = "SherpaOnnxTTS")]
    engine: String,

    #[arg(long)]
    voice: Option<String>,

    /// Ask for the engine's voices instead of audio
    #[arg(long)]
    list_voices: bool,

    /// Let the server play the audio instead of returning it
    #[arg(long)]
    no_audio: bool,

    /// Send the old `{text, args}` message shape
    #[arg(long)]
    legacy: bool,

    /// Where to save returned audio
    #[arg(long, default_value = "output.wav")]
    out: PathBuf,

    #[arg(long, env = "PIPE_NAME", default_value = DEFAULT_PIPE_NAME)]
    pipe: String,
}

fn build_request(cli: &Cli) -> Value {
    let args = json!({
        "engine": cli.engine,
        "voice": cli.voice,
        "listvoices": cli.list_voices,
        "return_audio_bytes": !cli.no_audio,
    });

    if cli.legacy {
        return json!({ "text": cli.text, "args": args });
    }

    let mut tts = json!({ "engine": cli.engine });
    if let Some(voice) = &cli.voice {
        tts["voice_id"] = json!(voice);
    }
    json!({
        "clipboard_text": cli.text,
        "config": { "TTS": tts, "translate": { "no_translate": "True" } },
        "args": args,
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let request = serde_json::to_vec(&build_request(cli))?;
    let mut conn = Stream::connect(pipe_name(&cli.pipe)?).await?;
    conn.write_all(&protocol::length_prefixed(&request)).await?;

    let mut response = Vec::new();
    conn.read_to_end(&mut response).await?;

    if response.is_empty() {
        println!("No data returned");
        return Ok(());
    }

    if cli.list_voices {
        let voices: Vec<Value> = serde_json::from_slice(&response)?;
        for voice in &voices {
            println!(
                "{}\t{}",
                voice["id"].as_str().unwrap_or_default(),
                voice["name"].as_str().unwrap_or_default()
            );
        }
        println!("{} voice(s)", voices.len());
        return Ok(());
    }

    if response.len() < 4 {
        return Err(format!("short response ({} bytes)", response.len()).into());
    }
    let declared = u32::from_le_bytes([response[0], response[1], response[2], response[3]]) as usize;
    let audio = &response[4..];
    if declared != audio.len() {
        eprintln!(
            "Warning: length prefix says {} bytes, received {}",
            declared,
            audio.len()
        );
    }
    std::fs::write(&cli.out, audio)?;
    println!("Saved {} bytes to {}", audio.len(), cli.out.display());
    Ok(())
}
