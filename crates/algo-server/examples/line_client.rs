use std::env;
use std::io::{self, Write};
use std::time::Duration;

use algo_protocol::{format_reply, parse_reply, parse_request, ServerReply};
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<()> {
    let addr = env::var("ALGO_CLIENT_ADDR").unwrap_or_else(|_| "127.0.0.1:9100".to_string());

    println!("Connecting to {}...", addr);
    let stream = TcpStream::connect(&addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut replies = BufReader::new(read_half).lines();
    println!("Connected.");
    println!("Type requests like:");
    println!(r#"  S, slicer, my-buy, {{"security": {{"sec": 7, "side": "buy", "qty": 500}}, "clip": 100}}"#);
    println!("  B, , 7, 9.5, 100, 10.5, 100");
    println!("  Q");
    println!("  F, 1, filled, 100, 9.5");
    println!("  L, 0");
    println!("  X, my-buy");
    println!("Type 'quit' or 'exit' to leave.\n");

    let stdin = io::stdin();

    loop {
        print!(">> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!("\nEOF on stdin, exiting client.");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            println!("Exiting client.");
            break;
        }

        if let Err(e) = parse_request(trimmed) {
            eprintln!("Not a valid request: {}", e);
            continue;
        }
        write_half.write_all(format!("{}\n", trimmed).as_bytes()).await?;

        // Print whatever arrives shortly after; stop early at the end of a
        // query or history stream.
        loop {
            let next = match timeout(Duration::from_millis(200), replies.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    println!("Server closed the connection.");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    eprintln!("Read error: {:?}", e);
                    return Ok(());
                }
                Err(_) => break,
            };

            match parse_reply(&next) {
                Ok(Some(reply)) => {
                    println!("<< {}", format_reply(&reply));
                    if matches!(reply, ServerReply::End(_)) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("<< (unreadable: {}) {}", e, next),
            }
        }
    }

    Ok(())
}
