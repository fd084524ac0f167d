//! One process, both roles: start a server endpoint, dial it with a client
//! endpoint, send a batch, print the processed count, shut everything down.
//!
//! Run with: cargo run --example roundtrip

use std::{sync::Arc, time::Duration};

use rpclink_endpoint::EndpointConfig;

const ADDR: &str = "127.0.0.1:35819";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut server_cfg = EndpointConfig::default();
    server_cfg.addr = ADDR.to_string();
    server_cfg.validate()?;
    let server_cfg = Arc::new(server_cfg);

    let server_task = {
        let server_cfg = server_cfg.clone();
        tokio::spawn(async move {
            server_cfg
                .start_server(|server| {
                    server.register("process", |body| {
                        // Count the newline-separated items in the payload.
                        let count = body.split(|b| *b == b'\n').filter(|s| !s.is_empty()).count();
                        Ok((count as u32).to_le_bytes().to_vec())
                    })?;
                    Ok(())
                })
                .await
        })
    };

    // Give the server a moment to bind.
    while !server_cfg.server_started().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut client_cfg = EndpointConfig::default();
    client_cfg.addr = ADDR.to_string();
    client_cfg.validate()?;
    client_cfg.init_client().await?;

    let conn = client_cfg.client().await.expect("client handle");
    let reply = conn.call("process", b"alpha\nbeta\ngamma\n".to_vec()).await?;
    let count = u32::from_le_bytes(reply.as_slice().try_into()?);
    println!("server processed {count} items");

    client_cfg.close_client().await?;
    server_cfg.stop_server().await?;
    server_task.await??;

    Ok(())
}
