//! Echo server: one worker thread per connection.
//!
//! Every text message is sent back. Clients connecting with `?watch=uptime`
//! also get a push whenever the server's uptime in seconds changes.
use std::{
    net::TcpListener,
    sync::Arc,
    time::{Duration, Instant},
};

use log::*;
use websock_engine::{
    accept_with_config,
    session::{EndReason, FieldId, FieldReading, SessionHandle},
    Result, SessionConfig, SessionHandler,
};

struct Echo;

impl SessionHandler for Echo {
    fn initialize(&mut self, session: &SessionHandle) -> Result<Vec<FieldId>> {
        info!("New session for {}", session.target());
        Ok(match session.find_query_param("watch") {
            Some("uptime") => vec![FieldId::new("Server", "Uptime")],
            _ => Vec::new(),
        })
    }

    fn process_msg(&mut self, session: &SessionHandle, text: &str) -> Result<()> {
        session.queue_text_msg(text)
    }

    fn field_changed(
        &mut self,
        session: &SessionHandle,
        id: &FieldId,
        reading: &FieldReading,
    ) -> Result<()> {
        session.queue_text_msg(&format!("{id}={}", reading.value))
    }

    fn disconnected(&mut self, reason: &EndReason) {
        info!("Session ended: {reason}");
    }
}

fn main() {
    env_logger::init();

    let started = Instant::now();
    let uptime = Arc::new(move |id: &FieldId| match (id.moniker.as_str(), id.field.as_str()) {
        ("Server", "Uptime") => FieldReading::valid(started.elapsed().as_secs().to_string()),
        _ => FieldReading::invalid(),
    });

    let config = SessionConfig::default().ping_interval(Some(Duration::from_secs(20)));
    let server = TcpListener::bind("127.0.0.1:9001").unwrap();

    for stream in server.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Error accepting stream: {e}");
                continue;
            }
        };
        match accept_with_config(stream, Echo, config.clone()) {
            Ok(session) => {
                if let Err(e) = session.with_field_source(uptime.clone()).spawn() {
                    warn!("Cannot start session thread: {e}");
                }
            }
            Err(e) => warn!("Upgrade failed: {e}"),
        }
    }
}
