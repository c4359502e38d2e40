/*!
 * respwire Probe Entry Point
 *
 * Connects to the configured server, sends one command and prints the
 * complete reply. Arguments are the command parts; with none given it sends
 * `SET test_key test_value`.
 *
 * Environment:
 *   RESPWIRE_HOST, RESPWIRE_PORT, RESPWIRE_TIMEOUT_MS - connection settings
 *   RUST_LOG - log verbosity, e.g. RUST_LOG=debug
 */

use anyhow::*;
use respwire::*;

const DEFAULT_COMMAND: [&str; 3] = ["SET", "test_key", "test_value"];

fn main() -> Result<()> {
    env_logger::init();

    let cfg = ClientConfig::from_env().context("reading configuration")?;

    let mut parts: Vec<String> = std::env::args().skip(1).collect();
    if parts.is_empty() {
        parts = DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect();
    }

    let mut conn = Connection::open(&cfg).with_context(|| format!("connecting to {}", cfg.addr()))?;
    let reply = conn
        .request(&parts[..])
        .with_context(|| format!("running {}", parts.join(" ")))?;
    conn.close();

    println!("Received {}", reply);
    if reply.is_error() {
        bail!("server returned an error");
    }
    Ok(())
}
